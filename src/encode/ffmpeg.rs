//! Encoder backend that drives the system `ffmpeg` (libx264).
//!
//! Raw frames go to ffmpeg's stdin from a writer thread fed by a bounded channel; a reader thread
//! splits the Annex B stream on stdout into access units (x264 is told to emit access-unit
//! delimiters); a third thread drains stderr so ffmpeg can never block on it.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::composite::surface::PooledSurface;
use crate::encode::backend::{EncoderConfig, EncoderEvent, PushOutcome, VideoEncoder};
use crate::encode::h264::{find_start_code, nal_type};
use crate::foundation::error::{ImgseqError, ImgseqResult};

/// Environment variable overriding the ffmpeg executable.
pub const FFMPEG_ENV: &str = "IMGSEQ_FFMPEG";

const READ_CHUNK: usize = 64 * 1024;

/// Resolve the ffmpeg executable: `IMGSEQ_FFMPEG` if set, else `ffmpeg` from `PATH`.
pub fn default_ffmpeg_bin() -> PathBuf {
    std::env::var_os(FFMPEG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ffmpeg"))
}

/// Return `true` when `bin -version` runs successfully.
pub fn is_ffmpeg_available(bin: &Path) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Return `true` when `bin` lists the `libx264` encoder.
pub fn has_libx264(bin: &Path) -> bool {
    Command::new(bin)
        .args(["-hide_banner", "-encoders"])
        .stderr(Stdio::null())
        .output()
        .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).contains("libx264"))
        .unwrap_or(false)
}

/// [`VideoEncoder`] backed by an `ffmpeg` child process.
pub struct FfmpegEncoder {
    bin: PathBuf,
    running: Option<Running>,
}

struct Running {
    child: Option<Child>,
    input_tx: Option<Sender<PooledSurface>>,
    events_rx: Receiver<EncoderEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    ended: bool,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(default_ffmpeg_bin())
    }
}

impl FfmpegEncoder {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            running: None,
        }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    fn running(&mut self) -> ImgseqResult<&mut Running> {
        self.running
            .as_mut()
            .ok_or_else(|| ImgseqError::protocol("ffmpeg encoder not started"))
    }
}

/// Command-line arguments for one encode.
pub fn ffmpeg_args(cfg: &EncoderConfig) -> Vec<OsString> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    let fps = cfg.fps.get().to_string();
    let bitrate = cfg.bitrate.to_string();
    let gop = cfg.keyframe_interval_frames().to_string();
    let args: [&str; 33] = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        cfg.pixel_format.ffmpeg_name(),
        "-s",
        &size,
        "-r",
        &fps,
        "-i",
        "pipe:0",
        "-an",
        "-c:v",
        "libx264",
        "-profile:v",
        "main",
        "-b:v",
        &bitrate,
        "-g",
        &gop,
        "-keyint_min",
        &gop,
        "-bf",
        "0",
        "-x264-params",
        "aud=1",
        "-pix_fmt",
        "yuv420p",
        "-f",
        "h264",
        "pipe:1",
    ];
    args.into_iter().map(OsString::from).collect()
}

impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg-libx264"
    }

    fn probe(&mut self, cfg: &EncoderConfig) -> ImgseqResult<()> {
        cfg.validate()?;
        if !is_ffmpeg_available(&self.bin) {
            return Err(ImgseqError::configuration(format!(
                "ffmpeg is required for H.264 encoding, but '{}' could not be run \
                 (set {FFMPEG_ENV} or add it to PATH)",
                self.bin.display()
            )));
        }
        if !has_libx264(&self.bin) {
            return Err(ImgseqError::configuration(format!(
                "'{}' was built without the libx264 encoder",
                self.bin.display()
            )));
        }
        Ok(())
    }

    fn start(&mut self, cfg: &EncoderConfig) -> ImgseqResult<()> {
        if self.running.is_some() {
            return Err(ImgseqError::protocol("ffmpeg encoder already started"));
        }

        let args = ffmpeg_args(cfg);
        tracing::debug!(bin = %self.bin.display(), ?args, "spawning ffmpeg");
        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ImgseqError::configuration(format!(
                    "failed to spawn '{}': {e}",
                    self.bin.display()
                ))
            })?;

        let (Some(stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ImgseqError::protocol("failed to open ffmpeg pipes (unexpected)"));
        };

        let (input_tx, input_rx) = crossbeam_channel::bounded(cfg.queue_depth);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let spawned = spawn_named("imgseq-ffmpeg-in", move || write_frames(stdin, input_rx))
            .and_then(|writer| {
                let reader =
                    spawn_named("imgseq-ffmpeg-out", move || read_access_units(stdout, events_tx))?;
                Ok((writer, reader))
            })
            .and_then(|(writer, reader)| {
                let stderr_drain =
                    spawn_named("imgseq-ffmpeg-err", move || -> std::io::Result<Vec<u8>> {
                        let mut stderr_bytes = Vec::new();
                        stderr.read_to_end(&mut stderr_bytes)?;
                        Ok(stderr_bytes)
                    })?;
                Ok((writer, reader, stderr_drain))
            });
        let (writer, reader, stderr_drain) = match spawned {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        self.running = Some(Running {
            child: Some(child),
            input_tx: Some(input_tx),
            events_rx,
            writer: Some(writer),
            reader: Some(reader),
            stderr_drain: Some(stderr_drain),
            ended: false,
        });
        Ok(())
    }

    fn push_frame(
        &mut self,
        frame: PooledSurface,
        timeout: Duration,
    ) -> ImgseqResult<PushOutcome> {
        let running = self.running()?;
        let tx = running
            .input_tx
            .as_ref()
            .ok_or_else(|| ImgseqError::protocol("ffmpeg input already closed"))?;
        match tx.send_timeout(frame, timeout) {
            Ok(()) => Ok(PushOutcome::Accepted),
            Err(SendTimeoutError::Timeout(frame)) => Ok(PushOutcome::Full(frame)),
            Err(SendTimeoutError::Disconnected(_)) => {
                running.input_tx = None;
                let diagnostics = running.reap()?;
                Err(ImgseqError::protocol(format!(
                    "ffmpeg stopped accepting frames: {diagnostics}"
                )))
            }
        }
    }

    fn finish_input(&mut self) -> ImgseqResult<()> {
        self.running()?.input_tx = None;
        Ok(())
    }

    fn poll_output(&mut self, timeout: Duration) -> ImgseqResult<Option<EncoderEvent>> {
        let running = self.running()?;
        if running.ended {
            return Ok(None);
        }
        match running.events_rx.recv_timeout(timeout) {
            Ok(EncoderEvent::End) => {
                running.ended = true;
                let diagnostics = running.reap()?;
                if diagnostics.is_empty() {
                    Ok(Some(EncoderEvent::End))
                } else {
                    Ok(Some(EncoderEvent::Failed(diagnostics)))
                }
            }
            Ok(EncoderEvent::Failed(msg)) => {
                running.ended = true;
                Ok(Some(EncoderEvent::Failed(msg)))
            }
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                running.ended = true;
                Ok(Some(EncoderEvent::Failed(
                    "ffmpeg output reader exited unexpectedly".to_string(),
                )))
            }
        }
    }

    fn shutdown(&mut self) -> ImgseqResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        running.input_tx = None;
        if let Some(child) = running.child.as_mut()
            && matches!(child.try_wait(), Ok(None))
        {
            tracing::debug!("killing ffmpeg");
            let _ = child.kill();
        }
        running.reap()?;
        for handle in [running.writer.take(), running.reader.take()]
            .into_iter()
            .flatten()
        {
            handle
                .join()
                .map_err(|_| ImgseqError::protocol("ffmpeg pipe thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "ffmpeg shutdown failed");
        }
    }
}

impl Running {
    /// Wait for the child and collect its stderr. Empty when it exited cleanly.
    fn reap(&mut self) -> ImgseqResult<String> {
        let Some(mut child) = self.child.take() else {
            return Ok(String::new());
        };
        let status = child
            .wait()
            .map_err(|e| ImgseqError::io("failed to wait for ffmpeg to finish", e))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ImgseqError::protocol("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| ImgseqError::io("ffmpeg stderr read failed", e))?,
            None => Vec::new(),
        };
        if status.success() {
            return Ok(String::new());
        }
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        tracing::warn!(%status, stderr = %stderr.trim(), "ffmpeg exited with failure");
        Ok(format!("ffmpeg exited with status {status}: {}", stderr.trim()))
    }
}

fn spawn_named<T: Send + 'static>(
    name: &str,
    f: impl FnOnce() -> T + Send + 'static,
) -> ImgseqResult<JoinHandle<T>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| ImgseqError::io(format!("failed to spawn thread '{name}'"), e))
}

/// Writer thread body. Each surface returns to its pool as soon as it has been written.
fn write_frames(mut stdin: ChildStdin, frames: Receiver<PooledSurface>) {
    let mut written = 0u64;
    for frame in frames {
        if let Err(e) = stdin.write_all(frame.as_bytes()) {
            tracing::debug!(error = %e, written, "ffmpeg stdin closed");
            return;
        }
        written += 1;
    }
    tracing::trace!(written, "ffmpeg input drained");
}

/// Reader thread body. Access units start at each AUD NAL.
fn read_access_units(mut stdout: ChildStdout, events: Sender<EncoderEvent>) {
    let mut splitter = AccessUnitSplitter::default();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                for unit in splitter.push(&chunk[..n]) {
                    if events.send(EncoderEvent::Packet(unit)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = events.send(EncoderEvent::Failed(format!(
                    "failed to read ffmpeg output: {e}"
                )));
                return;
            }
        }
    }
    if let Some(unit) = splitter.finish() {
        let _ = events.send(EncoderEvent::Packet(unit));
    }
    let _ = events.send(EncoderEvent::End);
}

/// Incremental Annex B splitter cutting before every access-unit delimiter.
#[derive(Default)]
pub(crate) struct AccessUnitSplitter {
    pending: Vec<u8>,
    scan_from: usize,
}

impl AccessUnitSplitter {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some((pos, len)) = find_start_code(&self.pending, self.scan_from) {
            let Some(&header) = self.pending.get(pos + len) else {
                self.scan_from = pos;
                return out;
            };
            if pos > 0 && header & 0x1f == nal_type::AUD {
                let rest = self.pending.split_off(pos);
                out.push(std::mem::replace(&mut self.pending, rest));
                self.scan_from = len;
            } else {
                self.scan_from = pos + len;
            }
        }
        self.scan_from = self.pending.len().saturating_sub(3).max(self.scan_from);
        out
    }

    pub(crate) fn finish(&mut self) -> Option<Vec<u8>> {
        self.scan_from = 0;
        let unit = std::mem::take(&mut self.pending);
        (!unit.is_empty()).then_some(unit)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
