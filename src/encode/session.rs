use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::composite::surface::PooledSurface;
use crate::encode::access_unit::{AccessUnit, AccessUnitFlags};
use crate::encode::backend::{EncoderConfig, EncoderEvent, PushOutcome, VideoEncoder};
use crate::encode::h264::{self, CodecParameters};
use crate::foundation::core::Timestamp;
use crate::foundation::error::{ImgseqError, ImgseqResult};

/// Lifecycle of an [`EncoderSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Running,
    /// End of stream signalled; output still flowing.
    Draining,
    Completed,
    Failed,
    Released,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Released)
    }
}

/// Default wait between retries when the encoder input queue is full.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default time without progress after which the encoder is considered stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one encoder backend through configure / start / submit / drain / end-of-stream.
///
/// The session owns timestamp assignment: backends emit bare access units in presentation order
/// (no B-frames), and each picture takes the oldest pending submitted timestamp. Parameter sets
/// are split out of the bitstream into `CODEC_CONFIG` units and negotiated exactly once.
pub struct EncoderSession {
    backend: Box<dyn VideoEncoder>,
    state: SessionState,
    config: Option<EncoderConfig>,
    poll_interval: Duration,
    stall_timeout: Duration,
    pending_pts: VecDeque<Timestamp>,
    last_pts: Option<Timestamp>,
    params: Option<CodecParameters>,
    submitted: u64,
    emitted: u64,
}

impl EncoderSession {
    pub fn new(backend: Box<dyn VideoEncoder>) -> Self {
        Self {
            backend,
            state: SessionState::Unconfigured,
            config: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            pending_pts: VecDeque::new(),
            last_pts: None,
            params: None,
            submitted: 0,
            emitted: 0,
        }
    }

    pub fn with_timeouts(mut self, poll_interval: Duration, stall_timeout: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Negotiated output format, once the encoder has produced its parameter sets.
    pub fn track_parameters(&self) -> Option<&CodecParameters> {
        self.params.as_ref()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn configure(&mut self, cfg: EncoderConfig) -> ImgseqResult<()> {
        self.expect_state(SessionState::Unconfigured, "configure")?;
        if let Err(e) = self.backend.probe(&cfg) {
            return Err(self.fail(e));
        }
        tracing::debug!(
            backend = self.backend.name(),
            width = cfg.width,
            height = cfg.height,
            fps = cfg.fps.get(),
            bitrate = cfg.bitrate,
            "encoder configured"
        );
        self.config = Some(cfg);
        self.state = SessionState::Configured;
        Ok(())
    }

    pub fn start(&mut self) -> ImgseqResult<()> {
        self.expect_state(SessionState::Configured, "start")?;
        let cfg = self
            .config
            .clone()
            .ok_or_else(|| ImgseqError::protocol("encoder configuration missing"))?;
        if let Err(e) = self.backend.start(&cfg) {
            return Err(self.fail(e));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Hand a composited surface to the encoder. Blocks while the input queue is full.
    pub fn submit(&mut self, frame: PooledSurface, pts: Timestamp) -> ImgseqResult<()> {
        self.expect_state(SessionState::Running, "submit")?;
        if let Some(last) = self.last_pts
            && pts <= last
        {
            return Err(self.fail(ImgseqError::protocol(format!(
                "presentation time {}us is not after previous {}us",
                pts.as_micros(),
                last.as_micros()
            ))));
        }
        if let Some(cfg) = &self.config
            && frame.desc() != cfg.surface_desc()
        {
            return Err(self.fail(ImgseqError::protocol(format!(
                "surface {:?} does not match encoder input {:?}",
                frame.desc(),
                cfg.surface_desc()
            ))));
        }

        let started = Instant::now();
        let mut frame = frame;
        loop {
            match self.backend.push_frame(frame, self.poll_interval) {
                Ok(PushOutcome::Accepted) => break,
                Ok(PushOutcome::Full(back)) => {
                    if started.elapsed() >= self.stall_timeout {
                        return Err(self.fail(ImgseqError::protocol(format!(
                            "encoder stalled: input queue stayed full for {:?}",
                            self.stall_timeout
                        ))));
                    }
                    tracing::trace!(pts = pts.as_micros(), "encoder input full; waiting");
                    frame = back;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.pending_pts.push_back(pts);
        self.last_pts = Some(pts);
        self.submitted += 1;
        Ok(())
    }

    /// Close the encoder input. Output keeps flowing until an `END_OF_STREAM` unit is drained.
    pub fn signal_end_of_stream(&mut self) -> ImgseqResult<()> {
        self.expect_state(SessionState::Running, "signal_end_of_stream")?;
        if let Err(e) = self.backend.finish_input() {
            return Err(self.fail(e));
        }
        tracing::debug!(submitted = self.submitted, "end of stream signalled");
        self.state = SessionState::Draining;
        Ok(())
    }

    /// Collect the output that becomes available within `timeout`; empty if none did.
    pub fn drain_output(&mut self, timeout: Duration) -> ImgseqResult<Vec<AccessUnit>> {
        match self.state {
            SessionState::Running | SessionState::Draining => {}
            SessionState::Completed => return Ok(Vec::new()),
            other => {
                return Err(ImgseqError::protocol(format!(
                    "drain_output called in state {other:?}"
                )));
            }
        }

        let mut out = Vec::new();
        let mut wait = timeout;
        while !self.is_complete() {
            let event = match self.backend.poll_output(wait) {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };
            wait = Duration::ZERO;
            if let Err(e) = self.handle_event(event, &mut out) {
                return Err(self.fail(e));
            }
        }
        Ok(out)
    }

    /// Stop the backend. Safe to call any number of times, in any state.
    pub fn release(&mut self) -> ImgseqResult<()> {
        if self.state == SessionState::Released {
            return Ok(());
        }
        self.state = SessionState::Released;
        self.pending_pts.clear();
        self.backend.shutdown()
    }

    fn handle_event(&mut self, event: EncoderEvent, out: &mut Vec<AccessUnit>) -> ImgseqResult<()> {
        match event {
            EncoderEvent::Packet(data) => self.handle_packet(&data, out),
            EncoderEvent::End => {
                if self.state != SessionState::Draining {
                    return Err(ImgseqError::protocol(
                        "encoder ended before end of stream was signalled",
                    ));
                }
                if self.emitted != self.submitted {
                    return Err(ImgseqError::protocol(format!(
                        "encoder produced {} frames for {} submitted",
                        self.emitted, self.submitted
                    )));
                }
                self.state = SessionState::Completed;
                out.push(AccessUnit::end_of_stream(
                    self.last_pts.unwrap_or(Timestamp::ZERO),
                ));
                Ok(())
            }
            EncoderEvent::Failed(msg) => Err(ImgseqError::protocol(format!(
                "encoder backend failed: {msg}"
            ))),
        }
    }

    fn handle_packet(&mut self, data: &[u8], out: &mut Vec<AccessUnit>) -> ImgseqResult<()> {
        let split = h264::split_access_unit(data);

        if split.sps.is_some() || split.pps.is_some() {
            let next_pts = self.pending_pts.front().copied().unwrap_or(Timestamp::ZERO);
            if let Some(unit) = self.negotiate(split.sps, split.pps, next_pts)? {
                out.push(unit);
            }
        }

        if !split.has_slice {
            if !split.picture.is_empty() {
                tracing::trace!(bytes = split.picture.len(), "dropping non-picture NAL units");
            }
            return Ok(());
        }
        if self.params.is_none() {
            return Err(ImgseqError::protocol(
                "encoder produced picture data before its parameter sets",
            ));
        }
        let pts = self.pending_pts.pop_front().ok_or_else(|| {
            ImgseqError::protocol("encoder produced more frames than were submitted")
        })?;
        self.emitted += 1;

        let mut flags = AccessUnitFlags::empty();
        if split.key_frame {
            flags |= AccessUnitFlags::KEY_FRAME;
        }
        out.push(AccessUnit {
            data: split.picture,
            pts,
            flags,
        });
        Ok(())
    }

    /// Record the first parameter sets as the output format. Identical repeats are ignored;
    /// anything else is a mid-stream format change.
    fn negotiate(
        &mut self,
        sps: Option<Vec<u8>>,
        pps: Option<Vec<u8>>,
        pts: Timestamp,
    ) -> ImgseqResult<Option<AccessUnit>> {
        if let Some(current) = &self.params {
            let same_sps = sps.as_ref().is_none_or(|s| *s == current.sps);
            let same_pps = pps.as_ref().is_none_or(|p| *p == current.pps);
            if same_sps && same_pps {
                return Ok(None);
            }
            return Err(ImgseqError::protocol(
                "encoder output format changed mid-stream",
            ));
        }

        let (Some(sps), Some(pps)) = (sps, pps) else {
            return Err(ImgseqError::protocol(
                "encoder emitted an incomplete SPS/PPS pair",
            ));
        };
        let params = CodecParameters::from_parameter_sets(sps, pps)?;
        if let Some(cfg) = &self.config
            && (params.width, params.height) != (cfg.width, cfg.height)
        {
            return Err(ImgseqError::protocol(format!(
                "encoder negotiated {}x{}, expected {}x{}",
                params.width, params.height, cfg.width, cfg.height
            )));
        }
        tracing::info!(
            width = params.width,
            height = params.height,
            profile = params.profile_idc,
            level = params.level_idc,
            "encoder output format negotiated"
        );

        let mut data = Vec::with_capacity(params.sps.len() + params.pps.len() + 8);
        h264::push_annexb(&mut data, &params.sps);
        h264::push_annexb(&mut data, &params.pps);
        self.params = Some(params);
        Ok(Some(AccessUnit {
            data,
            pts,
            flags: AccessUnitFlags::CODEC_CONFIG,
        }))
    }

    fn expect_state(&self, want: SessionState, op: &str) -> ImgseqResult<()> {
        if self.state == want {
            return Ok(());
        }
        Err(ImgseqError::protocol(format!(
            "{op} called in state {:?} (expected {want:?})",
            self.state
        )))
    }

    fn fail(&mut self, err: ImgseqError) -> ImgseqError {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
        tracing::debug!(error = %err, "encoder session failed");
        err
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "encoder release failed");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/session.rs"]
mod tests;
