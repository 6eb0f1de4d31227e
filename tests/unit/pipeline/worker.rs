use super::*;
use crate::composite::surface::PooledSurface;
use crate::encode::backend::{EncoderConfig, EncoderEvent, PushOutcome, VideoEncoder};
use crate::encode::h264::push_annexb;
use std::collections::VecDeque;
use std::path::Path;

/// Emits one 32x32 access unit per frame, sleeping `delay` on every push.
#[derive(Default)]
struct SlowEncoder {
    delay: Duration,
    frames: u64,
    events: VecDeque<EncoderEvent>,
}

impl VideoEncoder for SlowEncoder {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn probe(&mut self, cfg: &EncoderConfig) -> ImgseqResult<()> {
        cfg.validate()
    }

    fn start(&mut self, _cfg: &EncoderConfig) -> ImgseqResult<()> {
        Ok(())
    }

    fn push_frame(
        &mut self,
        frame: PooledSurface,
        _timeout: Duration,
    ) -> ImgseqResult<PushOutcome> {
        drop(frame);
        std::thread::sleep(self.delay);
        let mut au = Vec::new();
        if self.frames == 0 {
            push_annexb(&mut au, &[0x67, 0x4D, 0x40, 0x1E, 0xF4, 0x4B, 0x20]);
            push_annexb(&mut au, &[0x68, 0xEE, 0x3C, 0x80]);
            push_annexb(&mut au, &[0x65, 0x88, 0x84]);
        } else {
            push_annexb(&mut au, &[0x41, 0x9A, 0x81]);
        }
        self.frames += 1;
        self.events.push_back(EncoderEvent::Packet(au));
        Ok(PushOutcome::Accepted)
    }

    fn finish_input(&mut self) -> ImgseqResult<()> {
        self.events.push_back(EncoderEvent::End);
        Ok(())
    }

    fn poll_output(&mut self, _timeout: Duration) -> ImgseqResult<Option<EncoderEvent>> {
        Ok(self.events.pop_front())
    }

    fn shutdown(&mut self) -> ImgseqResult<()> {
        Ok(())
    }
}

fn slow_pipeline(delay: Duration) -> Pipeline {
    Pipeline::with_encoder(move |_| {
        Box::new(SlowEncoder {
            delay,
            ..SlowEncoder::default()
        })
    })
}

fn setup(dir: &Path, count: usize) -> EncodeSession {
    let input = dir.join("in");
    std::fs::create_dir(&input).unwrap();
    for i in 0..count {
        image::RgbaImage::from_pixel(32, 32, image::Rgba([9, 9, 9, 255]))
            .save(input.join(format!("{i:03}.png")))
            .unwrap();
    }
    let mut s = EncodeSession::new(input, dir.join("out.mp4"), 25, 32, 32);
    s.poll_interval = Duration::from_millis(1);
    s
}

#[test]
fn job_delivers_the_output_path() {
    let tmp = tempfile::tempdir().unwrap();
    let s = setup(tmp.path(), 4);
    let job = spawn_with(slow_pipeline(Duration::ZERO), s.clone()).unwrap();
    let path = job.wait().unwrap();
    assert!(path.is_file());
    assert!(path.ends_with("out.mp4"));
}

#[test]
fn cancel_stops_a_running_job() {
    let tmp = tempfile::tempdir().unwrap();
    let s = setup(tmp.path(), 60);
    let job = spawn_with(slow_pipeline(Duration::from_millis(20)), s.clone()).unwrap();
    job.cancel();
    let err = job.wait().unwrap_err();
    assert!(matches!(err, ImgseqError::Cancelled));
    assert!(!s.output.exists());
}

#[test]
fn wait_timeout_hands_back_a_running_job() {
    let tmp = tempfile::tempdir().unwrap();
    let s = setup(tmp.path(), 30);
    let job = spawn_with(slow_pipeline(Duration::from_millis(10)), s).unwrap();
    let job = match job.wait_timeout(Duration::from_millis(1)) {
        Err(job) => job,
        Ok(result) => panic!("job finished too early: {result:?}"),
    };
    assert!(!job.is_finished());
    let result = job
        .wait_timeout(Duration::from_secs(30))
        .unwrap_or_else(|_| panic!("job did not finish"));
    assert!(result.is_ok());
}

#[test]
fn dropping_a_job_cancels_it() {
    let tmp = tempfile::tempdir().unwrap();
    let s = setup(tmp.path(), 60);
    let job = spawn_with(slow_pipeline(Duration::from_millis(20)), s.clone()).unwrap();
    let token = job.cancel_token();
    drop(job);
    assert!(token.is_cancelled());
    assert!(!s.output.exists());
}
