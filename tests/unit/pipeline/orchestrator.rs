use super::*;
use crate::composite::surface::PooledSurface;
use crate::encode::backend::{EncoderEvent, PushOutcome};
use crate::encode::h264::push_annexb;
use crate::foundation::error::ErrorKind;
use std::collections::VecDeque;
use std::path::Path;

const SPS_32X32: [u8; 7] = [0x67, 0x4D, 0x40, 0x1E, 0xF4, 0x4B, 0x20];
const PPS: [u8; 4] = [0x68, 0xEE, 0x3C, 0x80];

#[derive(Default)]
struct FakeEncoder {
    frames: u64,
    events: VecDeque<EncoderEvent>,
    fail_at: Option<u64>,
    cancel_at: Option<(u64, CancelToken)>,
}

impl VideoEncoder for FakeEncoder {
    fn name(&self) -> &'static str {
        "fake"
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
        if let Some((at, token)) = &self.cancel_at
            && *at == self.frames
        {
            token.cancel();
        }
        if self.fail_at == Some(self.frames) {
            self.events
                .push_back(EncoderEvent::Failed("x264 exploded".to_string()));
            self.frames += 1;
            return Ok(PushOutcome::Accepted);
        }
        let mut au = Vec::new();
        push_annexb(&mut au, &[0x09, 0xF0]);
        if self.frames == 0 {
            push_annexb(&mut au, &SPS_32X32);
            push_annexb(&mut au, &PPS);
            push_annexb(&mut au, &[0x65, 0x88, 0x84]);
        } else {
            push_annexb(&mut au, &[0x41, 0x9A, 0x80 | (self.frames as u8 & 0x7F)]);
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

fn fake_pipeline() -> Pipeline {
    Pipeline::with_encoder(|_| Box::new(FakeEncoder::default()))
}

fn write_frames(dir: &Path, count: usize) {
    for i in 0..count {
        image::RgbaImage::from_pixel(32, 32, image::Rgba([i as u8 * 10, 40, 200, 255]))
            .save(dir.join(format!("frame-{i:04}.png")))
            .unwrap();
    }
}

fn session(dir: &Path, fps: u32) -> EncodeSession {
    let mut s = EncodeSession::new(dir.join("in"), dir.join("out.mp4"), fps, 32, 32);
    s.stall_timeout = Duration::from_millis(200);
    s.poll_interval = Duration::from_millis(1);
    s
}

fn setup(count: usize) -> (tempfile::TempDir, EncodeSession) {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir(tmp.path().join("in")).unwrap();
    write_frames(&tmp.path().join("in"), count);
    let s = session(tmp.path(), 30);
    (tmp, s)
}

#[test]
fn encodes_every_frame_into_one_sample() {
    let (_tmp, s) = setup(12);
    let (path, stats) = fake_pipeline()
        .run_with_stats(&s, &CancelToken::new())
        .unwrap();

    assert!(path.is_absolute());
    assert!(path.is_file());
    assert_eq!(stats.frames, 12);
    assert_eq!(stats.samples, 12);
    assert_eq!(stats.duration_us, 12 * 33_333);
    assert!(stats.bytes > 0);
    assert!(stats.surfaces.allocated <= s.surface_pool_capacity());

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
    assert!(bytes.windows(4).any(|w| w == b"moov"));
}

#[test]
fn surfaces_are_recycled() {
    let (_tmp, s) = setup(10);
    let (_, stats) = fake_pipeline()
        .run_with_stats(&s, &CancelToken::new())
        .unwrap();
    assert!(stats.surfaces.reused > 0);
}

#[test]
fn replaces_existing_output() {
    let (_tmp, s) = setup(2);
    std::fs::write(&s.output, b"stale").unwrap();
    let path = fake_pipeline().run(&s, &CancelToken::new()).unwrap();
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
}

#[test]
fn images_of_other_sizes_are_fitted() {
    let (tmp, s) = setup(1);
    image::RgbaImage::from_pixel(64, 16, image::Rgba([0, 0, 0, 0]))
        .save(tmp.path().join("in").join("frame-0001.png"))
        .unwrap();
    let (_, stats) = fake_pipeline()
        .run_with_stats(&s, &CancelToken::new())
        .unwrap();
    assert_eq!(stats.samples, 2);
}

#[test]
fn empty_folder_is_configuration_error() {
    let (_tmp, s) = setup(0);
    let err = fake_pipeline().run(&s, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert!(!s.output.exists());
}

#[test]
fn bad_parameters_fail_before_touching_output() {
    let (_tmp, mut s) = setup(2);
    s.fps = 0;
    std::fs::write(&s.output, b"keep").unwrap();
    let err = fake_pipeline().run(&s, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert_eq!(std::fs::read(&s.output).unwrap(), b"keep");
}

#[test]
fn corrupt_image_aborts_and_removes_output() {
    let (tmp, s) = setup(3);
    std::fs::write(tmp.path().join("in").join("frame-0001.png"), b"not a png").unwrap();
    let err = fake_pipeline().run(&s, &CancelToken::new()).unwrap_err();
    match err {
        ImgseqError::Decode { path, .. } => assert!(path.ends_with("frame-0001.png")),
        other => panic!("expected decode error, got {other:?}"),
    }
    assert!(!s.output.exists());
}

#[test]
fn encoder_failure_is_protocol_violation() {
    let (_tmp, s) = setup(5);
    let pipeline = Pipeline::with_encoder(|_| {
        Box::new(FakeEncoder {
            fail_at: Some(2),
            ..FakeEncoder::default()
        })
    });
    let err = pipeline.run(&s, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(err.to_string().contains("x264 exploded"));
    assert!(!s.output.exists());
}

#[test]
fn cancelled_before_start() {
    let (_tmp, s) = setup(3);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = fake_pipeline().run(&s, &cancel).unwrap_err();
    assert!(matches!(err, ImgseqError::Cancelled));
    assert!(!s.output.exists());
}

#[test]
fn cancelled_mid_stream_removes_partial_output() {
    let (_tmp, s) = setup(8);
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let pipeline = Pipeline::with_encoder(move |_| {
        Box::new(FakeEncoder {
            cancel_at: Some((3, token.clone())),
            ..FakeEncoder::default()
        })
    });
    let err = pipeline.run(&s, &cancel).unwrap_err();
    assert!(matches!(err, ImgseqError::Cancelled));
    assert!(!s.output.exists());
}

#[test]
fn cancel_token_is_shared_between_clones() {
    let a = CancelToken::new();
    let b = a.clone();
    assert!(!b.is_cancelled());
    a.cancel();
    assert!(b.is_cancelled());
    assert!(matches!(b.check(), Err(ImgseqError::Cancelled)));
}
