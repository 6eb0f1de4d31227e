use super::*;

#[test]
fn fps_rejects_zero() {
    assert!(matches!(Fps::new(0), Err(ImgseqError::Configuration(_))));
    assert_eq!(Fps::new(30).unwrap().get(), 30);
}

#[test]
fn fps_deserializes_through_validation() {
    let ok: Fps = serde_json::from_str("24").unwrap();
    assert_eq!(ok.get(), 24);
    assert!(serde_json::from_str::<Fps>("0").is_err());
}

#[test]
fn timeline_is_gapless_and_monotonic() {
    let tl = PresentationTimeline::new(Fps::new(30).unwrap());
    assert_eq!(tl.frame_duration_us(), 33_333);
    assert_eq!(tl.pts(FrameIndex(0)), Timestamp::ZERO);

    let mut prev = None;
    for i in 0..300u64 {
        let pts = tl.pts(FrameIndex(i));
        assert_eq!(pts.as_micros(), i * 33_333);
        if let Some(p) = prev {
            assert!(pts > p);
        }
        prev = Some(pts);
    }
}

#[test]
fn sequence_end_is_within_one_frame_of_nominal() {
    for fps in [1u32, 24, 25, 30, 60, 144] {
        let tl = PresentationTimeline::new(Fps::new(fps).unwrap());
        let frames = 3 * u64::from(fps);
        let nominal = 3_000_000u64;
        let span = tl.pts(FrameIndex(frames)).as_micros();
        assert!(nominal.abs_diff(span) <= tl.frame_duration_us());
    }
}
