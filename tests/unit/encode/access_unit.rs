use super::*;

#[test]
fn only_picture_units_are_samples() {
    let picture = AccessUnit {
        data: vec![0, 0, 0, 1, 0x65, 0x88],
        pts: Timestamp(0),
        flags: AccessUnitFlags::KEY_FRAME,
    };
    assert!(picture.is_sample());
    assert!(picture.is_key_frame());
    assert_eq!(picture.size(), 6);

    let config = AccessUnit {
        flags: AccessUnitFlags::CODEC_CONFIG,
        ..picture.clone()
    };
    assert!(!config.is_sample());

    let eos = AccessUnit::end_of_stream(Timestamp(66_666));
    assert!(eos.is_end_of_stream());
    assert!(!eos.is_sample());
    assert_eq!(eos.size(), 0);
}
