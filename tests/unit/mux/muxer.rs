use super::*;
use crate::encode::access_unit::AccessUnitFlags;
use crate::foundation::error::ErrorKind;

fn params() -> CodecParameters {
    CodecParameters::from_parameter_sets(
        vec![0x67, 0x4D, 0x40, 0x1E, 0xF4, 0x4B, 0x20],
        vec![0x68, 0xEE, 0x3C, 0x80],
    )
    .unwrap()
}

fn track() -> TrackConfig {
    TrackConfig {
        params: params(),
        frame_duration_us: 33_333,
    }
}

fn picture(pts: u64, key: bool) -> AccessUnit {
    let mut data = Vec::new();
    h264::push_annexb(&mut data, &[0x09, 0xF0]);
    h264::push_annexb(&mut data, &[if key { 0x65 } else { 0x41 }, 0x88, 0x84, 0x21]);
    AccessUnit {
        data,
        pts: Timestamp(pts),
        flags: if key {
            AccessUnitFlags::KEY_FRAME
        } else {
            AccessUnitFlags::empty()
        },
    }
}

fn started(path: &Path) -> (Mp4Muxer, TrackIndex) {
    let mut m = Mp4Muxer::open(path, ContainerFormat::Mp4).unwrap();
    let t = m.add_track(track()).unwrap();
    m.start().unwrap();
    (m, t)
}

fn top_level_boxes(buf: &[u8]) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let mut size = u64::from(u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()));
        let ty = String::from_utf8_lossy(&buf[pos + 4..pos + 8]).into_owned();
        if size == 1 {
            size = u64::from_be_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
        }
        out.push((ty, size));
        if size == 0 {
            break;
        }
        pos += size as usize;
    }
    out
}

#[test]
fn open_writes_header_and_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    std::fs::write(&path, vec![0xAB; 1000]).unwrap();

    let m = Mp4Muxer::open(&path, ContainerFormat::Mp4).unwrap();
    assert_eq!(m.path(), path.as_path());
    assert!(!m.is_started());
    drop(m);
    assert!(!path.exists());
}

#[test]
fn finalized_file_has_ftyp_mdat_moov() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let (mut m, t) = started(&path);
    m.write_sample(t, &picture(0, true)).unwrap();
    m.write_sample(t, &picture(33_333, false)).unwrap();
    m.write_sample(t, &picture(66_666, false)).unwrap();
    m.finalize().unwrap();

    assert!(m.is_finalized());
    assert_eq!(m.sample_count(), 3);
    assert_eq!(m.bytes_written(), 3 * 8);
    assert_eq!(m.duration_us(), 99_999);
    drop(m);

    let buf = std::fs::read(&path).unwrap();
    let boxes = top_level_boxes(&buf);
    let names: Vec<&str> = boxes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["ftyp", "mdat", "moov"]);
    assert_eq!(boxes[1].1, 16 + 24);
    let total: u64 = boxes.iter().map(|(_, s)| *s).sum();
    assert_eq!(total, buf.len() as u64);

    // First sample: 4-byte length then the IDR slice, no delimiter.
    let mdat = 32 + 16;
    assert_eq!(&buf[mdat..mdat + 8], &[0, 0, 0, 4, 0x65, 0x88, 0x84, 0x21]);
}

#[test]
fn write_before_start_fails_without_touching_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let mut m = Mp4Muxer::open(&path, ContainerFormat::Mp4).unwrap();
    let t = m.add_track(track()).unwrap();

    let err = m.write_sample(t, &picture(0, true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(m.sample_count(), 0);

    m.start().unwrap();
    m.write_sample(t, &picture(0, true)).unwrap();
    m.finalize().unwrap();
}

#[test]
fn write_after_finalize_fails_and_file_is_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let (mut m, t) = started(&path);
    m.write_sample(t, &picture(0, true)).unwrap();
    m.finalize().unwrap();
    let before = std::fs::read(&path).unwrap();

    let err = m.write_sample(t, &picture(33_333, false)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(m.finalize().is_err());
    drop(m);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn track_rules() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = Mp4Muxer::open(dir.path().join("a.mp4"), ContainerFormat::Mp4).unwrap();
    assert_eq!(m.start().unwrap_err().kind(), ErrorKind::ProtocolViolation);
    let t = m.add_track(track()).unwrap();
    assert_eq!(
        m.add_track(track()).unwrap_err().kind(),
        ErrorKind::ProtocolViolation
    );
    m.start().unwrap();
    assert_eq!(
        m.write_sample(TrackIndex(t.0 + 1), &picture(0, true))
            .unwrap_err()
            .kind(),
        ErrorKind::ProtocolViolation
    );
}

#[test]
fn non_increasing_timestamps_and_config_units_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut m, t) = started(&dir.path().join("a.mp4"));
    m.write_sample(t, &picture(100, true)).unwrap();
    assert!(m.write_sample(t, &picture(100, false)).is_err());
    assert!(m.write_sample(t, &picture(50, false)).is_err());

    let mut config = picture(200, false);
    config.flags = AccessUnitFlags::CODEC_CONFIG;
    assert!(m.write_sample(t, &config).is_err());
    assert_eq!(m.sample_count(), 1);
}

#[test]
fn finalize_requires_samples() {
    let dir = tempfile::tempdir().unwrap();
    let (mut m, _) = started(&dir.path().join("a.mp4"));
    assert_eq!(m.finalize().unwrap_err().kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn abort_removes_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.mp4");
    let (mut m, t) = started(&path);
    m.write_sample(t, &picture(0, true)).unwrap();
    assert!(path.exists());
    m.abort().unwrap();
    assert!(!path.exists());
    m.abort().unwrap();
    assert!(m.write_sample(t, &picture(1, false)).is_err());
}

#[test]
fn zero_frame_duration_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = Mp4Muxer::open(dir.path().join("a.mp4"), ContainerFormat::Mp4).unwrap();
    let err = m
        .add_track(TrackConfig {
            params: params(),
            frame_duration_us: 0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[test]
fn sample_durations_follow_timestamp_gaps() {
    let records: Vec<SampleRecord> = [0u64, 10, 30]
        .iter()
        .map(|&pts| SampleRecord {
            offset: 0,
            size: 1,
            pts: Timestamp(pts),
            is_sync: false,
        })
        .collect();
    let table = sample_table(&records, 7).unwrap();
    let durations: Vec<u32> = table.iter().map(|s| s.duration).collect();
    assert_eq!(durations, vec![10, 20, 7]);
}
