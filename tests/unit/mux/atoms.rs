use super::*;
use std::io::Cursor;

#[test]
fn full_box_header_packs_version_and_flags() {
    let mut buf = Vec::new();
    write_full_box_header(&mut buf, b"tkhd", 92, 1, 0x000003).unwrap();
    assert_eq!(buf, vec![0, 0, 0, 92, b't', b'k', b'h', b'd', 1, 0, 0, 3]);
}

#[test]
fn nested_boxes_get_patched_sizes() {
    let mut cur = Cursor::new(Vec::new());
    let outer = begin_box(&mut cur, b"moov").unwrap();
    let inner = begin_box(&mut cur, b"trak").unwrap();
    cur.write_all(&[0xAA; 5]).unwrap();
    end_box(&mut cur, inner).unwrap();
    end_box(&mut cur, outer).unwrap();

    let buf = cur.into_inner();
    assert_eq!(buf.len(), 21);
    assert_eq!(&buf[0..8], &[0, 0, 0, 21, b'm', b'o', b'o', b'v']);
    assert_eq!(&buf[8..16], &[0, 0, 0, 13, b't', b'r', b'a', b'k']);
}

#[test]
fn large_box_size_counts_whole_box() {
    let mut cur = Cursor::new(Vec::new());
    cur.write_all(&[0x11; 4]).unwrap();
    let pos = large_box_size_placeholder(&mut cur, b"mdat").unwrap();
    assert_eq!(pos, 12);
    cur.write_all(&[0xBB; 32]).unwrap();
    fill_large_box_size(&mut cur, pos).unwrap();

    let buf = cur.into_inner();
    assert_eq!(&buf[4..12], &[0, 0, 0, 1, b'm', b'd', b'a', b't']);
    assert_eq!(u64::from_be_bytes(buf[12..20].try_into().unwrap()), 48);
    assert_eq!(buf.len(), 52);
}

#[test]
fn language_und_packs_to_known_value() {
    assert_eq!(encode_language(b"und"), 0x55C4);
}

#[test]
fn version_switches_at_32_bits() {
    assert_eq!(version_for(&[0, u64::from(u32::MAX)]), 0);
    assert_eq!(version_for(&[u64::from(u32::MAX) + 1]), 1);

    let mut buf = Vec::new();
    write_time(&mut buf, 0, 7).unwrap();
    write_time(&mut buf, 1, 7).unwrap();
    assert_eq!(buf.len(), 12);
}

#[test]
fn zeros_span_multiple_chunks() {
    let mut buf = Vec::new();
    write_zeros(&mut buf, 130).unwrap();
    assert_eq!(buf, vec![0; 130]);
}
