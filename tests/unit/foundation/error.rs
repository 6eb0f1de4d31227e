use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        ImgseqError::configuration("x")
            .to_string()
            .contains("configuration error:")
    );
    assert!(
        ImgseqError::decode("a.png", "x")
            .to_string()
            .contains("decode error: 'a.png'")
    );
    assert!(
        ImgseqError::protocol("x")
            .to_string()
            .contains("protocol violation:")
    );
    assert!(ImgseqError::mux("x").to_string().contains("mux error:"));
    assert_eq!(ImgseqError::Cancelled.to_string(), "encode cancelled");
}

#[test]
fn kinds_map_to_stable_strings() {
    let cases = [
        (ImgseqError::configuration("x"), "configuration_error"),
        (ImgseqError::decode("a.png", "x"), "decode_error"),
        (ImgseqError::protocol("x"), "protocol_violation"),
        (ImgseqError::mux("x"), "mux_error"),
        (
            ImgseqError::io("open", std::io::Error::other("boom")),
            "io_error",
        ),
        (ImgseqError::Cancelled, "cancelled"),
        (ImgseqError::Other(anyhow::anyhow!("x")), "internal_error"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.kind().as_str(), expected);
        assert_eq!(
            serde_json::to_value(err.kind()).unwrap(),
            serde_json::Value::String(expected.to_owned())
        );
    }
}

#[test]
fn io_preserves_source() {
    use std::error::Error as _;

    let err = ImgseqError::io(
        "read dir",
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    );
    assert!(err.to_string().contains("read dir"));
    assert!(err.source().unwrap().to_string().contains("gone"));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = ImgseqError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
