use sfi_decoder_rs::*;

#[test]
fn json_config_selects_mode() {
    let code = [0x40, 0xc3];
    let seg = CodeSegment::new(&code, 0).expect("segment");

    let config = DecoderConfig::from_json(r#"{"mode":"bits32"}"#).expect("config");
    let names: Vec<_> = InstIter::new(seg, config)
        .expect("iter")
        .map(|inst| inst.expect("valid").name())
        .collect();
    assert_eq!(names, ["inc", "ret"]);

    let config = DecoderConfig::from_json(r#"{"mode":"bits64"}"#).expect("config");
    let inst = Decoder::new(seg, config).expect("decoder").decode_next().expect("rex ret");
    assert_eq!(inst.length(), 2);
}

#[test]
fn json_features_restrict_tables() {
    // pshufb xmm0, xmm1
    let code = [0x66, 0x0f, 0x38, 0x00, 0xc1];
    let seg = CodeSegment::new(&code, 0).expect("segment");

    let full = DecoderConfig::from_json("{}").expect("config");
    assert_eq!(full, DecoderConfig::default());
    assert_eq!(Decoder::new(seg, full).expect("decoder").decode_next().expect("pshufb").length(), 5);

    let config = DecoderConfig::from_json(r#"{"features":"X87 | SSE | SSE2 | SSE3"}"#).expect("config");
    let reject = Decoder::new(seg, config).expect("decoder").decode_next().expect_err("no ssse3");
    assert_eq!(reject.reason, RejectReason::UnsupportedFeature);
}

#[test]
fn config_survives_round_trip() {
    let config = DecoderConfig {
        mode: ExecutionMode::Bits32,
        features: CpuFeatures::X87 | CpuFeatures::MMX | CpuFeatures::CX8,
        bundle_alignment: 16,
    };
    let text = config.to_json().expect("serialize");
    assert!(text.contains("\"bits32\""));
    assert_eq!(DecoderConfig::from_json(&text).expect("parse"), config);
}

#[test]
fn invalid_config_is_refused() {
    let seg = CodeSegment::new(&[0x90], 0).expect("segment");
    let config = DecoderConfig {
        bundle_alignment: 0,
        ..DecoderConfig::default()
    };
    assert!(matches!(Decoder::new(seg, config), Err(DecoderError::ZeroAlignment)));
    assert!(matches!(
        DecoderConfig::from_json("{\"mode\":"),
        Err(DecoderError::Config(_))
    ));
}
