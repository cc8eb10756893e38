use sfi_decoder_rs::*;

fn segment(code: &[u8]) -> CodeSegment<'_> {
    CodeSegment::new(code, 0x40_0000).expect("segment")
}

fn decode(code: &[u8], mode: ExecutionMode) -> std::result::Result<DecodedInstruction, DecodeReject> {
    Decoder::new(segment(code), DecoderConfig::for_mode(mode))
        .expect("decoder")
        .decode_next()
}

#[test]
fn nop_without_prefixes() {
    let inst = decode(&[0x90], ExecutionMode::Bits64).expect("nop");
    assert_eq!(inst.length(), 1);
    assert_eq!(inst.modrm, None);
    assert_eq!(inst.sib, None);
    assert_eq!(inst.num_disp_bytes, 0);
    assert_eq!(inst.num_imm_bytes, 0);
    assert_eq!(inst.address, 0x40_0000);
}

#[test]
fn two_byte_nop_with_operand_override() {
    for mode in [ExecutionMode::Bits32, ExecutionMode::Bits64] {
        let inst = decode(&[0x66, 0x0f, 0x1f, 0x00], mode).expect("nopw");
        assert_eq!(inst.name(), "nop");
        assert_eq!(inst.operand_size, 2, "{mode:?}");
        assert_eq!(inst.modrm, Some(0x00));
        assert_eq!(inst.num_disp_bytes, 0);
        assert_eq!(inst.length(), 4);
    }
}

#[test]
fn modrm_opcode_at_segment_end_rejects() {
    let code = [0x90, 0x01];
    let mut decoder = Decoder::new(segment(&code), DecoderConfig::default()).expect("decoder");
    decoder.decode_next().expect("nop");
    let reject = decoder.decode_next().expect_err("add without modrm");
    assert_eq!(reject.reason, RejectReason::Truncated);
    assert_eq!(reject.offset, 1);
    assert_eq!(reject.address, 0x40_0001);
    // The decoder stays put on the rejected position.
    assert_eq!(decoder.offset(), 1);
}

#[test]
fn lock_on_register_form_rejects() {
    let reject = decode(&[0xf0, 0x01, 0xc0], ExecutionMode::Bits64).expect_err("lock add eax, eax");
    assert_eq!(reject.reason, RejectReason::IllegalLock);
    let inst = decode(&[0xf0, 0x01, 0x00], ExecutionMode::Bits64).expect("lock add [rax], eax");
    assert!(inst.has_prefix(prefix::PrefixMask::LOCK));
}

#[test]
fn iterator_walks_a_function() {
    // push rbp; mov rbp, rsp; sub rsp, 0x10; mov eax, [rbp-4]; leave; ret
    let code = [
        0x55, 0x48, 0x89, 0xe5, 0x48, 0x83, 0xec, 0x10, 0x8b, 0x45, 0xfc, 0xc9, 0xc3,
    ];
    let lengths: Vec<usize> = InstIter::new(segment(&code), DecoderConfig::default())
        .expect("iter")
        .map(|inst| inst.expect("valid").length())
        .collect();
    assert_eq!(lengths, [1, 3, 4, 3, 1, 1]);
    assert_eq!(lengths.iter().sum::<usize>(), code.len());
}

#[test]
fn inc_dec_only_in_32_bit_mode() {
    let inst = decode(&[0x40], ExecutionMode::Bits32).expect("inc eax");
    assert_eq!(inst.name(), "inc");
    // In 64-bit mode 0x40 is a REX prefix and needs a following opcode.
    let inst = decode(&[0x40, 0x90], ExecutionMode::Bits64).expect("rex nop");
    assert_eq!(inst.length(), 2);
}

#[test]
fn disabled_feature_rejects() {
    let code = [0x0f, 0xa2];
    let config = DecoderConfig::default();
    assert_eq!(
        Decoder::new(segment(&code), config).expect("decoder").decode_next().expect("cpuid").name(),
        "cpuid"
    );
    let code = [0x0f, 0x31];
    let config = DecoderConfig::default().with_features(CpuFeatures::all() - CpuFeatures::TSC);
    let reject = Decoder::new(segment(&code), config)
        .expect("decoder")
        .decode_next()
        .expect_err("rdtsc disabled");
    assert_eq!(reject.reason, RejectReason::UnsupportedFeature);
}

#[test]
fn rejection_converts_into_decoder_error() {
    fn first(code: &[u8]) -> Result<usize> {
        let mut decoder = Decoder::new(segment(code), DecoderConfig::default())?;
        Ok(decoder.decode_next()?.length())
    }
    assert_eq!(first(&[0xc3]).expect("ret"), 1);
    let err = first(&[0x0f, 0x04]).expect_err("invalid");
    assert!(matches!(err, DecoderError::Reject(DecodeReject { reason: RejectReason::UnknownOpcode, .. })));
}

#[test]
fn trimmed_segment_still_decodes() {
    let mut code = vec![0x55, 0x5d, 0xc3];
    code.resize(4096, halt_trim::HALT_OPCODE);
    let mut seg = CodeSegment::new(&code, 0x1_0000).expect("segment");
    let mut vlimit = seg.limit();
    let size = trim_segment(&mut seg, &mut vlimit, 32).expect("trim");
    assert_eq!(size, 32);
    assert_eq!(vlimit, 0x1_0020);
    let count = InstIter::new(seg, DecoderConfig::default())
        .expect("iter")
        .map(|inst| inst.expect("valid"))
        .count();
    assert_eq!(count, 3 + 29);
}
