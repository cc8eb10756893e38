use proptest::prelude::*;
use sfi_decoder_rs::halt_trim::{HALT_OPCODE, MIN_HALT_KEEP};
use sfi_decoder_rs::instruction::OpcodeMap;
use sfi_decoder_rs::*;

fn modes() -> impl Strategy<Value = ExecutionMode> {
    prop_oneof![Just(ExecutionMode::Bits32), Just(ExecutionMode::Bits64)]
}

/// Code bytes followed by a run of halts
fn halt_padded() -> impl Strategy<Value = (Vec<u8>, u64, u8)> {
    let body = proptest::collection::vec(any::<u8>(), 1..64);
    let halts = 0usize..200;
    let base = 0u64..0x1_0000;
    let alignment = prop_oneof![Just(16u8), Just(32u8), Just(64u8)];
    (body, halts, base, alignment).prop_map(|(mut body, halts, base, alignment)| {
        body.resize(body.len() + halts, HALT_OPCODE);
        (body, base, alignment)
    })
}

/// Long prefix runs followed by arbitrary bytes
fn prefix_heavy() -> impl Strategy<Value = Vec<u8>> {
    let prefix = proptest::sample::select(vec![
        0x26u8, 0x2e, 0x36, 0x3e, 0x64, 0x65, 0x66, 0x67, 0xf0, 0xf2, 0xf3, 0x40, 0x41, 0x44, 0x48, 0x4f,
    ]);
    let prefixes = proptest::collection::vec(prefix, 0..=20);
    let tail = proptest::collection::vec(any::<u8>(), 0..=20);
    (prefixes, tail).prop_map(|(mut bytes, tail)| {
        bytes.extend(tail);
        bytes
    })
}

fn trailing_halts(bytes: &[u8]) -> usize {
    bytes.iter().skip(1).rev().take_while(|&&b| b == HALT_OPCODE).count()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2048,
        .. ProptestConfig::default()
    })]

    #[test]
    fn decoding_is_deterministic(mode in modes(), bytes in proptest::collection::vec(any::<u8>(), 1..=32)) {
        let seg = CodeSegment::new(&bytes, 0x1000).expect("segment");
        let config = DecoderConfig::for_mode(mode);
        let first = Decoder::new(seg, config).expect("decoder").decode_next();
        let second = Decoder::new(seg, config).expect("decoder").decode_next();
        prop_assert_eq!(&first, &second);

        if let Ok(inst) = first {
            prop_assert!(inst.length() >= 1 && inst.length() <= MAX_INSTRUCTION_LENGTH);
            prop_assert!(inst.length() <= bytes.len());
            prop_assert_eq!(inst.bytes.as_slice(), &bytes[..inst.length()]);
        }
    }

    #[test]
    fn iteration_covers_accepted_bytes(mode in modes(), bytes in proptest::collection::vec(any::<u8>(), 0..=64)) {
        let seg = CodeSegment::new(&bytes, 0).expect("segment");
        let mut iter = InstIter::new(seg, DecoderConfig::for_mode(mode)).expect("iter");
        let mut next = 0u64;
        for item in iter.by_ref() {
            match item {
                Ok(inst) => {
                    prop_assert_eq!(inst.address, next);
                    next = inst.next_address();
                }
                Err(reject) => prop_assert_eq!(reject.address, next),
            }
        }
        prop_assert!(next as usize <= bytes.len());
        prop_assert_eq!(iter.offset(), next as usize);
    }

    #[test]
    fn accepted_instructions_fit_the_length_limit(mode in modes(), bytes in prefix_heavy()) {
        let seg = CodeSegment::new(&bytes, 0).expect("segment");
        for inst in InstIter::new(seg, DecoderConfig::for_mode(mode)).expect("iter").flatten() {
            prop_assert!(inst.length() <= MAX_INSTRUCTION_LENGTH);
            prop_assert!(inst.offset + inst.length() <= bytes.len());
        }
    }

    #[test]
    fn peek_zero_fills_past_the_end(bytes in proptest::collection::vec(any::<u8>(), 0..64), extra in 0usize..1000) {
        let cursor = ByteCursor::new(&bytes);
        let n = bytes.len() + extra;
        prop_assert_eq!(cursor.peek(n), 0);
        for (i, &b) in bytes.iter().enumerate() {
            prop_assert_eq!(cursor.peek(i), b);
        }
        prop_assert_eq!(cursor.peek(usize::MAX), 0);
    }

    #[test]
    fn cache_mirrors_cursor_reads(
        bytes in proptest::collection::vec(any::<u8>(), 0..32),
        reads in 0usize..=MAX_INSTRUCTION_LENGTH,
    ) {
        let mut cursor = ByteCursor::new(&bytes);
        let mut cache = InstructionByteCache::new(ByteCursor::new(&bytes));
        let expected: Vec<u8> = (0..reads).map(|_| cursor.read()).collect();
        cache.read_bytes(reads);
        prop_assert_eq!(cache.bytes().as_slice(), expected.as_slice());
        prop_assert_eq!(cache.cursor().read_length(), cursor.read_length());
        prop_assert_eq!(cache.cursor().overflow_count(), reads.saturating_sub(bytes.len()));

        cache.reset();
        prop_assert!(cache.is_empty());
        prop_assert_eq!(cache.cursor().position(), 0);
    }

    #[test]
    fn halt_trim_is_idempotent((bytes, base, alignment) in halt_padded()) {
        let seg = CodeSegment::new(&bytes, base).expect("segment");
        let once = trim_halts(&seg, alignment);
        let trimmed = CodeSegment::new(&bytes[..once], base).expect("segment");
        prop_assert_eq!(trim_halts(&trimmed, alignment), once);
    }

    #[test]
    fn halt_trim_is_safe((bytes, base, alignment) in halt_padded()) {
        let seg = CodeSegment::new(&bytes, base).expect("segment");
        let size = trim_halts(&seg, alignment);
        let halts = trailing_halts(&bytes);
        prop_assert!(size <= bytes.len());
        prop_assert!(size >= bytes.len() - halts + MIN_HALT_KEEP.min(halts));
        if size != bytes.len() {
            prop_assert_eq!((base + size as u64) % u64::from(alignment), 0);
            prop_assert!(bytes[size..].iter().all(|&b| b == HALT_OPCODE));
        }
    }

    #[test]
    fn candidate_selection_terminates(
        mode in modes(),
        map in proptest::sample::select(OpcodeMap::ALL.to_vec()),
        bytes in proptest::collection::vec(any::<u8>(), 1..=3),
    ) {
        let tables = DecodeTables::for_mode(mode);
        if let Some(selection) = tables.select(map, &bytes) {
            prop_assert!(selection.steps <= map.fallback_depth());
            prop_assert!(!selection.candidates.is_empty());
            prop_assert!(selection.length >= 1 && selection.length <= bytes.len());
        }
    }
}

#[test]
fn fallback_steps_show_up_in_decoding() {
    let tables = DecodeTables::for_mode(ExecutionMode::Bits64);
    // (code, opcode bytes, map, fallback steps, name, length)
    let cases: [(&[u8], usize, OpcodeMap, usize, &str, usize); 6] = [
        // x87 memory form: D9 map is empty at 0x00, the byte is reread as ModRM
        (&[0xd9, 0x00], 2, OpcodeMap::PrefixD9, 1, "fld", 2),
        (&[0xd9, 0xe8], 2, OpcodeMap::PrefixD9, 0, "fld1", 2),
        // 66 0F 1F has no mandatory-prefix entry, 66 becomes an operand-size override
        (&[0x66, 0x0f, 0x1f, 0x00], 3, OpcodeMap::Prefix660F, 1, "nop", 4),
        // movbe only exists without 66, so 66 0F 38 F0 falls back to 0F 38
        (&[0x66, 0x0f, 0x38, 0xf0, 0x00], 4, OpcodeMap::Prefix660F38, 1, "movbe", 5),
        (&[0x66, 0x0f, 0x3a, 0x0f, 0xc1, 0x00], 4, OpcodeMap::Prefix660F3A, 0, "palignr", 6),
        (&[0x0f, 0x0b], 2, OpcodeMap::Prefix0F, 0, "ud2", 2),
    ];
    for (code, opcode_len, map, steps, name, length) in cases {
        let selection = tables.select(map, &code[..opcode_len]).expect("selection");
        assert_eq!(selection.steps, steps, "{code:02x?}");
        assert!(selection.steps <= map.fallback_depth());
        let seg = CodeSegment::new(code, 0).expect("segment");
        let inst = Decoder::new(seg, DecoderConfig::default())
            .expect("decoder")
            .decode_next()
            .expect("valid");
        assert_eq!((inst.name(), inst.length()), (name, length), "{code:02x?}");
    }
}
