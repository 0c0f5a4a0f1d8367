use txsc_lang::emitter::{decode, emit_asm, emit_hex, encode, parse_asm, parse_hex};
use txsc_lang::ir::{script_num_bytes, script_num_from_bytes, OpInstr, Opcode};

fn op(opcode: Opcode) -> OpInstr {
    OpInstr::Op(opcode)
}

#[test]
fn small_integers_use_small_int_opcodes() {
    assert_eq!("OP_0", emit_asm(&[OpInstr::PushInt(0)]));
    assert_eq!("OP_1", emit_asm(&[OpInstr::PushInt(1)]));
    assert_eq!("OP_16", emit_asm(&[OpInstr::PushInt(16)]));
    assert_eq!("OP_1NEGATE", emit_asm(&[OpInstr::PushInt(-1)]));
}

#[test]
fn larger_integers_are_minimally_encoded_pushes() {
    assert_eq!("0x01 11", emit_asm(&[OpInstr::PushInt(17)]));
    assert_eq!("0x02 e803", emit_asm(&[OpInstr::PushInt(1000)]));
    assert_eq!("0x01 85", emit_asm(&[OpInstr::PushInt(-5)]));
    assert_eq!("0x02 8000", emit_asm(&[OpInstr::PushInt(128)]));
}

#[test]
fn byte_pushes_render_with_length_prefix() {
    assert_eq!("0x02 1122", emit_asm(&[OpInstr::PushBytes(vec![0x11, 0x22])]));
}

#[test]
fn byte_strings_that_encode_small_ints_are_minimized() {
    assert_eq!("OP_0", emit_asm(&[OpInstr::PushBytes(Vec::new())]));
    assert_eq!("OP_5", emit_asm(&[OpInstr::PushBytes(vec![0x05])]));
    assert_eq!("OP_1NEGATE", emit_asm(&[OpInstr::PushBytes(vec![0x81])]));
    assert_eq!("0x01 11", emit_asm(&[OpInstr::PushBytes(vec![0x11])]));
}

#[test]
fn large_pushes_use_pushdata() {
    let bytes = vec![0xab; 80];
    let asm = emit_asm(&[OpInstr::PushBytes(bytes.clone())]);
    assert!(asm.starts_with("OP_PUSHDATA1 0x50 "), "asm: {asm}");

    let encoded = encode(&[OpInstr::PushBytes(bytes)]);
    assert_eq!(0x4c, encoded[0]);
    assert_eq!(0x50, encoded[1]);
    assert_eq!(82, encoded.len());
}

#[test]
fn opcodes_encode_to_their_bytes() {
    let ops = vec![op(Opcode::Dup), op(Opcode::Hash160), op(Opcode::EqualVerify), op(Opcode::CheckSig)];
    assert_eq!("76a988ac", emit_hex(&ops));
}

#[test]
fn p2pkh_hex_encoding() {
    let hash = vec![0x10; 20];
    let ops = vec![
        op(Opcode::Dup),
        op(Opcode::Hash160),
        OpInstr::PushBytes(hash),
        op(Opcode::EqualVerify),
        op(Opcode::CheckSig),
    ];
    assert_eq!("76a9141010101010101010101010101010101010101010" .to_string() + "88ac", emit_hex(&ops));
}

#[test]
fn integer_pushes_encode_minimally() {
    assert_eq!(vec![0x02, 0xe8, 0x03], encode(&[OpInstr::PushInt(1000)]));
    assert_eq!(vec![0x54], encode(&[OpInstr::PushInt(4)]));
    assert_eq!(vec![0x00], encode(&[OpInstr::PushInt(0)]));
    assert_eq!(vec![0x4f], encode(&[OpInstr::PushInt(-1)]));
}

#[test]
fn asm_round_trip_preserves_the_ir() {
    let ops = vec![
        op(Opcode::Dup),
        op(Opcode::Hash160),
        OpInstr::PushBytes(vec![0x10; 20]),
        op(Opcode::EqualVerify),
        OpInstr::PushInt(5),
        op(Opcode::CheckSig),
    ];
    let asm = emit_asm(&ops);
    let reparsed = parse_asm(&asm).expect("asm parses");
    assert_eq!(ops, reparsed);
    assert_eq!(asm, emit_asm(&reparsed));
}

#[test]
fn asm_round_trip_is_stable_for_numeric_pushes() {
    // Large integers re-parse as byte pushes with identical rendering.
    let ops = vec![OpInstr::PushInt(1000), op(Opcode::Add)];
    let asm = emit_asm(&ops);
    let reparsed = parse_asm(&asm).expect("asm parses");
    assert_eq!(asm, emit_asm(&reparsed));
    assert_eq!(encode(&ops), encode(&reparsed));
}

#[test]
fn asm_accepts_unprefixed_opcode_names() {
    let ops = parse_asm("2 5 ADD").expect("asm parses");
    assert_eq!(vec![OpInstr::PushInt(2), OpInstr::PushInt(5), op(Opcode::Add)], ops);
}

#[test]
fn unknown_asm_token_is_rejected() {
    assert!(parse_asm("OP_BOGUS").is_err());
    assert!(parse_asm("0x02 11").is_err());
}

#[test]
fn binary_round_trip_preserves_the_bytes() {
    let ops = vec![
        op(Opcode::Dup),
        op(Opcode::Hash160),
        OpInstr::PushBytes(vec![0x10; 20]),
        op(Opcode::EqualVerify),
        op(Opcode::CheckSig),
    ];
    let hex = emit_hex(&ops);
    let reparsed = parse_hex(&hex).expect("hex parses");
    assert_eq!(ops, reparsed);
    assert_eq!(hex, emit_hex(&reparsed));
}

#[test]
fn truncated_push_is_rejected() {
    assert!(decode(&[0x05, 0x11]).is_err());
    assert!(parse_hex("4c").is_err());
}

#[test]
fn script_numbers_encode_minimally() {
    assert_eq!(Vec::<u8>::new(), script_num_bytes(0));
    assert_eq!(vec![0x01], script_num_bytes(1));
    assert_eq!(vec![0x7f], script_num_bytes(127));
    assert_eq!(vec![0x80, 0x00], script_num_bytes(128));
    assert_eq!(vec![0x81], script_num_bytes(-1));
    assert_eq!(vec![0xff, 0x00], script_num_bytes(255));
    assert_eq!(vec![0x00, 0x01], script_num_bytes(256));
    assert_eq!(vec![0xff, 0x80], script_num_bytes(-255));
}

#[test]
fn script_numbers_round_trip() {
    for value in [0i64, 1, -1, 5, 127, 128, -128, 255, 256, 1000, -1000, i32::MAX as i64] {
        assert_eq!(value, script_num_from_bytes(&script_num_bytes(value)), "value {value}");
    }
}
