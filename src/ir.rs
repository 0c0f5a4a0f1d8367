use std::fmt;

use serde::Serialize;

/// The fixed opcode set of the target stack machine.
///
/// Small-integer pushes (`OP_0`..`OP_16`, `OP_1NEGATE`) are not opcodes in
/// this IR; they are `OpInstr::PushInt` values and the emitter picks the
/// shortest encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    // Flow control.
    If,
    NotIf,
    Else,
    EndIf,
    Verify,
    Return,
    // Stack.
    Depth,
    Drop,
    Dup,
    IfDup,
    Nip,
    Over,
    Pick,
    Roll,
    Rot,
    Swap,
    Tuck,
    TwoDrop,
    TwoDup,
    // Splice.
    Cat,
    Substr,
    Left,
    Right,
    Size,
    // Bitwise logic.
    Invert,
    And,
    Or,
    Xor,
    Equal,
    EqualVerify,
    // Arithmetic.
    Add1,
    Sub1,
    Mul2,
    Div2,
    Negate,
    Abs,
    Not,
    ZeroNotEqual,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    BoolAnd,
    BoolOr,
    NumEqual,
    NumEqualVerify,
    NumNotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Min,
    Max,
    Within,
    // Crypto.
    Ripemd160,
    Sha1,
    Sha256,
    Hash160,
    Hash256,
    CodeSeparator,
    CheckSig,
    CheckSigVerify,
    CheckMultiSig,
    CheckMultiSigVerify,
}

struct OpcodeInfo {
    opcode: Opcode,
    name: &'static str,
    byte: u8,
    /// (inputs consumed, outputs produced); `None` when the arity depends
    /// on operands already on the stack.
    effect: Option<(usize, usize)>,
    verifier: bool,
}

const fn op(opcode: Opcode, name: &'static str, byte: u8, effect: Option<(usize, usize)>) -> OpcodeInfo {
    OpcodeInfo { opcode, name, byte, effect, verifier: false }
}

const fn verifier(opcode: Opcode, name: &'static str, byte: u8, effect: Option<(usize, usize)>) -> OpcodeInfo {
    OpcodeInfo { opcode, name, byte, effect, verifier: true }
}

const OPCODE_TABLE: &[OpcodeInfo] = &[
    op(Opcode::If, "OP_IF", 0x63, Some((1, 0))),
    op(Opcode::NotIf, "OP_NOTIF", 0x64, Some((1, 0))),
    op(Opcode::Else, "OP_ELSE", 0x67, Some((0, 0))),
    op(Opcode::EndIf, "OP_ENDIF", 0x68, Some((0, 0))),
    verifier(Opcode::Verify, "OP_VERIFY", 0x69, Some((1, 0))),
    op(Opcode::Return, "OP_RETURN", 0x6a, Some((0, 0))),
    op(Opcode::Depth, "OP_DEPTH", 0x74, Some((0, 1))),
    op(Opcode::Drop, "OP_DROP", 0x75, Some((1, 0))),
    op(Opcode::Dup, "OP_DUP", 0x76, Some((1, 2))),
    op(Opcode::IfDup, "OP_IFDUP", 0x73, None),
    op(Opcode::Nip, "OP_NIP", 0x77, Some((2, 1))),
    op(Opcode::Over, "OP_OVER", 0x78, Some((2, 3))),
    op(Opcode::Pick, "OP_PICK", 0x79, None),
    op(Opcode::Roll, "OP_ROLL", 0x7a, None),
    op(Opcode::Rot, "OP_ROT", 0x7b, Some((3, 3))),
    op(Opcode::Swap, "OP_SWAP", 0x7c, Some((2, 2))),
    op(Opcode::Tuck, "OP_TUCK", 0x7d, Some((2, 3))),
    op(Opcode::TwoDrop, "OP_2DROP", 0x6d, Some((2, 0))),
    op(Opcode::TwoDup, "OP_2DUP", 0x6e, Some((2, 4))),
    op(Opcode::Cat, "OP_CAT", 0x7e, Some((2, 1))),
    op(Opcode::Substr, "OP_SUBSTR", 0x7f, Some((3, 1))),
    op(Opcode::Left, "OP_LEFT", 0x80, Some((2, 1))),
    op(Opcode::Right, "OP_RIGHT", 0x81, Some((2, 1))),
    op(Opcode::Size, "OP_SIZE", 0x82, Some((1, 2))),
    op(Opcode::Invert, "OP_INVERT", 0x83, Some((1, 1))),
    op(Opcode::And, "OP_AND", 0x84, Some((2, 1))),
    op(Opcode::Or, "OP_OR", 0x85, Some((2, 1))),
    op(Opcode::Xor, "OP_XOR", 0x86, Some((2, 1))),
    op(Opcode::Equal, "OP_EQUAL", 0x87, Some((2, 1))),
    verifier(Opcode::EqualVerify, "OP_EQUALVERIFY", 0x88, Some((2, 0))),
    op(Opcode::Add1, "OP_1ADD", 0x8b, Some((1, 1))),
    op(Opcode::Sub1, "OP_1SUB", 0x8c, Some((1, 1))),
    op(Opcode::Mul2, "OP_2MUL", 0x8d, Some((1, 1))),
    op(Opcode::Div2, "OP_2DIV", 0x8e, Some((1, 1))),
    op(Opcode::Negate, "OP_NEGATE", 0x8f, Some((1, 1))),
    op(Opcode::Abs, "OP_ABS", 0x90, Some((1, 1))),
    op(Opcode::Not, "OP_NOT", 0x91, Some((1, 1))),
    op(Opcode::ZeroNotEqual, "OP_0NOTEQUAL", 0x92, Some((1, 1))),
    op(Opcode::Add, "OP_ADD", 0x93, Some((2, 1))),
    op(Opcode::Sub, "OP_SUB", 0x94, Some((2, 1))),
    op(Opcode::Mul, "OP_MUL", 0x95, Some((2, 1))),
    op(Opcode::Div, "OP_DIV", 0x96, Some((2, 1))),
    op(Opcode::Mod, "OP_MOD", 0x97, Some((2, 1))),
    op(Opcode::LShift, "OP_LSHIFT", 0x98, Some((2, 1))),
    op(Opcode::RShift, "OP_RSHIFT", 0x99, Some((2, 1))),
    op(Opcode::BoolAnd, "OP_BOOLAND", 0x9a, Some((2, 1))),
    op(Opcode::BoolOr, "OP_BOOLOR", 0x9b, Some((2, 1))),
    op(Opcode::NumEqual, "OP_NUMEQUAL", 0x9c, Some((2, 1))),
    verifier(Opcode::NumEqualVerify, "OP_NUMEQUALVERIFY", 0x9d, Some((2, 0))),
    op(Opcode::NumNotEqual, "OP_NUMNOTEQUAL", 0x9e, Some((2, 1))),
    op(Opcode::LessThan, "OP_LESSTHAN", 0x9f, Some((2, 1))),
    op(Opcode::GreaterThan, "OP_GREATERTHAN", 0xa0, Some((2, 1))),
    op(Opcode::LessThanOrEqual, "OP_LESSTHANOREQUAL", 0xa1, Some((2, 1))),
    op(Opcode::GreaterThanOrEqual, "OP_GREATERTHANOREQUAL", 0xa2, Some((2, 1))),
    op(Opcode::Min, "OP_MIN", 0xa3, Some((2, 1))),
    op(Opcode::Max, "OP_MAX", 0xa4, Some((2, 1))),
    op(Opcode::Within, "OP_WITHIN", 0xa5, Some((3, 1))),
    op(Opcode::Ripemd160, "OP_RIPEMD160", 0xa6, Some((1, 1))),
    op(Opcode::Sha1, "OP_SHA1", 0xa7, Some((1, 1))),
    op(Opcode::Sha256, "OP_SHA256", 0xa8, Some((1, 1))),
    op(Opcode::Hash160, "OP_HASH160", 0xa9, Some((1, 1))),
    op(Opcode::Hash256, "OP_HASH256", 0xaa, Some((1, 1))),
    op(Opcode::CodeSeparator, "OP_CODESEPARATOR", 0xab, Some((0, 0))),
    op(Opcode::CheckSig, "OP_CHECKSIG", 0xac, Some((2, 1))),
    verifier(Opcode::CheckSigVerify, "OP_CHECKSIGVERIFY", 0xad, Some((2, 0))),
    op(Opcode::CheckMultiSig, "OP_CHECKMULTISIG", 0xae, None),
    verifier(Opcode::CheckMultiSigVerify, "OP_CHECKMULTISIGVERIFY", 0xaf, None),
];

impl Opcode {
    fn info(self) -> &'static OpcodeInfo {
        OPCODE_TABLE.iter().find(|info| info.opcode == self).expect("every opcode is in the table")
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn byte(self) -> u8 {
        self.info().byte
    }

    /// (inputs consumed, outputs produced), or `None` when the arity
    /// depends on stack operands (`OP_PICK`, `OP_ROLL`, multisig).
    pub fn stack_effect(self) -> Option<(usize, usize)> {
        self.info().effect
    }

    /// Whether this opcode aborts the script on a failed check.
    pub fn is_verifier(self) -> bool {
        self.info().verifier
    }

    /// The `*VERIFY` form this opcode merges into when followed by
    /// `OP_VERIFY`, if one exists.
    pub fn verify_form(self) -> Option<Opcode> {
        match self {
            Opcode::Equal => Some(Opcode::EqualVerify),
            Opcode::NumEqual => Some(Opcode::NumEqualVerify),
            Opcode::CheckSig => Some(Opcode::CheckSigVerify),
            Opcode::CheckMultiSig => Some(Opcode::CheckMultiSigVerify),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        OPCODE_TABLE.iter().find(|info| info.name == name).map(|info| info.opcode)
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        OPCODE_TABLE.iter().find(|info| info.byte == byte).map(|info| info.opcode)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimal script-number encoding: little-endian magnitude with the sign
/// carried in the high bit of the final byte.
pub fn script_num_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut result = Vec::new();
    while magnitude > 0 {
        result.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if result.last().expect("nonzero magnitude") & 0x80 != 0 {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        *result.last_mut().expect("nonzero magnitude") |= 0x80;
    }
    result
}

/// Decode a script-number byte sequence. The inverse of
/// [`script_num_bytes`] for minimally encoded values.
pub fn script_num_from_bytes(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut magnitude: i64 = 0;
    for (index, byte) in bytes.iter().enumerate() {
        let byte = if index == bytes.len() - 1 { byte & 0x7f } else { *byte };
        magnitude |= (byte as i64) << (8 * index);
    }
    if bytes.last().expect("nonempty") & 0x80 != 0 { -magnitude } else { magnitude }
}

/// One instruction of the linear opcode IR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OpInstr {
    Op(Opcode),
    PushInt(i64),
    PushBytes(Vec<u8>),
}

impl OpInstr {
    /// The integer this instruction pushes, if it is an integer push.
    pub fn pushed_int(&self) -> Option<i64> {
        match self {
            OpInstr::PushInt(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, OpInstr::PushInt(_) | OpInstr::PushBytes(_))
    }
}

impl fmt::Display for OpInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpInstr::Op(opcode) => f.write_str(opcode.name()),
            OpInstr::PushInt(value) => write!(f, "{value}"),
            OpInstr::PushBytes(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
