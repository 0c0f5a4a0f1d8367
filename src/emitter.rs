use crate::ast::decode_hex;
use crate::errors::CompilerError;
use crate::ir::{script_num_bytes, OpInstr, Opcode};

const OP_0: u8 = 0x00;
const OP_1NEGATE: u8 = 0x4f;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const MAX_DIRECT_PUSH: usize = 0x4b;

/// Canonical human-readable form: space-separated upper-case tokens, data
/// pushes rendered as a length prefix followed by the bytes in hex.
pub fn emit_asm(ops: &[OpInstr]) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for instr in ops {
        match instr {
            OpInstr::Op(opcode) => tokens.push(opcode.name().to_string()),
            OpInstr::PushInt(value) => push_int_tokens(*value, &mut tokens),
            OpInstr::PushBytes(bytes) => push_bytes_tokens(bytes, &mut tokens),
        }
    }
    tokens.join(" ")
}

/// Canonical binary form as a lowercase hex string.
pub fn emit_hex(ops: &[OpInstr]) -> String {
    to_hex(&encode(ops))
}

/// Canonical binary form.
pub fn encode(ops: &[OpInstr]) -> Vec<u8> {
    let mut out = Vec::new();
    for instr in ops {
        match instr {
            OpInstr::Op(opcode) => out.push(opcode.byte()),
            OpInstr::PushInt(value) => encode_int_push(*value, &mut out),
            OpInstr::PushBytes(bytes) => encode_data_push(bytes, &mut out),
        }
    }
    out
}

fn push_int_tokens(value: i64, tokens: &mut Vec<String>) {
    match value {
        0 => tokens.push("OP_0".to_string()),
        -1 => tokens.push("OP_1NEGATE".to_string()),
        1..=16 => tokens.push(format!("OP_{value}")),
        _ => push_data_tokens(&script_num_bytes(value), tokens),
    }
}

fn push_bytes_tokens(bytes: &[u8], tokens: &mut Vec<String>) {
    // Minimal-push rule: byte strings that are small-integer encodings use
    // the small-integer opcodes.
    match small_int_from_bytes(bytes) {
        Some(value) => push_int_tokens(value, tokens),
        None => push_data_tokens(bytes, tokens),
    }
}

fn push_data_tokens(bytes: &[u8], tokens: &mut Vec<String>) {
    let len = bytes.len();
    if len <= MAX_DIRECT_PUSH {
        tokens.push(format!("0x{len:02x}"));
    } else if len <= 0xff {
        tokens.push("OP_PUSHDATA1".to_string());
        tokens.push(format!("0x{len:02x}"));
    } else if len <= 0xffff {
        tokens.push("OP_PUSHDATA2".to_string());
        tokens.push(format!("0x{len:04x}"));
    } else {
        tokens.push("OP_PUSHDATA4".to_string());
        tokens.push(format!("0x{len:08x}"));
    }
    tokens.push(to_hex(bytes));
}

fn encode_int_push(value: i64, out: &mut Vec<u8>) {
    match value {
        0 => out.push(OP_0),
        -1 => out.push(OP_1NEGATE),
        1..=16 => out.push(OP_1 + (value as u8) - 1),
        _ => encode_raw_data_push(&script_num_bytes(value), out),
    }
}

fn encode_data_push(bytes: &[u8], out: &mut Vec<u8>) {
    match small_int_from_bytes(bytes) {
        Some(value) => encode_int_push(value, out),
        None => encode_raw_data_push(bytes, out),
    }
}

fn encode_raw_data_push(bytes: &[u8], out: &mut Vec<u8>) {
    let len = bytes.len();
    if len <= MAX_DIRECT_PUSH {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend((len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend((len as u32).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}

/// The small-integer value a byte string encodes, if any.
fn small_int_from_bytes(bytes: &[u8]) -> Option<i64> {
    match bytes {
        [] => Some(0),
        [value @ 1..=16] => Some(*value as i64),
        [0x81] => Some(-1),
        _ => None,
    }
}

/// Parse the textual form back into opcode IR. Accepts both `OP_`-prefixed
/// and bare opcode names, small-integer tokens, and length-prefixed data
/// pushes as produced by [`emit_asm`].
pub fn parse_asm(source: &str) -> Result<Vec<OpInstr>, CompilerError> {
    let mut ops = Vec::new();
    let mut tokens = source.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(instr) = small_int_token(token) {
            ops.push(instr);
            continue;
        }
        match token {
            "OP_PUSHDATA1" | "OP_PUSHDATA2" | "OP_PUSHDATA4" | "PUSHDATA1" | "PUSHDATA2" | "PUSHDATA4" => {
                let len_token = tokens.next().ok_or_else(|| {
                    CompilerError::InvalidLiteral(format!("{token} requires a length token"))
                })?;
                let len = parse_length_token(len_token)?;
                let data_token = tokens
                    .next()
                    .ok_or_else(|| CompilerError::InvalidLiteral(format!("{token} requires a data token")))?;
                let bytes = decode_hex(data_token.trim_start_matches("0x"))?;
                if bytes.len() != len {
                    return Err(CompilerError::InvalidLiteral(format!(
                        "push length {len} does not match {} data bytes",
                        bytes.len()
                    )));
                }
                ops.push(OpInstr::PushBytes(bytes));
            }
            _ if token.starts_with("0x") => {
                let len = parse_length_token(token)?;
                let data_token = tokens
                    .next()
                    .ok_or_else(|| CompilerError::InvalidLiteral("data push is missing its bytes".to_string()))?;
                let bytes = decode_hex(data_token.trim_start_matches("0x"))?;
                if bytes.len() != len {
                    return Err(CompilerError::InvalidLiteral(format!(
                        "push length {len} does not match {} data bytes",
                        bytes.len()
                    )));
                }
                ops.push(OpInstr::PushBytes(bytes));
            }
            _ => {
                if let Some(opcode) =
                    Opcode::from_name(token).or_else(|| Opcode::from_name(&format!("OP_{token}")))
                {
                    ops.push(OpInstr::Op(opcode));
                } else if let Ok(value) = token.parse::<i64>() {
                    ops.push(OpInstr::PushInt(value));
                } else {
                    return Err(CompilerError::InvalidLiteral(format!("unknown script token '{token}'")));
                }
            }
        }
    }
    Ok(ops)
}

fn small_int_token(token: &str) -> Option<OpInstr> {
    match token {
        "OP_0" | "OP_FALSE" => Some(OpInstr::PushInt(0)),
        "OP_TRUE" => Some(OpInstr::PushInt(1)),
        "OP_1NEGATE" => Some(OpInstr::PushInt(-1)),
        _ => {
            let value = token.strip_prefix("OP_")?.parse::<i64>().ok()?;
            (1..=16).contains(&value).then_some(OpInstr::PushInt(value))
        }
    }
}

fn parse_length_token(token: &str) -> Result<usize, CompilerError> {
    let digits = token
        .strip_prefix("0x")
        .ok_or_else(|| CompilerError::InvalidLiteral(format!("expected 0x-prefixed push length, got '{token}'")))?;
    usize::from_str_radix(digits, 16)
        .map_err(|_| CompilerError::InvalidLiteral(format!("invalid push length '{token}'")))
}

/// Parse the binary form (as hex text) back into opcode IR.
pub fn parse_hex(source: &str) -> Result<Vec<OpInstr>, CompilerError> {
    let bytes = decode_hex(source.trim().trim_start_matches("0x"))?;
    decode(&bytes)
}

/// Decode canonical script bytes into opcode IR.
pub fn decode(bytes: &[u8]) -> Result<Vec<OpInstr>, CompilerError> {
    let mut ops = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        index += 1;
        match byte {
            OP_0 => ops.push(OpInstr::PushInt(0)),
            OP_1NEGATE => ops.push(OpInstr::PushInt(-1)),
            OP_1..=OP_16 => ops.push(OpInstr::PushInt((byte - OP_1 + 1) as i64)),
            1..=0x4b => {
                let data = take(bytes, &mut index, byte as usize)?;
                ops.push(OpInstr::PushBytes(data));
            }
            OP_PUSHDATA1 => {
                let len = take(bytes, &mut index, 1)?[0] as usize;
                let data = take(bytes, &mut index, len)?;
                ops.push(OpInstr::PushBytes(data));
            }
            OP_PUSHDATA2 => {
                let len_bytes = take(bytes, &mut index, 2)?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let data = take(bytes, &mut index, len)?;
                ops.push(OpInstr::PushBytes(data));
            }
            OP_PUSHDATA4 => {
                let len_bytes = take(bytes, &mut index, 4)?;
                let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
                let data = take(bytes, &mut index, len)?;
                ops.push(OpInstr::PushBytes(data));
            }
            other => match Opcode::from_byte(other) {
                Some(opcode) => ops.push(OpInstr::Op(opcode)),
                None => {
                    return Err(CompilerError::InvalidLiteral(format!("unknown opcode byte 0x{other:02x}")));
                }
            },
        }
    }
    Ok(ops)
}

fn take(bytes: &[u8], index: &mut usize, count: usize) -> Result<Vec<u8>, CompilerError> {
    let end = index.checked_add(count).filter(|end| *end <= bytes.len()).ok_or_else(|| {
        CompilerError::InvalidLiteral("data push length exceeds remaining script bytes".to_string())
    })?;
    let data = bytes[*index..end].to_vec();
    *index = end;
    Ok(data)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
