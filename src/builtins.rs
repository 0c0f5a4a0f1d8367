use sha2::{Digest, Sha256};

use crate::ast::Type;
use crate::errors::CompilerError;
use crate::ir::Opcode;
use crate::symbols::ConstValue;

/// A built-in function mapping directly to one opcode.
pub struct OpFunc {
    pub name: &'static str,
    /// `None` means variadic (`checkMultiSig`).
    pub nargs: Option<usize>,
    pub opcode: Opcode,
    pub arg_types: &'static [Type],
    pub ret_ty: Type,
}

pub const OP_FUNCTIONS: &[OpFunc] = &[
    OpFunc { name: "abs", nargs: Some(1), opcode: Opcode::Abs, arg_types: &[Type::Int], ret_ty: Type::Int },
    OpFunc { name: "size", nargs: Some(1), opcode: Opcode::Size, arg_types: &[Type::Bytes], ret_ty: Type::Int },
    OpFunc { name: "min", nargs: Some(2), opcode: Opcode::Min, arg_types: &[Type::Int, Type::Int], ret_ty: Type::Int },
    OpFunc { name: "max", nargs: Some(2), opcode: Opcode::Max, arg_types: &[Type::Int, Type::Int], ret_ty: Type::Int },
    OpFunc { name: "concat", nargs: Some(2), opcode: Opcode::Cat, arg_types: &[Type::Bytes, Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "left", nargs: Some(2), opcode: Opcode::Left, arg_types: &[Type::Bytes, Type::Int], ret_ty: Type::Bytes },
    OpFunc { name: "right", nargs: Some(2), opcode: Opcode::Right, arg_types: &[Type::Bytes, Type::Int], ret_ty: Type::Bytes },
    OpFunc { name: "ripemd160", nargs: Some(1), opcode: Opcode::Ripemd160, arg_types: &[Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "sha1", nargs: Some(1), opcode: Opcode::Sha1, arg_types: &[Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "sha256", nargs: Some(1), opcode: Opcode::Sha256, arg_types: &[Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "hash160", nargs: Some(1), opcode: Opcode::Hash160, arg_types: &[Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "hash256", nargs: Some(1), opcode: Opcode::Hash256, arg_types: &[Type::Bytes], ret_ty: Type::Bytes },
    OpFunc { name: "checkSig", nargs: Some(2), opcode: Opcode::CheckSig, arg_types: &[Type::Expr, Type::Expr], ret_ty: Type::Int },
    OpFunc { name: "checkMultiSig", nargs: None, opcode: Opcode::CheckMultiSig, arg_types: &[], ret_ty: Type::Int },
    OpFunc {
        name: "substr",
        nargs: Some(3),
        opcode: Opcode::Substr,
        arg_types: &[Type::Bytes, Type::Int, Type::Int],
        ret_ty: Type::Bytes,
    },
    OpFunc { name: "within", nargs: Some(3), opcode: Opcode::Within, arg_types: &[Type::Int, Type::Int, Type::Int], ret_ty: Type::Int },
];

/// Built-ins with side effects: their results may not be bound lazily with
/// `let`, and their opcodes must not be folded away.
pub const SIDE_EFFECT_FUNCTIONS: &[&str] = &["checkSig", "checkMultiSig"];

/// Special forms handled directly by the lowerer.
pub const RAW: &str = "raw";
pub const MARK_INVALID: &str = "markInvalid";

/// Compile-time validation built-ins. Each takes one constant argument,
/// fails compilation when the value is malformed, and otherwise evaluates
/// to a byte constant.
pub const VALIDATION_FUNCTIONS: &[&str] = &["check_hash160", "check_pubkey", "address_to_hash160"];

pub fn lookup(name: &str) -> Option<&'static OpFunc> {
    OP_FUNCTIONS.iter().find(|func| func.name == name)
}

pub fn is_builtin_name(name: &str) -> bool {
    lookup(name).is_some() || VALIDATION_FUNCTIONS.contains(&name) || name == RAW || name == MARK_INVALID
}

pub fn validate_builtin(name: &str, value: &ConstValue) -> Result<ConstValue, CompilerError> {
    let ConstValue::Bytes(bytes) = value else {
        return Err(CompilerError::TypeMismatch(format!("{name} expects a byte constant")));
    };
    match name {
        "check_hash160" => {
            if bytes.len() != 20 {
                return Err(CompilerError::ValidationFailed(format!("hash160 value must be 20 bytes, got {}", bytes.len())));
            }
            Ok(ConstValue::Bytes(bytes.clone()))
        }
        "check_pubkey" => {
            let valid = match bytes.len() {
                33 => matches!(bytes[0], 0x02 | 0x03),
                65 => bytes[0] == 0x04,
                _ => false,
            };
            if !valid {
                return Err(CompilerError::ValidationFailed(format!("{} bytes is not a valid public key encoding", bytes.len())));
            }
            Ok(ConstValue::Bytes(bytes.clone()))
        }
        "address_to_hash160" => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CompilerError::ValidationFailed("address is not valid UTF-8".to_string()))?;
            address_to_hash160(text).map(ConstValue::Bytes)
        }
        other => Err(CompilerError::InternalInvariant(format!("unknown validation built-in '{other}'"))),
    }
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Base58check-decode `address`, verify the checksum, discard the version
/// byte and return the 20-byte hash.
fn address_to_hash160(address: &str) -> Result<Vec<u8>, CompilerError> {
    let decoded = base58_decode(address)?;
    if decoded.len() != 25 {
        return Err(CompilerError::ValidationFailed(format!("address decodes to {} bytes, expected 25", decoded.len())));
    }
    let (payload, checksum) = decoded.split_at(21);
    let digest = Sha256::digest(Sha256::digest(payload));
    if digest[..4] != *checksum {
        return Err(CompilerError::ValidationFailed("address checksum mismatch".to_string()));
    }
    // payload[0] is the version byte.
    Ok(payload[1..].to_vec())
}

fn base58_decode(input: &str) -> Result<Vec<u8>, CompilerError> {
    let mut result: Vec<u8> = Vec::new();
    for ch in input.bytes() {
        let digit = BASE58_ALPHABET
            .iter()
            .position(|candidate| *candidate == ch)
            .ok_or_else(|| CompilerError::ValidationFailed(format!("invalid base58 character '{}'", ch as char)))?;
        let mut carry = digit;
        for byte in result.iter_mut().rev() {
            carry += (*byte as usize) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            result.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    // Leading '1' characters encode leading zero bytes.
    let leading_zeros = input.bytes().take_while(|ch| *ch == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend(result);
    Ok(out)
}
