use tracing::debug;

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::ir::{script_num_bytes, OpInstr, Opcode};
use crate::symbols::ConstValue;

/// Upper bound on peephole passes. Every rewrite strictly shrinks the
/// instruction sequence or replaces it with an equally long one, so the
/// fixpoint is normally reached after one or two passes.
const MAX_PASSES: usize = 5;

/// Fold constant subexpressions of a resolved expression tree. Operates
/// bottom-up and only on pure operators; the result of folding a folded
/// tree is the tree itself.
pub fn fold_expr<'i>(expr: &Expr<'i>) -> Expr<'i> {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Bytes(_) | ExprKind::Name(_) => expr.clone(),
        ExprKind::Unary { op, expr: operand } => {
            let operand = fold_expr(operand);
            if let Some(value) = eval_unary(*op, &operand) {
                return Expr::new(value.into_expr_kind(), expr.span);
            }
            Expr::new(ExprKind::Unary { op: *op, expr: Box::new(operand) }, expr.span)
        }
        ExprKind::Binary { op, left, right } => {
            let left = fold_expr(left);
            let right = fold_expr(right);
            if let Some(value) = eval_binary(*op, &left, &right) {
                return Expr::new(value.into_expr_kind(), expr.span);
            }
            Expr::new(ExprKind::Binary { op: *op, left: Box::new(left), right: Box::new(right) }, expr.span)
        }
        ExprKind::Call { name, args, name_span } => {
            // Inner-script bytes are data; folding would change them.
            if name == crate::builtins::RAW {
                return expr.clone();
            }
            let args: Vec<Expr<'i>> = args.iter().map(fold_expr).collect();
            if let Some(value) = eval_builtin(name, &args) {
                return Expr::new(value.into_expr_kind(), expr.span);
            }
            Expr::new(ExprKind::Call { name: name.clone(), args, name_span: *name_span }, expr.span)
        }
    }
}

/// The constant value of a folded expression, if it is a literal.
pub fn const_eval(expr: &Expr<'_>) -> Option<ConstValue> {
    match &expr.kind {
        ExprKind::Int(value) => Some(ConstValue::Int(*value)),
        ExprKind::Bytes(bytes) => Some(ConstValue::Bytes(bytes.clone())),
        _ => None,
    }
}

impl ConstValue {
    fn into_expr_kind(self) -> ExprKind<'static> {
        match self {
            ConstValue::Int(value) => ExprKind::Int(value),
            ConstValue::Bytes(bytes) => ExprKind::Bytes(bytes),
        }
    }
}

fn eval_unary(op: UnaryOp, operand: &Expr<'_>) -> Option<ConstValue> {
    let value = const_eval(operand)?;
    match (op, value) {
        (UnaryOp::Neg, ConstValue::Int(n)) => Some(ConstValue::Int(n.wrapping_neg())),
        (UnaryOp::Invert, ConstValue::Int(n)) => Some(ConstValue::Int(!n)),
        (UnaryOp::Invert, ConstValue::Bytes(b)) => Some(ConstValue::Bytes(b.iter().map(|byte| !byte).collect())),
        (UnaryOp::Not, value) => Some(bool_value(!value.is_truthy())),
        _ => None,
    }
}

fn eval_binary(op: BinaryOp, left: &Expr<'_>, right: &Expr<'_>) -> Option<ConstValue> {
    let left = const_eval(left)?;
    let right = const_eval(right)?;

    match op {
        BinaryOp::And => return Some(bool_value(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => return Some(bool_value(left.is_truthy() || right.is_truthy())),
        _ => {}
    }

    match (left, right) {
        (ConstValue::Int(a), ConstValue::Int(b)) => eval_int_binary(op, a, b),
        (ConstValue::Bytes(a), ConstValue::Bytes(b)) => eval_bytes_binary(op, &a, &b),
        _ => None,
    }
}

fn eval_int_binary(op: BinaryOp, a: i64, b: i64) -> Option<ConstValue> {
    let result = match op {
        BinaryOp::Add => ConstValue::Int(a.wrapping_add(b)),
        BinaryOp::Sub => ConstValue::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => ConstValue::Int(a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return None;
            }
            ConstValue::Int(a.wrapping_div(b))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            ConstValue::Int(a.wrapping_rem(b))
        }
        BinaryOp::Shl => {
            let shift = u32::try_from(b).ok().filter(|s| *s < 64)?;
            ConstValue::Int(a.wrapping_shl(shift))
        }
        BinaryOp::Shr => {
            let shift = u32::try_from(b).ok().filter(|s| *s < 64)?;
            ConstValue::Int(a.wrapping_shr(shift))
        }
        BinaryOp::BitAnd => ConstValue::Int(a & b),
        BinaryOp::BitOr => ConstValue::Int(a | b),
        BinaryOp::BitXor => ConstValue::Int(a ^ b),
        BinaryOp::Eq => bool_value(a == b),
        BinaryOp::Ne => bool_value(a != b),
        BinaryOp::Lt => bool_value(a < b),
        BinaryOp::Le => bool_value(a <= b),
        BinaryOp::Gt => bool_value(a > b),
        BinaryOp::Ge => bool_value(a >= b),
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(result)
}

fn eval_bytes_binary(op: BinaryOp, a: &[u8], b: &[u8]) -> Option<ConstValue> {
    match op {
        BinaryOp::Eq => Some(bool_value(a == b)),
        BinaryOp::Ne => Some(bool_value(a != b)),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor if a.len() == b.len() => {
            let combine: fn(u8, u8) -> u8 = match op {
                BinaryOp::BitAnd => |x, y| x & y,
                BinaryOp::BitOr => |x, y| x | y,
                _ => |x, y| x ^ y,
            };
            Some(ConstValue::Bytes(a.iter().zip(b).map(|(x, y)| combine(*x, *y)).collect()))
        }
        _ => None,
    }
}

fn eval_builtin(name: &str, args: &[Expr<'_>]) -> Option<ConstValue> {
    let values: Vec<ConstValue> = args.iter().map(const_eval).collect::<Option<_>>()?;
    match (name, values.as_slice()) {
        ("abs", [ConstValue::Int(n)]) => Some(ConstValue::Int(n.wrapping_abs())),
        ("min", [ConstValue::Int(a), ConstValue::Int(b)]) => Some(ConstValue::Int(*a.min(b))),
        ("max", [ConstValue::Int(a), ConstValue::Int(b)]) => Some(ConstValue::Int(*a.max(b))),
        ("size", [ConstValue::Bytes(bytes)]) => Some(ConstValue::Int(bytes.len() as i64)),
        ("size", [ConstValue::Int(n)]) => Some(ConstValue::Int(script_num_bytes(*n).len() as i64)),
        ("concat", [ConstValue::Bytes(a), ConstValue::Bytes(b)]) => {
            let mut joined = a.clone();
            joined.extend_from_slice(b);
            Some(ConstValue::Bytes(joined))
        }
        ("left", [ConstValue::Bytes(bytes), ConstValue::Int(n)]) => {
            let n = usize::try_from(*n).ok().filter(|n| *n <= bytes.len())?;
            Some(ConstValue::Bytes(bytes[..n].to_vec()))
        }
        ("right", [ConstValue::Bytes(bytes), ConstValue::Int(n)]) => {
            let n = usize::try_from(*n).ok().filter(|n| *n <= bytes.len())?;
            Some(ConstValue::Bytes(bytes[bytes.len() - n..].to_vec()))
        }
        ("substr", [ConstValue::Bytes(bytes), ConstValue::Int(begin), ConstValue::Int(size)]) => {
            let begin = usize::try_from(*begin).ok()?;
            let size = usize::try_from(*size).ok()?;
            if begin.checked_add(size)? > bytes.len() {
                return None;
            }
            Some(ConstValue::Bytes(bytes[begin..begin + size].to_vec()))
        }
        ("within", [ConstValue::Int(x), ConstValue::Int(min), ConstValue::Int(max)]) => {
            Some(bool_value(min <= x && x < max))
        }
        _ => None,
    }
}

fn bool_value(value: bool) -> ConstValue {
    ConstValue::Int(if value { 1 } else { 0 })
}

/// Run the peephole rewrites to a fixpoint, then the dead-code pass.
pub fn optimize(ops: &mut Vec<OpInstr>) {
    for pass in 0..MAX_PASSES {
        let rewrites = peephole_pass(ops);
        debug!(pass, rewrites, "peephole pass complete");
        if rewrites == 0 {
            break;
        }
    }
    dead_code_elimination(ops);
}

fn peephole_pass(ops: &mut Vec<OpInstr>) -> usize {
    let mut rewrites = 0;
    rewrites += merge_op_and_verify(ops);
    rewrites += merge_constant_arithmetic(ops);
    rewrites += stack_ops(ops);
    rewrites += arithmetic_shortcut_ops(ops);
    rewrites += hash_shortcut_ops(ops);
    rewrites += conditional_shortcut_ops(ops);
    rewrites += remove_null_conditionals(ops);
    rewrites += double_negation(ops);
    rewrites += constant_verify(ops);
    rewrites += commutative_operations(ops);
    rewrites += comparison_mirror_ops(ops);
    rewrites += drop_unconsumed_pushes(ops);
    rewrites += remove_trailing_verifications(ops);
    rewrites
}

fn rewrite_sites(
    ops: &mut Vec<OpInstr>,
    rule: &'static str,
    matcher: impl Fn(&[OpInstr]) -> Option<(usize, Vec<OpInstr>)>,
) -> usize {
    let mut index = 0;
    let mut count = 0;
    while index < ops.len() {
        match matcher(&ops[index..]) {
            Some((matched, replacement)) => {
                debug!(rule, index, matched, "peephole rewrite");
                let advance = replacement.len().max(1);
                ops.splice(index..index + matched, replacement);
                index += advance;
                count += 1;
            }
            None => index += 1,
        }
    }
    count
}

/// OP_EQUAL OP_VERIFY -> OP_EQUALVERIFY (and the other *VERIFY forms).
fn merge_op_and_verify(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "merge_op_and_verify", |window| match window {
        [OpInstr::Op(base), OpInstr::Op(Opcode::Verify), ..] => {
            base.verify_form().map(|merged| (2, vec![OpInstr::Op(merged)]))
        }
        _ => None,
    })
}

/// Late constant folding on the instruction stream.
fn merge_constant_arithmetic(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "merge_constant_arithmetic", |window| match window {
        [OpInstr::PushInt(a), OpInstr::PushInt(b), OpInstr::Op(op), ..] => {
            let folded = match op {
                Opcode::Add => a.wrapping_add(*b),
                Opcode::Sub => a.wrapping_sub(*b),
                Opcode::Mul => a.wrapping_mul(*b),
                _ => return None,
            };
            Some((3, vec![OpInstr::PushInt(folded)]))
        }
        _ => None,
    })
}

fn stack_ops(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "stack_ops", |window| {
        // OP_1 OP_ROLL OP_1 OP_ROLL -> _
        if let [OpInstr::PushInt(1), OpInstr::Op(Opcode::Roll), OpInstr::PushInt(1), OpInstr::Op(Opcode::Roll), ..] =
            window
        {
            return Some((4, Vec::new()));
        }
        match window {
            // OP_0 OP_PICK -> OP_DUP
            [OpInstr::PushInt(0), OpInstr::Op(Opcode::Pick), ..] => Some((2, vec![OpInstr::Op(Opcode::Dup)])),
            // OP_1 OP_PICK -> OP_OVER
            [OpInstr::PushInt(1), OpInstr::Op(Opcode::Pick), ..] => Some((2, vec![OpInstr::Op(Opcode::Over)])),
            // OP_0 OP_ROLL -> _
            [OpInstr::PushInt(0), OpInstr::Op(Opcode::Roll), ..] => Some((2, Vec::new())),
            // OP_1 OP_ROLL -> OP_SWAP
            [OpInstr::PushInt(1), OpInstr::Op(Opcode::Roll), ..] => Some((2, vec![OpInstr::Op(Opcode::Swap)])),
            // OP_DUP OP_DROP -> _
            [OpInstr::Op(Opcode::Dup), OpInstr::Op(Opcode::Drop), ..] => Some((2, Vec::new())),
            // OP_DROP OP_DROP -> OP_2DROP
            [OpInstr::Op(Opcode::Drop), OpInstr::Op(Opcode::Drop), ..] => Some((2, vec![OpInstr::Op(Opcode::TwoDrop)])),
            // OP_OVER OP_OVER -> OP_2DUP
            [OpInstr::Op(Opcode::Over), OpInstr::Op(Opcode::Over), ..] => Some((2, vec![OpInstr::Op(Opcode::TwoDup)])),
            // OP_NIP OP_DROP -> OP_2DROP
            [OpInstr::Op(Opcode::Nip), OpInstr::Op(Opcode::Drop), ..] => Some((2, vec![OpInstr::Op(Opcode::TwoDrop)])),
            _ => None,
        }
    })
}

/// Replace arithmetic with shortcut opcodes: OP_1 OP_ADD -> OP_1ADD etc.
fn arithmetic_shortcut_ops(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "arithmetic_shortcut_ops", |window| match window {
        [OpInstr::PushInt(1), OpInstr::Op(Opcode::Add), ..] => Some((2, vec![OpInstr::Op(Opcode::Add1)])),
        [OpInstr::PushInt(1), OpInstr::Op(Opcode::Sub), ..] => Some((2, vec![OpInstr::Op(Opcode::Sub1)])),
        [OpInstr::PushInt(2), OpInstr::Op(Opcode::Mul), ..] => Some((2, vec![OpInstr::Op(Opcode::Mul2)])),
        [OpInstr::PushInt(2), OpInstr::Op(Opcode::Div), ..] => Some((2, vec![OpInstr::Op(Opcode::Div2)])),
        _ => None,
    })
}

/// OP_SHA256 OP_SHA256 -> OP_HASH256; OP_SHA256 OP_RIPEMD160 -> OP_HASH160.
fn hash_shortcut_ops(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "hash_shortcut_ops", |window| match window {
        [OpInstr::Op(Opcode::Sha256), OpInstr::Op(Opcode::Sha256), ..] => Some((2, vec![OpInstr::Op(Opcode::Hash256)])),
        [OpInstr::Op(Opcode::Sha256), OpInstr::Op(Opcode::Ripemd160), ..] => {
            Some((2, vec![OpInstr::Op(Opcode::Hash160)]))
        }
        _ => None,
    })
}

/// OP_NOT OP_IF -> OP_NOTIF.
fn conditional_shortcut_ops(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "conditional_shortcut_ops", |window| match window {
        [OpInstr::Op(Opcode::Not), OpInstr::Op(Opcode::If), ..] => Some((2, vec![OpInstr::Op(Opcode::NotIf)])),
        _ => None,
    })
}

/// OP_ELSE OP_ENDIF -> OP_ENDIF; OP_IF OP_ENDIF -> OP_DROP.
fn remove_null_conditionals(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "remove_null_conditionals", |window| match window {
        [OpInstr::Op(Opcode::Else), OpInstr::Op(Opcode::EndIf), ..] => Some((2, vec![OpInstr::Op(Opcode::EndIf)])),
        [OpInstr::Op(Opcode::If), OpInstr::Op(Opcode::EndIf), ..] => Some((2, vec![OpInstr::Op(Opcode::Drop)])),
        _ => None,
    })
}

/// OP_NOT OP_NOT -> _
fn double_negation(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "double_negation", |window| match window {
        [OpInstr::Op(Opcode::Not), OpInstr::Op(Opcode::Not), ..] => Some((2, Vec::new())),
        _ => None,
    })
}

/// Verifying a constant that is known truthy is a no-op.
fn constant_verify(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "constant_verify", |window| match window {
        [push, OpInstr::Op(Opcode::Verify), ..] => {
            let truthy = match push {
                OpInstr::PushInt(value) => ConstValue::Int(*value).is_truthy(),
                OpInstr::PushBytes(bytes) => ConstValue::Bytes(bytes.clone()).is_truthy(),
                OpInstr::Op(_) => false,
            };
            if truthy { Some((2, Vec::new())) } else { None }
        }
        _ => None,
    })
}

/// A swap feeding a commutative operation does nothing.
fn commutative_operations(ops: &mut Vec<OpInstr>) -> usize {
    const COMMUTATIVE: &[Opcode] = &[
        Opcode::Add,
        Opcode::Mul,
        Opcode::BoolAnd,
        Opcode::BoolOr,
        Opcode::NumEqual,
        Opcode::NumEqualVerify,
        Opcode::NumNotEqual,
        Opcode::Min,
        Opcode::Max,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Equal,
        Opcode::EqualVerify,
    ];
    rewrite_sites(ops, "commutative_operations", |window| match window {
        [OpInstr::Op(Opcode::Swap), OpInstr::Op(op), ..] if COMMUTATIVE.contains(op) => {
            Some((2, vec![OpInstr::Op(*op)]))
        }
        _ => None,
    })
}

/// A swap feeding a comparison mirrors it: OP_SWAP OP_LESSTHAN computes
/// the same result as OP_GREATERTHAN.
fn comparison_mirror_ops(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "comparison_mirror_ops", |window| {
        let [OpInstr::Op(Opcode::Swap), OpInstr::Op(op), ..] = window else {
            return None;
        };
        let mirrored = match op {
            Opcode::LessThan => Opcode::GreaterThan,
            Opcode::GreaterThan => Opcode::LessThan,
            Opcode::LessThanOrEqual => Opcode::GreaterThanOrEqual,
            Opcode::GreaterThanOrEqual => Opcode::LessThanOrEqual,
            _ => return None,
        };
        Some((2, vec![OpInstr::Op(mirrored)]))
    })
}

/// A pure push that is immediately dropped is never consumed.
fn drop_unconsumed_pushes(ops: &mut Vec<OpInstr>) -> usize {
    rewrite_sites(ops, "drop_unconsumed_pushes", |window| match window {
        [push, OpInstr::Op(Opcode::Drop), ..] if push.is_push() => Some((2, Vec::new())),
        _ => None,
    })
}

/// A trailing OP_VERIFY is redundant: the script already requires a truthy
/// final stack item.
fn remove_trailing_verifications(ops: &mut Vec<OpInstr>) -> usize {
    let mut count = 0;
    while matches!(ops.last(), Some(OpInstr::Op(Opcode::Verify))) {
        debug!(rule = "remove_trailing_verifications", index = ops.len() - 1, "peephole rewrite");
        ops.pop();
        count += 1;
    }
    count
}

/// After OP_RETURN the script is invalid; only data pushes are kept, for
/// the data-embedding idiom.
fn dead_code_elimination(ops: &mut Vec<OpInstr>) {
    let Some(position) = ops.iter().position(|instr| matches!(instr, OpInstr::Op(Opcode::Return))) else {
        return;
    };
    let before = ops.len();
    let tail: Vec<OpInstr> = ops[position + 1..].iter().filter(|instr| instr.is_push()).cloned().collect();
    ops.truncate(position + 1);
    ops.extend(tail);
    if ops.len() != before {
        debug!(dropped = before - ops.len(), "dead code removed after OP_RETURN");
    }
}
