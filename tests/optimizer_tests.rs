use txsc_lang::ast::{BinaryOp, Expr, ExprKind};
use txsc_lang::ir::{OpInstr, Opcode};
use txsc_lang::optimizer::{fold_expr, optimize};

fn op(opcode: Opcode) -> OpInstr {
    OpInstr::Op(opcode)
}

fn optimized(mut ops: Vec<OpInstr>) -> Vec<OpInstr> {
    optimize(&mut ops);
    ops
}

#[test]
fn pick_and_roll_shortcuts() {
    assert_eq!(vec![op(Opcode::Dup)], optimized(vec![OpInstr::PushInt(0), op(Opcode::Pick)]));
    assert_eq!(vec![op(Opcode::Over)], optimized(vec![OpInstr::PushInt(1), op(Opcode::Pick)]));
    assert_eq!(Vec::<OpInstr>::new(), optimized(vec![OpInstr::PushInt(0), op(Opcode::Roll)]));
    assert_eq!(vec![op(Opcode::Swap)], optimized(vec![OpInstr::PushInt(1), op(Opcode::Roll)]));
}

#[test]
fn sequential_rolls_cancel() {
    assert_eq!(
        Vec::<OpInstr>::new(),
        optimized(vec![OpInstr::PushInt(1), op(Opcode::Roll), OpInstr::PushInt(1), op(Opcode::Roll)])
    );
}

#[test]
fn dup_drop_cancels() {
    assert_eq!(Vec::<OpInstr>::new(), optimized(vec![op(Opcode::Dup), op(Opcode::Drop)]));
}

#[test]
fn verify_forms_merge() {
    assert_eq!(vec![op(Opcode::EqualVerify)], optimized(vec![op(Opcode::Equal), op(Opcode::Verify)]));
    assert_eq!(vec![op(Opcode::CheckSigVerify)], optimized(vec![op(Opcode::CheckSig), op(Opcode::Verify)]));
    assert_eq!(
        vec![op(Opcode::CheckMultiSigVerify)],
        optimized(vec![op(Opcode::CheckMultiSig), op(Opcode::Verify)])
    );
}

#[test]
fn constant_pushes_merge_through_arithmetic() {
    assert_eq!(vec![OpInstr::PushInt(5)], optimized(vec![OpInstr::PushInt(2), OpInstr::PushInt(3), op(Opcode::Add)]));
    assert_eq!(vec![OpInstr::PushInt(-1)], optimized(vec![OpInstr::PushInt(2), OpInstr::PushInt(3), op(Opcode::Sub)]));
    assert_eq!(vec![OpInstr::PushInt(6)], optimized(vec![OpInstr::PushInt(2), OpInstr::PushInt(3), op(Opcode::Mul)]));
}

#[test]
fn arithmetic_shortcuts() {
    // The two constants merge first; a lone 1 ADD becomes OP_1ADD.
    assert_eq!(vec![op(Opcode::Dup), op(Opcode::Add1)], optimized(vec![op(Opcode::Dup), OpInstr::PushInt(1), op(Opcode::Add)]));
    assert_eq!(vec![op(Opcode::Dup), op(Opcode::Sub1)], optimized(vec![op(Opcode::Dup), OpInstr::PushInt(1), op(Opcode::Sub)]));
    assert_eq!(vec![op(Opcode::Dup), op(Opcode::Mul2)], optimized(vec![op(Opcode::Dup), OpInstr::PushInt(2), op(Opcode::Mul)]));
    assert_eq!(vec![op(Opcode::Dup), op(Opcode::Div2)], optimized(vec![op(Opcode::Dup), OpInstr::PushInt(2), op(Opcode::Div)]));
}

#[test]
fn hash_shortcuts() {
    assert_eq!(vec![op(Opcode::Hash256)], optimized(vec![op(Opcode::Sha256), op(Opcode::Sha256)]));
    assert_eq!(vec![op(Opcode::Hash160)], optimized(vec![op(Opcode::Sha256), op(Opcode::Ripemd160)]));
}

#[test]
fn not_if_shortcut() {
    assert_eq!(
        vec![op(Opcode::NotIf), op(Opcode::EndIf)],
        optimized(vec![op(Opcode::Not), op(Opcode::If), op(Opcode::EndIf)])
    );
}

#[test]
fn empty_conditionals_collapse() {
    assert_eq!(vec![op(Opcode::Drop)], optimized(vec![op(Opcode::If), op(Opcode::Else), op(Opcode::EndIf)]));
}

#[test]
fn double_negation_cancels() {
    assert_eq!(Vec::<OpInstr>::new(), optimized(vec![op(Opcode::Not), op(Opcode::Not)]));
}

#[test]
fn truthy_constant_verify_is_removed() {
    assert_eq!(Vec::<OpInstr>::new(), optimized(vec![OpInstr::PushInt(1), op(Opcode::Verify)]));
    assert_eq!(Vec::<OpInstr>::new(), optimized(vec![OpInstr::PushBytes(vec![0x05]), op(Opcode::Verify)]));
}

#[test]
fn falsy_constant_verify_is_preserved() {
    // The trailing-verify rule may drop the opcode, but the falsy push
    // survives so the script still always fails.
    assert_eq!(
        vec![OpInstr::PushInt(0), op(Opcode::Verify), OpInstr::PushInt(5)],
        optimized(vec![OpInstr::PushInt(0), op(Opcode::Verify), OpInstr::PushInt(5)])
    );
    // Negative zero is falsy under script truthiness rules.
    assert_eq!(
        vec![OpInstr::PushBytes(vec![0x80]), op(Opcode::Verify), OpInstr::PushInt(5)],
        optimized(vec![OpInstr::PushBytes(vec![0x80]), op(Opcode::Verify), OpInstr::PushInt(5)])
    );
}

#[test]
fn swap_before_commutative_op_is_removed() {
    assert_eq!(vec![op(Opcode::Add)], optimized(vec![op(Opcode::Swap), op(Opcode::Add)]));
    assert_eq!(vec![op(Opcode::Equal)], optimized(vec![op(Opcode::Swap), op(Opcode::Equal)]));
}

#[test]
fn swap_before_comparison_mirrors_it() {
    assert_eq!(vec![op(Opcode::GreaterThan)], optimized(vec![op(Opcode::Swap), op(Opcode::LessThan)]));
    assert_eq!(vec![op(Opcode::LessThanOrEqual)], optimized(vec![op(Opcode::Swap), op(Opcode::GreaterThanOrEqual)]));
}

#[test]
fn dead_code_after_return_keeps_only_pushes() {
    let ops = vec![
        op(Opcode::Return),
        op(Opcode::Dup),
        OpInstr::PushBytes(vec![0x11, 0x22]),
        op(Opcode::CheckSig),
        OpInstr::PushInt(7),
    ];
    assert_eq!(
        vec![op(Opcode::Return), OpInstr::PushBytes(vec![0x11, 0x22]), OpInstr::PushInt(7)],
        optimized(ops)
    );
}

#[test]
fn trailing_verify_is_removed() {
    assert_eq!(vec![op(Opcode::Size)], optimized(vec![op(Opcode::Size), op(Opcode::Verify)]));
}

#[test]
fn optimization_is_idempotent() {
    let programs = vec![
        vec![OpInstr::PushInt(0), op(Opcode::Pick), op(Opcode::Hash160), op(Opcode::Equal), op(Opcode::Verify)],
        vec![OpInstr::PushInt(2), OpInstr::PushInt(3), op(Opcode::Add), OpInstr::PushInt(5), op(Opcode::Equal)],
        vec![op(Opcode::Return), op(Opcode::Dup), OpInstr::PushBytes(vec![0xaa])],
    ];
    for program in programs {
        let once = optimized(program);
        let twice = optimized(once.clone());
        assert_eq!(once, twice);
    }
}

#[test]
fn fold_collapses_constant_arithmetic() {
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::int(5)),
            right: Box::new(Expr::int(12)),
        },
        Default::default(),
    );
    let folded = fold_expr(&expr);
    assert!(matches!(folded.kind, ExprKind::Int(17)), "folded to {:?}", folded.kind);
}

#[test]
fn fold_is_idempotent() {
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Eq,
            left: Box::new(Expr::call("concat", vec![Expr::bytes(vec![0x11]), Expr::bytes(vec![0x22])])),
            right: Box::new(Expr::bytes(vec![0x11, 0x22])),
        },
        Default::default(),
    );
    let once = fold_expr(&expr);
    let twice = fold_expr(&once);
    assert_eq!(once, twice);
    assert!(matches!(once.kind, ExprKind::Int(1)), "folded to {:?}", once.kind);
}

#[test]
fn fold_leaves_names_and_impure_calls_alone() {
    let expr = Expr::call("checkSig", vec![Expr::name("sig"), Expr::name("pubkey")]);
    let folded = fold_expr(&expr);
    assert_eq!(expr, folded);

    let division_by_zero = Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Div,
            left: Box::new(Expr::int(1)),
            right: Box::new(Expr::int(0)),
        },
        Default::default(),
    );
    assert_eq!(division_by_zero, fold_expr(&division_by_zero));
}

#[test]
fn fold_evaluates_pure_builtins() {
    let expr = Expr::call("min", vec![Expr::int(3), Expr::int(8)]);
    assert!(matches!(fold_expr(&expr).kind, ExprKind::Int(3)));

    let expr = Expr::call("within", vec![Expr::int(5), Expr::int(1), Expr::int(10)]);
    assert!(matches!(fold_expr(&expr).kind, ExprKind::Int(1)));

    let expr = Expr::call("size", vec![Expr::bytes(vec![1, 2, 3])]);
    assert!(matches!(fold_expr(&expr).kind, ExprKind::Int(3)));
}
