use txsc_lang::ast::{parse_script_ast, BinaryOp, ExprKind, Statement, Type, UnaryOp};
use txsc_lang::errors::CompilerError;

fn parse_statements(source: &str) -> Vec<Statement<'_>> {
    parse_script_ast(source).expect("parse succeeds").statements
}

fn parse_err(source: &str) -> CompilerError {
    parse_script_ast(source).expect_err("parse fails")
}

#[test]
fn parses_empty_and_comment_only_sources() {
    assert!(parse_statements("").is_empty());
    assert!(parse_statements("# comment\n   \n# another\n").is_empty());
}

#[test]
fn parses_assume_statement() {
    let statements = parse_statements("assume sig, pubkey;");
    let [Statement::Assume { names, .. }] = statements.as_slice() else {
        panic!("expected a single assume, got {statements:?}");
    };
    let names: Vec<&str> = names.iter().map(|assumed| assumed.name.as_str()).collect();
    assert_eq!(vec!["sig", "pubkey"], names);
}

#[test]
fn parses_let_with_mutability() {
    let statements = parse_statements("let a = 1; let mutable b = 2;");
    assert!(matches!(&statements[0], Statement::Let { name, mutable: false, .. } if name == "a"));
    assert!(matches!(&statements[1], Statement::Let { name, mutable: true, .. } if name == "b"));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let statements = parse_statements("1 + 2 * 3;");
    let [Statement::ExprStmt { expr, .. }] = statements.as_slice() else {
        panic!("expected expression statement");
    };
    let ExprKind::Binary { op: BinaryOp::Add, right, .. } = &expr.kind else {
        panic!("expected addition at the root, got {:?}", expr.kind);
    };
    assert!(matches!(&right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn comparison_binds_looser_than_shift() {
    let statements = parse_statements("1 << 2 < 3;");
    let [Statement::ExprStmt { expr, .. }] = statements.as_slice() else {
        panic!("expected expression statement");
    };
    let ExprKind::Binary { op: BinaryOp::Lt, left, .. } = &expr.kind else {
        panic!("expected comparison at the root, got {:?}", expr.kind);
    };
    assert!(matches!(&left.kind, ExprKind::Binary { op: BinaryOp::Shl, .. }));
}

#[test]
fn boolean_operators_bind_loosest() {
    let statements = parse_statements("not a and b == 1;");
    let [Statement::ExprStmt { expr, .. }] = statements.as_slice() else {
        panic!("expected expression statement");
    };
    let ExprKind::Binary { op: BinaryOp::And, left, right } = &expr.kind else {
        panic!("expected 'and' at the root, got {:?}", expr.kind);
    };
    assert!(matches!(&left.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
    assert!(matches!(&right.kind, ExprKind::Binary { op: BinaryOp::Eq, .. }));
}

#[test]
fn augmented_assignment_desugars_to_binary_op() {
    let statements = parse_statements("a += 2;");
    let [Statement::Assign { name, expr, .. }] = statements.as_slice() else {
        panic!("expected assignment");
    };
    assert_eq!("a", name);
    let ExprKind::Binary { op: BinaryOp::Add, left, .. } = &expr.kind else {
        panic!("expected desugared addition, got {:?}", expr.kind);
    };
    assert!(matches!(&left.kind, ExprKind::Name(target) if target == "a"));
}

#[test]
fn parses_number_literals() {
    let statements = parse_statements("5; 0x10; 0xff;");
    let values: Vec<i64> = statements
        .iter()
        .map(|stmt| match stmt {
            Statement::ExprStmt { expr, .. } => match expr.kind {
                ExprKind::Int(value) => value,
                ref other => panic!("expected int literal, got {other:?}"),
            },
            other => panic!("expected expression statement, got {other:?}"),
        })
        .collect();
    assert_eq!(vec![5, 16, 255], values);
}

#[test]
fn parses_byte_and_string_literals() {
    let statements = parse_statements(r#"'1122'; "hi";"#);
    assert!(matches!(&statements[0], Statement::ExprStmt { expr, .. }
        if matches!(&expr.kind, ExprKind::Bytes(bytes) if bytes == &vec![0x11, 0x22])));
    assert!(matches!(&statements[1], Statement::ExprStmt { expr, .. }
        if matches!(&expr.kind, ExprKind::Bytes(bytes) if bytes == b"hi")));
}

#[test]
fn odd_length_hex_literal_is_invalid() {
    let err = parse_err("'123';");
    assert!(matches!(err.root(), CompilerError::InvalidLiteral(_)), "unexpected error: {err}");
}

#[test]
fn function_declaration_splits_trailing_return() {
    let statements = parse_statements("func int addFive(x) { let y = 5; return x + y; }");
    let [Statement::FuncDecl { name, ret_ty, params, body, return_expr, .. }] = statements.as_slice() else {
        panic!("expected function declaration");
    };
    assert_eq!("addFive", name);
    assert_eq!(Type::Int, *ret_ty);
    assert_eq!(1, params.len());
    assert_eq!(1, body.len());
    assert!(return_expr.is_some());
}

#[test]
fn if_else_parses_into_branches() {
    let statements = parse_statements("if a == 1 { 2; } else { 3; }");
    let [Statement::If { then_branch, else_branch, .. }] = statements.as_slice() else {
        panic!("expected if statement");
    };
    assert_eq!(1, then_branch.len());
    assert_eq!(1, else_branch.as_ref().map(Vec::len).unwrap_or_default());
}

#[test]
fn call_expressions_carry_arguments() {
    let statements = parse_statements("checkSig(sig, pubkey);");
    let [Statement::ExprStmt { expr, .. }] = statements.as_slice() else {
        panic!("expected expression statement");
    };
    let ExprKind::Call { name, args, .. } = &expr.kind else {
        panic!("expected call, got {:?}", expr.kind);
    };
    assert_eq!("checkSig", name);
    assert_eq!(2, args.len());
}

#[test]
fn identifiers_may_not_start_with_underscore_or_digit() {
    assert!(parse_script_ast("_a;").is_err());
    assert!(parse_script_ast("let _x = 1;").is_err());
    assert!(parse_script_ast("let 1x = 1;").is_err());
}

#[test]
fn keywords_are_not_identifiers() {
    assert!(parse_script_ast("let if = 1;").is_err());
    assert!(parse_script_ast("let verify = 1;").is_err());
}

#[test]
fn keyword_prefixed_identifiers_are_allowed() {
    let statements = parse_statements("let note = 1; let iffy = 2;");
    assert!(matches!(&statements[0], Statement::Let { name, .. } if name == "note"));
    assert!(matches!(&statements[1], Statement::Let { name, .. } if name == "iffy"));
}

#[test]
fn missing_semicolon_is_interpreted() {
    let err = parse_err("1 + 2");
    let CompilerError::Parse(diagnostic) = err.root() else {
        panic!("expected parse diagnostic, got {err}");
    };
    assert_eq!("missing_semicolon", diagnostic.code());
}

#[test]
fn statements_carry_spans() {
    let source = "let a = 1;\nverify a == 1;";
    let statements = parse_statements(source);
    let span = statements[1].span();
    assert_eq!((2, 1), span.line_col());
}
