use txsc_lang::ast::{AssumedName, Type};
use txsc_lang::errors::CompilerError;
use txsc_lang::symbols::{Binding, ConstValue, Symbol, SymbolTable};

fn int_symbol(name: &str, value: i64, mutable: bool) -> Symbol<'static> {
    Symbol::new(name, Binding::Const(ConstValue::Int(value)), Type::Int, mutable, Default::default())
}

#[test]
fn declare_and_lookup() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("foo", 1, false)).expect("declare succeeds");

    let symbol = table.lookup("foo").expect("lookup succeeds");
    assert_eq!("foo", symbol.name);
    assert_eq!(Type::Int, symbol.ty);
    assert!(!symbol.mutable);
    assert!(matches!(symbol.binding, Binding::Const(ConstValue::Int(1))));
}

#[test]
fn lookup_of_missing_name_fails() {
    let table = SymbolTable::new();
    let err = table.lookup("missing").expect_err("lookup fails");
    assert!(matches!(err, CompilerError::UnknownName(name) if name == "missing"));
}

#[test]
fn redeclaration_in_same_scope_fails() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("foo", 1, false)).expect("declare succeeds");
    let err = table.declare(int_symbol("foo", 2, false)).expect_err("redeclare fails");
    assert!(matches!(err, CompilerError::RedeclaredName(name) if name == "foo"));
}

#[test]
fn inner_scope_shadows_and_unwinds() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("foo", 1, false)).expect("declare succeeds");

    table.enter_scope();
    table.declare(int_symbol("foo", 2, false)).expect("shadowing declare succeeds");
    assert!(matches!(table.lookup("foo").unwrap().binding, Binding::Const(ConstValue::Int(2))));

    table.exit_scope();
    assert!(matches!(table.lookup("foo").unwrap().binding, Binding::Const(ConstValue::Int(1))));
}

#[test]
fn reassign_respects_mutability() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("frozen", 1, false)).expect("declare succeeds");
    table.declare(int_symbol("counter", 1, true)).expect("declare succeeds");

    let err = table.reassign("frozen", Binding::Const(ConstValue::Int(2))).expect_err("reassign fails");
    assert!(matches!(err, CompilerError::ImmutableBinding(name) if name == "frozen"));

    table.reassign("counter", Binding::Const(ConstValue::Int(2))).expect("reassign succeeds");
    assert!(matches!(table.lookup("counter").unwrap().binding, Binding::Const(ConstValue::Int(2))));

    let err = table.reassign("missing", Binding::Const(ConstValue::Int(2))).expect_err("reassign fails");
    assert!(matches!(err, CompilerError::UnknownName(_)));
}

#[test]
fn reassignment_preserves_declared_type() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("counter", 1, true)).expect("declare succeeds");
    table.reassign("counter", Binding::Const(ConstValue::Bytes(vec![0x11]))).expect("reassign succeeds");
    assert_eq!(Type::Int, table.lookup("counter").unwrap().ty);
}

#[test]
fn stack_assumptions_are_depth_indexed_from_the_top() {
    let mut table = SymbolTable::new();
    let names: Vec<AssumedName<'static>> =
        ["a", "b", "c"].iter().map(|name| AssumedName { name: name.to_string(), span: Default::default() }).collect();
    table.add_stack_assumptions(&names).expect("assumptions declared");

    let depth_of = |name: &str| match table.lookup(name).unwrap().binding {
        Binding::Stack(depth) => depth,
        ref other => panic!("expected stack binding, got {other:?}"),
    };
    // The last-named assumption sits on top of the stack.
    assert_eq!(2, depth_of("a"));
    assert_eq!(1, depth_of("b"));
    assert_eq!(0, depth_of("c"));
    assert_eq!(Type::Expr, table.lookup("a").unwrap().ty);
}

#[test]
fn isolated_scopes_hide_the_outside() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("outer", 1, false)).expect("declare succeeds");
    table.declare(int_symbol("captured", 7, false)).expect("declare succeeds");

    let mut snapshot = std::collections::HashMap::new();
    snapshot.insert("captured".to_string(), table.lookup("captured").unwrap().clone());

    let guard = table.enter_isolated_scope(snapshot);
    assert!(table.lookup("outer").is_err());
    assert!(matches!(table.lookup("captured").unwrap().binding, Binding::Const(ConstValue::Int(7))));

    table.declare(int_symbol("local", 3, false)).expect("declare succeeds");
    table.exit_isolated_scope(guard);

    assert!(table.lookup("outer").is_ok());
    assert!(table.lookup("local").is_err());
}

#[test]
fn snapshot_flattens_with_inner_scopes_winning() {
    let mut table = SymbolTable::new();
    table.declare(int_symbol("foo", 1, false)).expect("declare succeeds");
    table.enter_scope();
    table.declare(int_symbol("foo", 2, false)).expect("declare succeeds");
    table.declare(int_symbol("bar", 3, false)).expect("declare succeeds");

    let snapshot = table.snapshot();
    assert_eq!(2, snapshot.len());
    assert!(matches!(snapshot["foo"].binding, Binding::Const(ConstValue::Int(2))));
    assert!(matches!(snapshot["bar"].binding, Binding::Const(ConstValue::Int(3))));
}

#[test]
fn const_value_truthiness_follows_script_rules() {
    assert!(ConstValue::Int(1).is_truthy());
    assert!(ConstValue::Int(-1).is_truthy());
    assert!(!ConstValue::Int(0).is_truthy());
    assert!(ConstValue::Bytes(vec![0x01]).is_truthy());
    assert!(!ConstValue::Bytes(Vec::new()).is_truthy());
    assert!(!ConstValue::Bytes(vec![0x00, 0x00]).is_truthy());
    // Negative zero.
    assert!(!ConstValue::Bytes(vec![0x00, 0x80]).is_truthy());
    assert!(ConstValue::Bytes(vec![0x01, 0x80]).is_truthy());
}
