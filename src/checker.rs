use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::ast::{BinaryOp, Expr, ExprKind, ScriptAst, Statement, Type, UnaryOp};
use crate::builtins;
use crate::compiler::{CompileOptions, ImplicitPushes};
use crate::errors::CompilerError;
use crate::span::Span;
use crate::symbols::{Binding, FuncBinding, Symbol, SymbolTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    ImplicitPush { line: usize, column: usize },
    UnusedBinding { name: String, line: usize, column: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ImplicitPush { line, column } => {
                write!(f, "{line}:{column}: bare expression statement pushes its value implicitly")
            }
            Warning::UnusedBinding { name, line, column } => {
                write!(f, "{line}:{column}: binding '{name}' is never used")
            }
        }
    }
}

/// Single semantic pass: resolves names, types every expression, enforces
/// operator/built-in contracts and function shape, and collects warnings.
/// The AST is not mutated.
pub fn check<'i>(script: &ScriptAst<'i>, options: &CompileOptions) -> Result<Vec<Warning>, CompilerError> {
    let mut checker = Checker {
        table: SymbolTable::new(),
        options: *options,
        warnings: Vec::new(),
        used: HashSet::new(),
        let_bindings: Vec::new(),
        branch_floors: Vec::new(),
        in_function: false,
    };
    checker.check_script(script)?;
    Ok(checker.warnings)
}

struct Checker<'i> {
    table: SymbolTable<'i>,
    options: CompileOptions,
    warnings: Vec<Warning>,
    used: HashSet<String>,
    let_bindings: Vec<(String, Span<'i>)>,
    /// Scope counts at each open conditional branch. Reassigning a binding
    /// declared below the innermost floor would make its value depend on
    /// which branch ran, which lazy bindings cannot represent.
    branch_floors: Vec<usize>,
    in_function: bool,
}

impl<'i> Checker<'i> {
    fn check_script(&mut self, script: &ScriptAst<'i>) -> Result<(), CompilerError> {
        for (index, stmt) in script.statements.iter().enumerate() {
            if matches!(stmt, Statement::Assume { .. }) && index != 0 {
                return Err(CompilerError::MisplacedAssume.with_span(&stmt.span()));
            }
            self.check_statement(stmt, true)?;
        }

        for (name, span) in std::mem::take(&mut self.let_bindings) {
            if !self.used.contains(&name) {
                let (line, column) = span.line_col();
                self.warnings.push(Warning::UnusedBinding { name, line, column });
            }
        }
        Ok(())
    }

    fn check_statement(&mut self, stmt: &Statement<'i>, top_level: bool) -> Result<(), CompilerError> {
        match stmt {
            Statement::Assume { names, span } => {
                if !top_level || self.in_function {
                    return Err(CompilerError::MisplacedAssume.with_span(span));
                }
                self.table.add_stack_assumptions(names)
            }
            Statement::Let { name, mutable, expr, span, name_span } => {
                let ty = self.infer_expr(expr)?;
                if !self.expr_is_pure(expr) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "expected pure expression for binding '{name}'; use verify or push for observable results"
                    ))
                    .with_span(span));
                }
                self.table
                    .declare(Symbol::new(name.clone(), Binding::Expr(expr.clone()), ty, *mutable, *name_span))
                    .map_err(|err| err.with_span(name_span))?;
                if !self.in_function {
                    self.let_bindings.push((name.clone(), *name_span));
                }
                Ok(())
            }
            Statement::Assign { name, expr, span, name_span } => {
                let ty = self.infer_expr(expr)?;
                let declared = self.table.lookup(name).map_err(|err| err.with_span(name_span))?.ty;
                if let Some(floor) = self.branch_floors.last() {
                    if self.table.depth_of(name).is_some_and(|depth| depth < *floor) {
                        return Err(CompilerError::TypeMismatch(format!(
                            "cannot reassign '{name}' declared outside a conditional branch"
                        ))
                        .with_span(span));
                    }
                }
                if !ty.unifies_with(declared) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "cannot assign {ty} to '{name}' declared as {declared}"
                    ))
                    .with_span(span));
                }
                if !self.expr_is_pure(expr) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "expected pure expression for binding '{name}'; use verify or push for observable results"
                    ))
                    .with_span(span));
                }
                self.table.reassign(name, Binding::Expr(expr.clone())).map_err(|err| err.with_span(name_span))
            }
            Statement::Verify { expr, .. } => {
                self.infer_expr(expr)?;
                Ok(())
            }
            Statement::Push { expr, span } => {
                if self.in_function {
                    return Err(CompilerError::TypeMismatch(
                        "stack pushes are not allowed inside function bodies".to_string(),
                    )
                    .with_span(span));
                }
                self.infer_expr(expr)?;
                Ok(())
            }
            Statement::ExprStmt { expr, span } => {
                if let ExprKind::Call { name, args, .. } = &expr.kind {
                    if name == builtins::MARK_INVALID {
                        if !args.is_empty() {
                            return Err(CompilerError::ArityMismatch {
                                name: name.clone(),
                                expected: 0,
                                got: args.len(),
                            }
                            .with_span(span));
                        }
                        return Ok(());
                    }
                }
                if self.in_function {
                    return Err(CompilerError::TypeMismatch(
                        "stack pushes are not allowed inside function bodies".to_string(),
                    )
                    .with_span(span));
                }
                match self.options.implicit_pushes {
                    ImplicitPushes::Allow => {}
                    ImplicitPushes::Warn => {
                        let (line, column) = span.line_col();
                        self.warnings.push(Warning::ImplicitPush { line, column });
                    }
                    ImplicitPushes::Deny => return Err(CompilerError::ImplicitPushDenied.with_span(span)),
                }
                self.infer_expr(expr)?;
                Ok(())
            }
            Statement::If { condition, then_branch, else_branch, .. } => {
                self.infer_expr(condition)?;
                self.branch_floors.push(self.table.scope_count());
                let result = self.check_branch(then_branch).and_then(|()| {
                    else_branch.as_ref().map_or(Ok(()), |else_branch| self.check_branch(else_branch))
                });
                self.branch_floors.pop();
                result
            }
            Statement::FuncDecl { name, ret_ty, params, body, return_expr, span, name_span } => {
                if self.in_function || !top_level {
                    return Err(CompilerError::TypeMismatch(
                        "functions may only be declared at the top level".to_string(),
                    )
                    .with_span(span));
                }
                let return_expr = return_expr.as_ref().ok_or_else(|| {
                    CompilerError::TypeMismatch(format!("function '{name}' must end in exactly one return"))
                        .with_span(span)
                })?;
                if body.iter().any(contains_return) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "function '{name}' must end in exactly one return"
                    ))
                    .with_span(span));
                }

                // Check the body against the declaration-time snapshot, with
                // parameters bound as polymorphic expressions.
                let snapshot = self.table.snapshot();
                let guard = self.table.enter_isolated_scope(snapshot.clone());
                for param in params {
                    self.table
                        .declare(Symbol::new(param.name.clone(), Binding::Expr(Expr::name(param.name.clone())), Type::Expr, false, param.span))
                        .map_err(|err| err.with_span(&param.span))?;
                }
                let was_in_function = self.in_function;
                self.in_function = true;
                let result = (|| -> Result<(), CompilerError> {
                    for stmt in body {
                        self.check_statement(stmt, false)?;
                    }
                    let ret_found = self.infer_expr(return_expr)?;
                    if !ret_found.unifies_with(*ret_ty) {
                        return Err(CompilerError::TypeMismatch(format!(
                            "function '{name}' declared {ret_ty} but returns {ret_found}"
                        ))
                        .with_span(&return_expr.span));
                    }
                    Ok(())
                })();
                self.in_function = was_in_function;
                self.table.exit_isolated_scope(guard);
                result?;

                let binding = FuncBinding {
                    ret_ty: *ret_ty,
                    params: params.clone(),
                    body: body.clone(),
                    return_expr: return_expr.clone(),
                    captured: snapshot,
                };
                self.table
                    .declare(Symbol::new(name.clone(), Binding::Func(binding), *ret_ty, false, *name_span))
                    .map_err(|err| err.with_span(name_span))
            }
            Statement::Return { span, .. } => {
                let message = if self.in_function {
                    "return must be the final statement of a function body"
                } else {
                    "return outside of a function"
                };
                Err(CompilerError::TypeMismatch(message.to_string()).with_span(span))
            }
        }
    }

    fn check_branch(&mut self, branch: &[Statement<'i>]) -> Result<(), CompilerError> {
        self.table.enter_scope();
        let result = branch.iter().try_for_each(|stmt| self.check_statement(stmt, false));
        self.table.exit_scope();
        result
    }

    fn infer_expr(&mut self, expr: &Expr<'i>) -> Result<Type, CompilerError> {
        match &expr.kind {
            ExprKind::Int(_) => Ok(Type::Int),
            ExprKind::Bytes(_) => Ok(Type::Bytes),
            ExprKind::Name(name) => {
                let symbol = self.table.lookup(name).map_err(|err| err.with_span(&expr.span))?;
                if matches!(symbol.binding, Binding::Func(_)) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "function '{name}' must be invoked, not used as a value"
                    ))
                    .with_span(&expr.span));
                }
                let ty = symbol.ty;
                self.used.insert(name.clone());
                Ok(ty)
            }
            ExprKind::Unary { op, expr: operand } => {
                let operand_ty = self.infer_expr(operand)?;
                match op {
                    UnaryOp::Neg => {
                        self.require(operand_ty, Type::Int, "-", &operand.span)?;
                        Ok(Type::Int)
                    }
                    UnaryOp::Invert => Ok(operand_ty),
                    UnaryOp::Not => Ok(Type::Int),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.infer_expr(left)?;
                let right_ty = self.infer_expr(right)?;
                self.infer_binary(*op, left_ty, right_ty, &expr.span)
            }
            ExprKind::Call { name, args, name_span } => self.infer_call(name, args, name_span, &expr.span),
        }
    }

    fn infer_binary(&self, op: BinaryOp, left: Type, right: Type, span: &Span<'i>) -> Result<Type, CompilerError> {
        match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Shl
            | BinaryOp::Shr => {
                self.require(left, Type::Int, op.as_str(), span)?;
                self.require(right, Type::Int, op.as_str(), span)?;
                Ok(Type::Int)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.require(left, Type::Int, op.as_str(), span)?;
                self.require(right, Type::Int, op.as_str(), span)?;
                Ok(Type::Int)
            }
            BinaryOp::And | BinaryOp::Or => Ok(Type::Int),
            BinaryOp::Eq | BinaryOp::Ne => {
                if !left.unifies_with(right) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "'{}' requires matching operand types, got {left} and {right}",
                        op.as_str()
                    ))
                    .with_span(span));
                }
                Ok(Type::Int)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if !left.unifies_with(right) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "'{}' requires matching operand types, got {left} and {right}",
                        op.as_str()
                    ))
                    .with_span(span));
                }
                if matches!(left, Type::Expr) { Ok(right) } else { Ok(left) }
            }
        }
    }

    fn infer_call(
        &mut self,
        name: &str,
        args: &[Expr<'i>],
        name_span: &Span<'i>,
        span: &Span<'i>,
    ) -> Result<Type, CompilerError> {
        if name == builtins::MARK_INVALID {
            return Err(CompilerError::TypeMismatch(format!("{name}() cannot be used as a value")).with_span(span));
        }
        if name == builtins::RAW {
            for arg in args {
                self.infer_expr(arg)?;
            }
            return Ok(Type::Bytes);
        }
        if builtins::VALIDATION_FUNCTIONS.contains(&name) {
            if args.len() != 1 {
                return Err(CompilerError::ArityMismatch { name: name.to_string(), expected: 1, got: args.len() }
                    .with_span(span));
            }
            let found = self.infer_expr(&args[0])?;
            if !found.unifies_with(Type::Bytes) {
                return Err(
                    CompilerError::TypeMismatch(format!("{name}() expects bytes, got {found}")).with_span(&args[0].span)
                );
            }
            return Ok(Type::Bytes);
        }
        if let Some(func) = builtins::lookup(name) {
            if let Some(expected) = func.nargs {
                if args.len() != expected {
                    return Err(CompilerError::ArityMismatch { name: name.to_string(), expected, got: args.len() }
                        .with_span(span));
                }
                for (arg, required) in args.iter().zip(func.arg_types) {
                    let found = self.infer_expr(arg)?;
                    if !found.unifies_with(*required) {
                        return Err(CompilerError::TypeMismatch(format!(
                            "{name}() expects {required}, got {found}"
                        ))
                        .with_span(&arg.span));
                    }
                }
            } else {
                if args.len() < 2 {
                    return Err(CompilerError::ArityMismatch { name: name.to_string(), expected: 2, got: args.len() }
                        .with_span(span));
                }
                for arg in args {
                    self.infer_expr(arg)?;
                }
            }
            return Ok(func.ret_ty);
        }

        for arg in args {
            self.infer_expr(arg)?;
        }
        let symbol = self.table.lookup(name).map_err(|err| err.with_span(name_span))?;
        let Binding::Func(func) = &symbol.binding else {
            return Err(CompilerError::TypeMismatch(format!("'{name}' is not a function")).with_span(name_span));
        };
        if func.params.len() != args.len() {
            return Err(CompilerError::ArityMismatch {
                name: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            }
            .with_span(span));
        }
        let ret_ty = func.ret_ty;
        self.used.insert(name.to_string());
        Ok(ret_ty)
    }

    fn require(&self, found: Type, required: Type, operator: &str, span: &Span<'i>) -> Result<(), CompilerError> {
        if found.unifies_with(required) {
            Ok(())
        } else {
            Err(CompilerError::TypeMismatch(format!("'{operator}' expects {required} operands, got {found}"))
                .with_span(span))
        }
    }

    /// Whether lowering `expr` more than once (or not at all) would change
    /// observable behavior.
    fn expr_is_pure(&self, expr: &Expr<'i>) -> bool {
        match &expr.kind {
            ExprKind::Int(_) | ExprKind::Bytes(_) => true,
            ExprKind::Name(name) => {
                // A name's own binding was proven pure when it was declared.
                self.table.try_lookup(name).is_some()
            }
            ExprKind::Unary { expr, .. } => self.expr_is_pure(expr),
            ExprKind::Binary { left, right, .. } => self.expr_is_pure(left) && self.expr_is_pure(right),
            ExprKind::Call { name, args, .. } => {
                if builtins::SIDE_EFFECT_FUNCTIONS.contains(&name.as_str()) || name == builtins::MARK_INVALID {
                    return false;
                }
                if let Ok(symbol) = self.table.lookup(name) {
                    if let Binding::Func(func) = &symbol.binding {
                        if func.body.iter().any(statement_has_side_effects) || !self.expr_is_pure(&func.return_expr) {
                            return false;
                        }
                    }
                }
                args.iter().all(|arg| self.expr_is_pure(arg))
            }
        }
    }
}

fn contains_return(stmt: &Statement<'_>) -> bool {
    match stmt {
        Statement::Return { .. } => true,
        Statement::If { then_branch, else_branch, .. } => {
            then_branch.iter().any(contains_return)
                || else_branch.as_ref().is_some_and(|branch| branch.iter().any(contains_return))
        }
        _ => false,
    }
}

fn statement_has_side_effects(stmt: &Statement<'_>) -> bool {
    match stmt {
        Statement::Verify { .. } => true,
        Statement::If { then_branch, else_branch, .. } => {
            then_branch.iter().any(statement_has_side_effects)
                || else_branch.as_ref().is_some_and(|branch| branch.iter().any(statement_has_side_effects))
        }
        Statement::Let { expr, .. } | Statement::Assign { expr, .. } => expr_has_side_effect_call(expr),
        _ => false,
    }
}

fn expr_has_side_effect_call(expr: &Expr<'_>) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Bytes(_) | ExprKind::Name(_) => false,
        ExprKind::Unary { expr, .. } => expr_has_side_effect_call(expr),
        ExprKind::Binary { left, right, .. } => expr_has_side_effect_call(left) || expr_has_side_effect_call(right),
        ExprKind::Call { name, args, .. } => {
            builtins::SIDE_EFFECT_FUNCTIONS.contains(&name.as_str())
                || name == builtins::MARK_INVALID
                || args.iter().any(expr_has_side_effect_call)
        }
    }
}
