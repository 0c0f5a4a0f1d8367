use std::collections::HashSet;

use tracing::debug;

use crate::ast::{BinaryOp, Expr, ExprKind, ScriptAst, Statement, Type, UnaryOp};
use crate::builtins;
use crate::compiler::CompileOptions;
use crate::emitter;
use crate::errors::CompilerError;
use crate::ir::{OpInstr, Opcode};
use crate::optimizer;
use crate::span::Span;
use crate::symbols::{Binding, ConstValue, FuncBinding, Symbol, SymbolTable};

/// Lower a checked script to opcode IR.
///
/// Lowering runs in two steps. Statement lowering emits a pre-IR in which
/// every use of a stack assumption is a placeholder carrying the assumed
/// name. A second pass walks that pre-IR with a virtual stack of slots,
/// replaces each placeholder with the stack operations that bring the item
/// to the top at its current depth, and reconciles the stack across
/// conditional branches.
pub fn lower<'i>(script: &ScriptAst<'i>, options: &CompileOptions) -> Result<Vec<OpInstr>, CompilerError> {
    let mut lowerer = Lowerer {
        options: *options,
        table: SymbolTable::new(),
        code: Vec::new(),
        assumed: Vec::new(),
        resolving: HashSet::new(),
    };
    for stmt in &script.statements {
        lowerer.lower_statement(stmt)?;
    }
    let Lowerer { code, assumed, .. } = lowerer;
    resolve_assumptions(code, &assumed)
}

/// Pre-IR instruction: either a finished instruction or a placeholder for
/// a stack-assumption use.
#[derive(Debug, Clone)]
enum LInstr<'i> {
    Instr(OpInstr),
    /// An opcode whose arity depends on its call site (`checkMultiSig`).
    DynEffect { instr: OpInstr, pops: usize, pushes: usize },
    AssumeRef { name: String, span: Span<'i> },
}

struct Lowerer<'i> {
    options: CompileOptions,
    table: SymbolTable<'i>,
    code: Vec<LInstr<'i>>,
    /// Assumed names in declaration order, first name deepest.
    assumed: Vec<String>,
    /// Names currently being substituted, to catch self-references that
    /// arise when a shadowing binding mentions its own name.
    resolving: HashSet<String>,
}

impl<'i> Lowerer<'i> {
    fn lower_statement(&mut self, stmt: &Statement<'i>) -> Result<(), CompilerError> {
        match stmt {
            Statement::Assume { names, .. } => {
                self.table.add_stack_assumptions(names)?;
                self.assumed.extend(names.iter().map(|assumed| assumed.name.clone()));
                Ok(())
            }
            Statement::Let { name, mutable, expr, name_span, .. } => {
                // The expression stays unevaluated and is re-lowered at each
                // use site, so uses observe the current values of mutable
                // bindings it mentions.
                let symbol = self.make_binding_symbol(name, *mutable, expr.clone(), name_span);
                self.table.declare(symbol).map_err(|err| err.with_span(name_span))
            }
            Statement::Assign { name, expr, name_span, .. } => {
                let prepared = self.prepare_expr(expr)?;
                let binding = self.classify_binding(prepared);
                self.table.reassign(name, binding).map_err(|err| err.with_span(name_span))
            }
            Statement::Verify { expr, span } => {
                let prepared = self.prepare_expr(expr)?;
                self.lower_expr(&prepared).map_err(|err| err.with_span(span))?;
                self.emit_op(Opcode::Verify);
                Ok(())
            }
            Statement::Push { expr, span } | Statement::ExprStmt { expr, span } => {
                if let ExprKind::Call { name, .. } = &expr.kind {
                    if name == builtins::MARK_INVALID {
                        self.emit_op(Opcode::Return);
                        return Ok(());
                    }
                }
                let prepared = self.prepare_expr(expr)?;
                self.lower_expr(&prepared).map_err(|err| err.with_span(span))
            }
            Statement::If { condition, then_branch, else_branch, span } => {
                let prepared = self.prepare_expr(condition)?;
                self.lower_expr(&prepared).map_err(|err| err.with_span(span))?;
                self.emit_op(Opcode::If);
                self.table.enter_scope();
                for stmt in then_branch {
                    self.lower_statement(stmt)?;
                }
                self.table.exit_scope();
                if let Some(else_branch) = else_branch {
                    self.emit_op(Opcode::Else);
                    self.table.enter_scope();
                    for stmt in else_branch {
                        self.lower_statement(stmt)?;
                    }
                    self.table.exit_scope();
                }
                self.emit_op(Opcode::EndIf);
                Ok(())
            }
            Statement::FuncDecl { name, ret_ty, params, body, return_expr, name_span, span } => {
                let return_expr = return_expr
                    .clone()
                    .ok_or_else(|| CompilerError::InternalInvariant("function without return".to_string()).with_span(span))?;
                let binding = FuncBinding {
                    ret_ty: *ret_ty,
                    params: params.clone(),
                    body: body.clone(),
                    return_expr,
                    captured: self.table.snapshot(),
                };
                self.table
                    .declare(Symbol::new(name.clone(), Binding::Func(binding), *ret_ty, false, *name_span))
                    .map_err(|err| err.with_span(name_span))
            }
            Statement::Return { span, .. } => {
                Err(CompilerError::InternalInvariant("return statement survived checking".to_string()).with_span(span))
            }
        }
    }

    /// Resolve names by substitution, then fold constants when optimizing.
    fn prepare_expr(&mut self, expr: &Expr<'i>) -> Result<Expr<'i>, CompilerError> {
        let resolved = self.resolve_expr(expr)?;
        if self.options.optimize { Ok(optimizer::fold_expr(&resolved)) } else { Ok(resolved) }
    }

    fn make_binding_symbol(&mut self, name: &str, mutable: bool, prepared: Expr<'i>, name_span: &Span<'i>) -> Symbol<'i> {
        let binding = self.classify_binding(prepared);
        let ty = match &binding {
            Binding::Const(value) => value.ty(),
            _ => Type::Expr,
        };
        Symbol::new(name.to_string(), binding, ty, mutable, *name_span)
    }

    fn classify_binding(&self, prepared: Expr<'i>) -> Binding<'i> {
        match optimizer::const_eval(&prepared) {
            Some(value) => Binding::Const(value),
            None => Binding::Expr(prepared),
        }
    }

    /// Substitute bindings into `expr`: constants become literals, lazy
    /// bindings are spliced in, pure function calls are inlined. Names of
    /// stack assumptions survive untouched.
    fn resolve_expr(&mut self, expr: &Expr<'i>) -> Result<Expr<'i>, CompilerError> {
        match &expr.kind {
            ExprKind::Int(_) | ExprKind::Bytes(_) => Ok(expr.clone()),
            ExprKind::Name(name) => {
                let symbol = self.table.lookup(name).map_err(|err| err.with_span(&expr.span))?;
                let bound = match &symbol.binding {
                    Binding::Const(ConstValue::Int(value)) => return Ok(Expr::new(ExprKind::Int(*value), expr.span)),
                    Binding::Const(ConstValue::Bytes(bytes)) => {
                        return Ok(Expr::new(ExprKind::Bytes(bytes.clone()), expr.span));
                    }
                    Binding::Stack(_) => return Ok(expr.clone()),
                    Binding::Func(_) => {
                        return Err(CompilerError::TypeMismatch(format!(
                            "function '{name}' must be invoked, not used as a value"
                        ))
                        .with_span(&expr.span));
                    }
                    Binding::Expr(bound) => bound.clone(),
                };
                if !self.resolving.insert(name.clone()) {
                    return Err(CompilerError::TypeMismatch(format!(
                        "binding '{name}' refers to itself through shadowing"
                    ))
                    .with_span(&expr.span));
                }
                let resolved = self.resolve_expr(&bound);
                self.resolving.remove(name);
                resolved
            }
            ExprKind::Unary { op, expr: operand } => {
                let operand = self.resolve_expr(operand)?;
                Ok(Expr::new(ExprKind::Unary { op: *op, expr: Box::new(operand) }, expr.span))
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.resolve_expr(left)?;
                let right = self.resolve_expr(right)?;
                Ok(Expr::new(ExprKind::Binary { op: *op, left: Box::new(left), right: Box::new(right) }, expr.span))
            }
            ExprKind::Call { name, args, name_span } => {
                let mut resolved_args = Vec::with_capacity(args.len());
                for arg in args {
                    resolved_args.push(self.resolve_expr(arg)?);
                }

                let func = match self.table.try_lookup(name).map(|symbol| &symbol.binding) {
                    Some(Binding::Func(func)) => Some(func.clone()),
                    _ => None,
                };
                if let Some(func) = func {
                    if func.body.iter().all(is_binding_statement) {
                        return self.inline_pure_call(&func, resolved_args, &expr.span);
                    }
                }
                Ok(Expr::new(ExprKind::Call { name: name.clone(), args: resolved_args, name_span: *name_span }, expr.span))
            }
        }
    }

    /// Inline a function whose body consists only of bindings: the call
    /// collapses to its fully substituted return expression.
    fn inline_pure_call(
        &mut self,
        func: &FuncBinding<'i>,
        args: Vec<Expr<'i>>,
        span: &Span<'i>,
    ) -> Result<Expr<'i>, CompilerError> {
        let guard = self.table.enter_isolated_scope(func.captured.clone());
        let result = (|| {
            self.bind_params(func, args)?;
            for stmt in &func.body {
                self.lower_statement(stmt)?;
            }
            self.resolve_expr(&func.return_expr)
        })();
        self.table.exit_isolated_scope(guard);
        result.map(|mut resolved| {
            resolved.span = *span;
            resolved
        })
    }

    fn bind_params(&mut self, func: &FuncBinding<'i>, args: Vec<Expr<'i>>) -> Result<(), CompilerError> {
        if func.params.len() != args.len() {
            return Err(CompilerError::InternalInvariant("call arity survived checking".to_string()));
        }
        for (param, arg) in func.params.iter().zip(args) {
            let symbol = self.make_binding_symbol(&param.name, false, arg, &param.span);
            self.table.declare(symbol).map_err(|err| err.with_span(&param.span))?;
        }
        Ok(())
    }

    fn lower_expr(&mut self, expr: &Expr<'i>) -> Result<(), CompilerError> {
        match &expr.kind {
            ExprKind::Int(value) => {
                self.emit(OpInstr::PushInt(*value));
                Ok(())
            }
            ExprKind::Bytes(bytes) => {
                self.emit(OpInstr::PushBytes(bytes.clone()));
                Ok(())
            }
            ExprKind::Name(name) => {
                let is_assumption =
                    matches!(self.table.lookup(name).map_err(|err| err.with_span(&expr.span))?.binding, Binding::Stack(_));
                if is_assumption {
                    self.code.push(LInstr::AssumeRef { name: name.clone(), span: expr.span });
                    Ok(())
                } else {
                    // Names bound to values are substituted during
                    // resolution; reaching one here means the expression
                    // was not prepared yet.
                    let resolved = self.resolve_expr(expr)?;
                    self.lower_expr(&resolved)
                }
            }
            ExprKind::Unary { op, expr: operand } => {
                self.lower_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Negate,
                    UnaryOp::Invert => Opcode::Invert,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit_op(opcode);
                Ok(())
            }
            ExprKind::Binary { op, left, right } => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                match op {
                    BinaryOp::Ne => {
                        // != is equality followed by negation.
                        self.emit_op(Opcode::Equal);
                        self.emit_op(Opcode::Not);
                    }
                    other => self.emit_op(binary_opcode(*other)),
                }
                Ok(())
            }
            ExprKind::Call { name, args, name_span } => self.lower_call(name, args, name_span, &expr.span),
        }
    }

    fn lower_call(
        &mut self,
        name: &str,
        args: &[Expr<'i>],
        name_span: &Span<'i>,
        span: &Span<'i>,
    ) -> Result<(), CompilerError> {
        if name == builtins::RAW {
            return self.lower_inner_script(args, span);
        }
        if builtins::VALIDATION_FUNCTIONS.contains(&name) {
            // Validation built-ins run entirely at compile time, whether or
            // not the optimizer is enabled.
            let folded = optimizer::fold_expr(&args[0]);
            let value = optimizer::const_eval(&folded).ok_or_else(|| {
                CompilerError::ValidationFailed(format!("{name}() requires a constant argument")).with_span(span)
            })?;
            let result = builtins::validate_builtin(name, &value).map_err(|err| err.with_span(span))?;
            match result {
                ConstValue::Int(value) => self.emit(OpInstr::PushInt(value)),
                ConstValue::Bytes(bytes) => self.emit(OpInstr::PushBytes(bytes)),
            }
            return Ok(());
        }
        if let Some(func) = builtins::lookup(name) {
            for arg in args {
                self.lower_expr(arg)?;
            }
            if func.nargs.is_none() {
                // The trailing count arguments are emitted as written; the
                // stack arity is the call's argument count.
                self.code.push(LInstr::DynEffect { instr: OpInstr::Op(func.opcode), pops: args.len(), pushes: 1 });
            } else {
                self.emit_op(func.opcode);
            }
            return Ok(());
        }

        let symbol = self.table.lookup(name).map_err(|err| err.with_span(name_span))?;
        let Binding::Func(func) = &symbol.binding else {
            return Err(CompilerError::TypeMismatch(format!("'{name}' is not a function")).with_span(name_span));
        };
        let func = func.clone();
        debug!(function = name, "inlining call");
        let guard = self.table.enter_isolated_scope(func.captured.clone());
        let result = (|| {
            self.bind_params(&func, args.to_vec())?;
            for stmt in &func.body {
                self.lower_statement(stmt)?;
            }
            let prepared = self.prepare_expr(&func.return_expr)?;
            self.lower_expr(&prepared)
        })();
        self.table.exit_isolated_scope(guard);
        result
    }

    /// Lower each argument of `raw(...)` against a fresh virtual stack and
    /// emit the serialized inner script as a single byte push. The inner
    /// bytes are data, so no optimization is applied to them.
    fn lower_inner_script(&mut self, args: &[Expr<'i>], span: &Span<'i>) -> Result<(), CompilerError> {
        let outer = std::mem::take(&mut self.code);
        let result: Result<(), CompilerError> = (|| {
            for arg in args {
                self.lower_expr(arg)?;
            }
            Ok(())
        })();
        let inner = std::mem::replace(&mut self.code, outer);
        result?;
        let ops = resolve_assumptions(inner, &[]).map_err(|err| err.with_span(span))?;
        self.emit(OpInstr::PushBytes(emitter::encode(&ops)));
        Ok(())
    }

    fn emit(&mut self, instr: OpInstr) {
        self.code.push(LInstr::Instr(instr));
    }

    fn emit_op(&mut self, opcode: Opcode) {
        self.emit(OpInstr::Op(opcode));
    }
}

fn is_binding_statement(stmt: &Statement<'_>) -> bool {
    matches!(stmt, Statement::Let { .. } | Statement::Assign { .. })
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Or => Opcode::BoolOr,
        BinaryOp::And => Opcode::BoolAnd,
        BinaryOp::Eq => Opcode::Equal,
        BinaryOp::Lt => Opcode::LessThan,
        BinaryOp::Le => Opcode::LessThanOrEqual,
        BinaryOp::Gt => Opcode::GreaterThan,
        BinaryOp::Ge => Opcode::GreaterThanOrEqual,
        BinaryOp::BitOr => Opcode::Or,
        BinaryOp::BitXor => Opcode::Xor,
        BinaryOp::BitAnd => Opcode::And,
        BinaryOp::Shl => Opcode::LShift,
        BinaryOp::Shr => Opcode::RShift,
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Ne => unreachable!("!= lowers to OP_EQUAL OP_NOT"),
    }
}

/// One slot of the virtual stack.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotOrigin {
    Assumed(String),
    Computed,
    Literal(i64),
}

#[derive(Debug)]
struct BranchFrame {
    entry: Vec<SlotOrigin>,
    then_exit: Option<Vec<SlotOrigin>>,
}

/// Replace assumption placeholders with stack operations, tracking a
/// virtual stack through every instruction.
///
/// A use that is followed by another use of the same name copies the item
/// with `OP_PICK`; the final use moves it with `OP_ROLL`. Conditional
/// branches are reconciled at `OP_ENDIF`: equal-depth branches merge
/// slot-wise, unequal branches invalidate every live assumption.
fn resolve_assumptions<'i>(code: Vec<LInstr<'i>>, assumed: &[String]) -> Result<Vec<OpInstr>, CompilerError> {
    let mut out: Vec<OpInstr> = Vec::new();
    let mut stack: Vec<SlotOrigin> = assumed.iter().map(|name| SlotOrigin::Assumed(name.clone())).collect();
    let mut frames: Vec<BranchFrame> = Vec::new();
    let mut invalidated = false;

    for (index, instr) in code.iter().enumerate() {
        match instr {
            LInstr::Instr(OpInstr::PushInt(value)) => {
                out.push(OpInstr::PushInt(*value));
                stack.push(SlotOrigin::Literal(*value));
            }
            LInstr::Instr(OpInstr::PushBytes(bytes)) => {
                out.push(OpInstr::PushBytes(bytes.clone()));
                stack.push(SlotOrigin::Computed);
            }
            LInstr::Instr(OpInstr::Op(opcode)) => {
                out.push(OpInstr::Op(*opcode));
                apply_opcode(*opcode, &mut stack, &mut frames, &mut invalidated)?;
            }
            LInstr::DynEffect { instr, pops, pushes } => {
                out.push(instr.clone());
                apply_effect(&mut stack, *pops, *pushes)?;
            }
            LInstr::AssumeRef { name, span } => {
                if invalidated {
                    return Err(CompilerError::AssumptionAfterImbalancedBranch(name.clone()).with_span(span));
                }
                let depth = stack
                    .iter()
                    .rev()
                    .position(|slot| matches!(slot, SlotOrigin::Assumed(assumed) if assumed == name))
                    .ok_or_else(|| CompilerError::StackUnderflow.with_span(span))?;
                let later_use = code[index + 1..]
                    .iter()
                    .any(|later| matches!(later, LInstr::AssumeRef { name: later_name, .. } if later_name == name));
                if later_use {
                    // Copy the item to the top; shallow depths have
                    // dedicated opcodes.
                    match depth {
                        0 => out.push(OpInstr::Op(Opcode::Dup)),
                        1 => out.push(OpInstr::Op(Opcode::Over)),
                        _ => {
                            out.push(OpInstr::PushInt(depth as i64));
                            out.push(OpInstr::Op(Opcode::Pick));
                        }
                    }
                    stack.push(SlotOrigin::Computed);
                } else {
                    // Final use: move the item instead of copying it.
                    out.push(OpInstr::PushInt(depth as i64));
                    out.push(OpInstr::Op(Opcode::Roll));
                    let slot_index = stack.len() - 1 - depth;
                    let slot = stack.remove(slot_index);
                    stack.push(slot);
                }
            }
        }
    }

    Ok(out)
}

fn apply_opcode(
    opcode: Opcode,
    stack: &mut Vec<SlotOrigin>,
    frames: &mut Vec<BranchFrame>,
    invalidated: &mut bool,
) -> Result<(), CompilerError> {
    match opcode {
        Opcode::If | Opcode::NotIf => {
            apply_effect(stack, 1, 0)?;
            frames.push(BranchFrame { entry: stack.clone(), then_exit: None });
        }
        Opcode::Else => {
            let frame = frames
                .last_mut()
                .ok_or_else(|| CompilerError::InternalInvariant("OP_ELSE without OP_IF".to_string()))?;
            frame.then_exit = Some(std::mem::replace(stack, frame.entry.clone()));
        }
        Opcode::EndIf => {
            let frame = frames
                .pop()
                .ok_or_else(|| CompilerError::InternalInvariant("OP_ENDIF without OP_IF".to_string()))?;
            let then_exit = frame.then_exit.unwrap_or(frame.entry);
            if then_exit.len() == stack.len() {
                for (slot, other) in stack.iter_mut().zip(then_exit) {
                    if *slot != other {
                        *slot = SlotOrigin::Computed;
                    }
                }
            } else {
                // Unequal net stack effects: assumption depths are no
                // longer well-defined past this point.
                *invalidated = true;
                for slot in stack.iter_mut() {
                    if matches!(slot, SlotOrigin::Assumed(_)) {
                        *slot = SlotOrigin::Computed;
                    }
                }
            }
        }
        Opcode::Pick | Opcode::Roll | Opcode::IfDup => {
            return Err(CompilerError::InternalInvariant(format!("{} emitted outside assumption resolution", opcode.name())));
        }
        _ => {
            let (pops, pushes) = opcode
                .stack_effect()
                .ok_or_else(|| CompilerError::InternalInvariant(format!("{} has no static stack effect", opcode.name())))?;
            apply_effect(stack, pops, pushes)?;
        }
    }
    Ok(())
}

fn apply_effect(stack: &mut Vec<SlotOrigin>, pops: usize, pushes: usize) -> Result<(), CompilerError> {
    if stack.len() < pops {
        return Err(CompilerError::StackUnderflow);
    }
    stack.truncate(stack.len() - pops);
    for _ in 0..pushes {
        stack.push(SlotOrigin::Computed);
    }
    Ok(())
}
