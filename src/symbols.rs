use std::collections::HashMap;

use crate::ast::{AssumedName, Expr, ParamAst, Statement, Type};
use crate::errors::CompilerError;
use crate::span::Span;

/// A fully evaluated constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl ConstValue {
    pub fn ty(&self) -> Type {
        match self {
            ConstValue::Int(_) => Type::Int,
            ConstValue::Bytes(_) => Type::Bytes,
        }
    }

    /// Script truthiness: false for zero and for negative zero encodings.
    pub fn is_truthy(&self) -> bool {
        match self {
            ConstValue::Int(value) => *value != 0,
            ConstValue::Bytes(bytes) => match bytes.split_last() {
                None => false,
                Some((last, rest)) => rest.iter().any(|b| *b != 0) || (*last != 0 && *last != 0x80),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Binding<'i> {
    /// Constant folded at declaration time.
    Const(ConstValue),
    /// Unevaluated expression, re-lowered at each use site.
    Expr(Expr<'i>),
    /// Stack assumption. The payload is the item's depth from the top of
    /// the stack at the point the `assume` statement was processed.
    Stack(usize),
    /// User-defined function, inlined at each call site.
    Func(FuncBinding<'i>),
}

#[derive(Debug, Clone)]
pub struct FuncBinding<'i> {
    pub ret_ty: Type,
    pub params: Vec<ParamAst<'i>>,
    pub body: Vec<Statement<'i>>,
    pub return_expr: Expr<'i>,
    /// Bindings visible at declaration time. Function bodies resolve free
    /// names against this snapshot rather than the caller's environment.
    pub captured: HashMap<String, Symbol<'i>>,
}

#[derive(Debug, Clone)]
pub struct Symbol<'i> {
    pub name: String,
    pub binding: Binding<'i>,
    pub ty: Type,
    pub mutable: bool,
    pub span: Span<'i>,
}

impl<'i> Symbol<'i> {
    pub fn new(name: impl Into<String>, binding: Binding<'i>, ty: Type, mutable: bool, span: Span<'i>) -> Self {
        Self { name: name.into(), binding, ty, mutable, span }
    }
}

/// Lexically scoped name → binding table.
#[derive(Debug)]
pub struct SymbolTable<'i> {
    scopes: Vec<HashMap<String, Symbol<'i>>>,
    /// Scope indices below which lookups must not fall. Function bodies
    /// push a floor so that only their declaration-time snapshot and their
    /// own scopes are visible.
    floors: Vec<usize>,
}

impl<'i> Default for SymbolTable<'i> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'i> SymbolTable<'i> {
    pub fn new() -> Self {
        Self { scopes: vec![HashMap::new()], floors: Vec::new() }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Enter a scope pre-populated with `symbols`, hiding every outer scope.
    /// Used for function bodies, which see the declaration-time snapshot.
    pub fn enter_isolated_scope(&mut self, symbols: HashMap<String, Symbol<'i>>) -> IsolationGuard {
        let sealed_below = self.scopes.len();
        self.floors.push(sealed_below);
        self.scopes.push(symbols);
        self.scopes.push(HashMap::new());
        IsolationGuard { sealed_below }
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn exit_isolated_scope(&mut self, guard: IsolationGuard) {
        self.scopes.truncate(guard.sealed_below);
        self.floors.pop();
    }

    fn floor(&self) -> usize {
        self.floors.last().copied().unwrap_or(0)
    }

    pub fn declare(&mut self, symbol: Symbol<'i>) -> Result<(), CompilerError> {
        let scope = self.scopes.last_mut().expect("at least one scope");
        if scope.contains_key(&symbol.name) {
            return Err(CompilerError::RedeclaredName(symbol.name));
        }
        scope.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Symbol<'i>, CompilerError> {
        self.try_lookup(name).ok_or_else(|| CompilerError::UnknownName(name.to_string()))
    }

    pub fn try_lookup(&self, name: &str) -> Option<&Symbol<'i>> {
        self.scopes[self.floor()..].iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn reassign(&mut self, name: &str, binding: Binding<'i>) -> Result<(), CompilerError> {
        let floor = self.floor();
        for scope in self.scopes[floor..].iter_mut().rev() {
            if let Some(symbol) = scope.get_mut(name) {
                if !symbol.mutable {
                    return Err(CompilerError::ImmutableBinding(name.to_string()));
                }
                // The declared type is preserved across reassignment.
                symbol.binding = binding;
                return Ok(());
            }
        }
        Err(CompilerError::UnknownName(name.to_string()))
    }

    /// Declare the names of an `assume` statement. The last-named item is
    /// at the top of the stack (depth 0).
    pub fn add_stack_assumptions(&mut self, names: &[AssumedName<'i>]) -> Result<(), CompilerError> {
        let count = names.len();
        for (height, assumed) in names.iter().enumerate() {
            let depth = count - height - 1;
            self.declare(Symbol::new(assumed.name.clone(), Binding::Stack(depth), Type::Expr, false, assumed.span))
                .map_err(|err| err.with_span(&assumed.span))?;
        }
        Ok(())
    }

    /// Absolute index of the innermost visible scope declaring `name`.
    pub fn depth_of(&self, name: &str) -> Option<usize> {
        let floor = self.floor();
        self.scopes
            .iter()
            .enumerate()
            .skip(floor)
            .rev()
            .find_map(|(index, scope)| scope.contains_key(name).then_some(index))
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Flatten the visible bindings, inner scopes shadowing outer ones.
    pub fn snapshot(&self) -> HashMap<String, Symbol<'i>> {
        let mut flat = HashMap::new();
        for scope in &self.scopes[self.floor()..] {
            for (name, symbol) in scope {
                flat.insert(name.clone(), symbol.clone());
            }
        }
        flat
    }
}

/// Token returned by `enter_isolated_scope`, consumed on exit.
#[derive(Debug)]
pub struct IsolationGuard {
    sealed_below: usize,
}
