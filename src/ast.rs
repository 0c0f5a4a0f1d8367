use std::fmt;

use pest::iterators::Pair;
use serde::Serialize;

use crate::diagnostic::interpret_parse_error;
use crate::errors::CompilerError;
use crate::parser::{parse_source_file, Rule};
pub use crate::span::Span;

#[derive(Debug, Clone)]
struct Identifier<'i> {
    name: String,
    span: Span<'i>,
}

/// The three source-level types. `Expr` is the polymorphic type used when a
/// value's type cannot be determined statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Int,
    Bytes,
    Expr,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::Int => "int",
            Type::Bytes => "bytes",
            Type::Expr => "expr",
        }
    }

    /// Whether a value of this type can be used where `other` is required.
    pub fn unifies_with(&self, other: Type) -> bool {
        matches!(self, Type::Expr) || matches!(other, Type::Expr) || *self == other
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptAst<'i> {
    pub statements: Vec<Statement<'i>>,
    #[serde(skip)]
    pub span: Span<'i>,
}

impl<'i> fmt::Display for ScriptAst<'i> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pretty = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&pretty)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssumedName<'i> {
    pub name: String,
    #[serde(skip)]
    pub span: Span<'i>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamAst<'i> {
    pub name: String,
    #[serde(skip)]
    pub span: Span<'i>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Statement<'i> {
    Assume {
        names: Vec<AssumedName<'i>>,
        #[serde(skip)]
        span: Span<'i>,
    },
    Let {
        name: String,
        mutable: bool,
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
        #[serde(skip)]
        name_span: Span<'i>,
    },
    Assign {
        name: String,
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
        #[serde(skip)]
        name_span: Span<'i>,
    },
    Verify {
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
    },
    Push {
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
    },
    ExprStmt {
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
    },
    If {
        condition: Expr<'i>,
        then_branch: Vec<Statement<'i>>,
        else_branch: Option<Vec<Statement<'i>>>,
        #[serde(skip)]
        span: Span<'i>,
    },
    FuncDecl {
        name: String,
        ret_ty: Type,
        params: Vec<ParamAst<'i>>,
        body: Vec<Statement<'i>>,
        return_expr: Option<Expr<'i>>,
        #[serde(skip)]
        span: Span<'i>,
        #[serde(skip)]
        name_span: Span<'i>,
    },
    /// A `return` anywhere other than the end of a function body. The parser
    /// folds a trailing return into `FuncDecl::return_expr`; any instance
    /// that survives to the checker is rejected there.
    Return {
        expr: Expr<'i>,
        #[serde(skip)]
        span: Span<'i>,
    },
}

impl<'i> Statement<'i> {
    pub fn span(&self) -> Span<'i> {
        match self {
            Statement::Assume { span, .. }
            | Statement::Let { span, .. }
            | Statement::Assign { span, .. }
            | Statement::Verify { span, .. }
            | Statement::Push { span, .. }
            | Statement::ExprStmt { span, .. }
            | Statement::If { span, .. }
            | Statement::FuncDecl { span, .. }
            | Statement::Return { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expr<'i> {
    pub kind: ExprKind<'i>,
    #[serde(skip)]
    pub span: Span<'i>,
}

impl<'i> Expr<'i> {
    pub fn new(kind: ExprKind<'i>, span: Span<'i>) -> Self {
        Self { kind, span }
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Int(value), Span::default())
    }

    pub fn bytes(value: Vec<u8>) -> Self {
        Self::new(ExprKind::Bytes(value), Span::default())
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(ExprKind::Name(value.into()), Span::default())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr<'i>>) -> Self {
        Self::new(ExprKind::Call { name: name.into(), args, name_span: Span::default() }, Span::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExprKind<'i> {
    Int(i64),
    Bytes(Vec<u8>),
    Name(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr<'i>>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr<'i>>,
        right: Box<Expr<'i>>,
    },
    Call {
        name: String,
        args: Vec<Expr<'i>>,
        #[serde(skip)]
        name_span: Span<'i>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not",
        }
    }
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

pub fn parse_script_ast(source: &str) -> Result<ScriptAst<'_>, CompilerError> {
    let mut pairs = parse_source_file(source).map_err(|err| CompilerError::Parse(interpret_parse_error(source, &err)))?;
    let source_pair = pairs.next().ok_or_else(|| CompilerError::InternalInvariant("empty parse result".to_string()))?;
    let span = Span::from(source_pair.as_span());

    let mut statements = Vec::new();
    for pair in source_pair.into_inner() {
        if pair.as_rule() == Rule::statement {
            statements.push(parse_statement(pair)?);
        }
    }

    Ok(ScriptAst { statements, span })
}

fn parse_statement<'i>(pair: Pair<'i, Rule>) -> Result<Statement<'i>, CompilerError> {
    let inner = single_inner(pair)?;
    let span = Span::from(inner.as_span());
    match inner.as_rule() {
        Rule::assume_stmt => {
            let mut names = Vec::new();
            for name_pair in inner.into_inner() {
                if name_pair.as_rule() == Rule::identifier {
                    let Identifier { name, span } = parse_identifier(name_pair)?;
                    names.push(AssumedName { name, span });
                }
            }
            Ok(Statement::Assume { names, span })
        }
        Rule::let_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // kw_let
            let mut mutable = false;
            let mut next = parts.next().ok_or_else(|| missing("binding name"))?;
            if next.as_rule() == Rule::kw_mutable {
                mutable = true;
                next = parts.next().ok_or_else(|| missing("binding name"))?;
            }
            let Identifier { name, span: name_span } = parse_identifier(next)?;
            parts.next(); // assign_op
            let expr_pair = parts.next().ok_or_else(|| missing("binding expression"))?;
            let expr = parse_expression_pair(expr_pair).map_err(|err| err.with_span(&span))?;
            Ok(Statement::Let { name, mutable, expr, span, name_span })
        }
        Rule::assign_stmt => {
            let mut parts = inner.into_inner();
            let Identifier { name, span: name_span } = parse_identifier(parts.next().ok_or_else(|| missing("assignment target"))?)?;
            parts.next(); // assign_op
            let expr_pair = parts.next().ok_or_else(|| missing("assignment expression"))?;
            let expr = parse_expression_pair(expr_pair).map_err(|err| err.with_span(&span))?;
            Ok(Statement::Assign { name, expr, span, name_span })
        }
        Rule::aug_assign_stmt => {
            let mut parts = inner.into_inner();
            let Identifier { name, span: name_span } = parse_identifier(parts.next().ok_or_else(|| missing("assignment target"))?)?;
            let op_pair = parts.next().ok_or_else(|| missing("assignment operator"))?;
            let op = map_augmented_op(op_pair.as_str())?;
            let expr_pair = parts.next().ok_or_else(|| missing("assignment expression"))?;
            let rhs = parse_expression_pair(expr_pair).map_err(|err| err.with_span(&span))?;
            // `x op= e` desugars to `x = x op e`.
            let target = Expr::new(ExprKind::Name(name.clone()), name_span);
            let expr =
                Expr::new(ExprKind::Binary { op, left: Box::new(target), right: Box::new(rhs) }, span);
            Ok(Statement::Assign { name, expr, span, name_span })
        }
        Rule::verify_stmt => {
            let expr = parse_keyword_expr(inner).map_err(|err| err.with_span(&span))?;
            Ok(Statement::Verify { expr, span })
        }
        Rule::push_stmt => {
            let expr = parse_keyword_expr(inner).map_err(|err| err.with_span(&span))?;
            Ok(Statement::Push { expr, span })
        }
        Rule::return_stmt => {
            let expr = parse_keyword_expr(inner).map_err(|err| err.with_span(&span))?;
            Ok(Statement::Return { expr, span })
        }
        Rule::expr_stmt => {
            let expr_pair = single_inner(inner)?;
            let expr = parse_expression_pair(expr_pair).map_err(|err| err.with_span(&span))?;
            Ok(Statement::ExprStmt { expr, span })
        }
        Rule::if_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // kw_if
            let cond_pair = parts.next().ok_or_else(|| missing("if condition"))?;
            let condition = parse_expression_pair(cond_pair).map_err(|err| err.with_span(&span))?;
            let then_pair = parts.next().ok_or_else(|| missing("if body"))?;
            let then_branch = parse_block(then_pair)?;
            let mut else_branch = None;
            if parts.next().is_some() {
                // kw_else consumed; the block follows
                let else_pair = parts.next().ok_or_else(|| missing("else body"))?;
                else_branch = Some(parse_block(else_pair)?);
            }
            Ok(Statement::If { condition, then_branch, else_branch, span })
        }
        Rule::func_decl => parse_func_decl(inner, span),
        other => Err(CompilerError::InternalInvariant(format!("unexpected statement rule: {other:?}"))),
    }
}

/// Parse the single expression of a `verify`/`push`/`return` statement,
/// skipping the leading keyword pair.
fn parse_keyword_expr<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    let mut parts = pair.into_inner();
    parts.next(); // keyword
    let expr_pair = parts.next().ok_or_else(|| missing("expression"))?;
    parse_expression_pair(expr_pair)
}

fn parse_block<'i>(pair: Pair<'i, Rule>) -> Result<Vec<Statement<'i>>, CompilerError> {
    let mut statements = Vec::new();
    for stmt_pair in pair.into_inner() {
        if stmt_pair.as_rule() == Rule::statement {
            statements.push(parse_statement(stmt_pair)?);
        }
    }
    Ok(statements)
}

fn parse_func_decl<'i>(pair: Pair<'i, Rule>, span: Span<'i>) -> Result<Statement<'i>, CompilerError> {
    let mut parts = pair.into_inner();
    parts.next(); // kw_func
    let type_pair = parts.next().ok_or_else(|| missing("function return type"))?;
    let ret_ty = parse_type_name(type_pair.as_str())?;
    let Identifier { name, span: name_span } = parse_identifier(parts.next().ok_or_else(|| missing("function name"))?)?;

    let mut params = Vec::new();
    let mut body_pair = parts.next().ok_or_else(|| missing("function body"))?;
    if body_pair.as_rule() == Rule::param_list {
        for param in body_pair.into_inner() {
            if param.as_rule() == Rule::identifier {
                let Identifier { name, span } = parse_identifier(param)?;
                params.push(ParamAst { name, span });
            }
        }
        body_pair = parts.next().ok_or_else(|| missing("function body"))?;
    }

    let mut body = parse_block(body_pair)?;
    let return_expr = match body.last() {
        Some(Statement::Return { .. }) => {
            let Some(Statement::Return { expr, .. }) = body.pop() else { unreachable!() };
            Some(expr)
        }
        _ => None,
    };

    Ok(Statement::FuncDecl { name, ret_ty, params, body, return_expr, span, name_span })
}

pub fn parse_type_name(raw: &str) -> Result<Type, CompilerError> {
    match raw {
        "int" => Ok(Type::Int),
        "bytes" => Ok(Type::Bytes),
        "expr" => Ok(Type::Expr),
        other => Err(CompilerError::InvalidLiteral(format!("unknown type name '{other}'"))),
    }
}

fn parse_expression_pair<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    match pair.as_rule() {
        Rule::expression => parse_expression_pair(single_inner(pair)?),
        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::comparison
        | Rule::bit_or
        | Rule::bit_xor
        | Rule::bit_and
        | Rule::shift
        | Rule::term
        | Rule::factor => parse_infix(pair),
        Rule::unary => parse_unary(pair),
        Rule::primary => parse_primary(single_inner(pair)?),
        Rule::parenthesized => parse_expression_pair(single_inner(pair)?),
        Rule::literal => parse_literal(single_inner(pair)?),
        Rule::identifier => {
            let Identifier { name, span } = parse_identifier(pair)?;
            Ok(Expr::new(ExprKind::Name(name), span))
        }
        Rule::function_call => parse_function_call(pair),
        other => Err(CompilerError::InternalInvariant(format!("unexpected expression rule: {other:?}"))),
    }
}

fn parse_infix<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or_else(|| missing("operand"))?;
    let mut expr = parse_expression_pair(first)?;
    while let Some(op_pair) = inner.next() {
        let op = map_binary_op(op_pair.as_str())?;
        let rhs_pair = inner.next().ok_or_else(|| missing("right operand"))?;
        let rhs = parse_expression_pair(rhs_pair)?;
        let span = expr.span.join(&rhs.span);
        expr = Expr::new(ExprKind::Binary { op, left: Box::new(expr), right: Box::new(rhs) }, span);
    }
    Ok(expr)
}

fn parse_unary<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    let span = Span::from(pair.as_span());
    let mut inner = pair.into_inner();
    let mut ops = Vec::new();
    while let Some(next) = inner.peek() {
        if next.as_rule() != Rule::unary_op {
            break;
        }
        let op = match inner.next().expect("checked").as_str() {
            "-" => UnaryOp::Neg,
            "~" => UnaryOp::Invert,
            "not" => UnaryOp::Not,
            other => return Err(CompilerError::InternalInvariant(format!("unknown unary operator '{other}'"))),
        };
        ops.push(op);
    }

    let operand = inner.next().ok_or_else(|| missing("unary operand"))?;
    let mut expr = parse_expression_pair(operand)?;
    for op in ops.into_iter().rev() {
        expr = Expr::new(ExprKind::Unary { op, expr: Box::new(expr) }, span);
    }
    Ok(expr)
}

fn parse_primary<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    match pair.as_rule() {
        Rule::parenthesized => parse_expression_pair(single_inner(pair)?),
        Rule::literal => parse_literal(single_inner(pair)?),
        Rule::identifier => {
            let Identifier { name, span } = parse_identifier(pair)?;
            Ok(Expr::new(ExprKind::Name(name), span))
        }
        Rule::function_call => parse_function_call(pair),
        other => Err(CompilerError::InternalInvariant(format!("unexpected primary rule: {other:?}"))),
    }
}

fn parse_function_call<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    let span = Span::from(pair.as_span());
    let mut inner = pair.into_inner();
    let Identifier { name, span: name_span } = parse_identifier(inner.next().ok_or_else(|| missing("function name"))?)?;

    let mut args = Vec::new();
    if let Some(list_pair) = inner.next() {
        for arg_pair in list_pair.into_inner() {
            if arg_pair.as_rule() == Rule::expression {
                args.push(parse_expression_pair(arg_pair)?);
            }
        }
    }
    Ok(Expr::new(ExprKind::Call { name, args, name_span }, span))
}

fn parse_literal<'i>(pair: Pair<'i, Rule>) -> Result<Expr<'i>, CompilerError> {
    let span = Span::from(pair.as_span());
    match pair.as_rule() {
        Rule::NumberLiteral => {
            let value = parse_number(pair.as_str()).map_err(|err| err.with_span(&span))?;
            Ok(Expr::new(ExprKind::Int(value), span))
        }
        Rule::HexBytesLiteral => {
            let raw = pair.as_str().trim_matches('\'');
            let bytes = decode_hex(raw).map_err(|err| err.with_span(&span))?;
            Ok(Expr::new(ExprKind::Bytes(bytes), span))
        }
        Rule::StringLiteral => {
            let raw = pair.as_str();
            let value = &raw[1..raw.len() - 1];
            Ok(Expr::new(ExprKind::Bytes(value.as_bytes().to_vec()), span))
        }
        other => Err(CompilerError::InternalInvariant(format!("unexpected literal rule: {other:?}"))),
    }
}

fn parse_number(raw: &str) -> Result<i64, CompilerError> {
    let result = match raw.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => raw.parse::<i64>(),
    };
    result.map_err(|_| CompilerError::InvalidLiteral(format!("integer literal '{raw}' is out of range")))
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, CompilerError> {
    if raw.len() % 2 != 0 {
        return Err(CompilerError::InvalidLiteral(format!("odd-length hex literal '{raw}'")));
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&raw[i..i + 2], 16)
                .map_err(|_| CompilerError::InvalidLiteral(format!("invalid hex literal '{raw}'")))
        })
        .collect()
}

fn parse_identifier<'i>(pair: Pair<'i, Rule>) -> Result<Identifier<'i>, CompilerError> {
    if pair.as_rule() != Rule::identifier {
        return Err(CompilerError::InternalInvariant(format!("expected identifier, got {:?}", pair.as_rule())));
    }
    Ok(Identifier { name: pair.as_str().to_string(), span: Span::from(pair.as_span()) })
}

fn map_binary_op(raw: &str) -> Result<BinaryOp, CompilerError> {
    let op = match raw {
        "or" => BinaryOp::Or,
        "and" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "|" => BinaryOp::BitOr,
        "^" => BinaryOp::BitXor,
        "&" => BinaryOp::BitAnd,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        other => return Err(CompilerError::InternalInvariant(format!("unknown binary operator '{other}'"))),
    };
    Ok(op)
}

fn map_augmented_op(raw: &str) -> Result<BinaryOp, CompilerError> {
    let base = raw.strip_suffix('=').unwrap_or(raw);
    map_binary_op(base)
}

fn single_inner<'i>(pair: Pair<'i, Rule>) -> Result<Pair<'i, Rule>, CompilerError> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| CompilerError::InternalInvariant(format!("rule {rule:?} has no inner pair")))
}

fn missing(what: &str) -> CompilerError {
    CompilerError::InternalInvariant(format!("missing {what}"))
}
