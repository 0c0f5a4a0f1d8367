use serde::Serialize;
use tracing::debug;

use crate::ast::{parse_script_ast, ScriptAst};
use crate::checker::{self, Warning};
use crate::emitter;
use crate::errors::CompilerError;
use crate::ir::OpInstr;
use crate::lower;
use crate::optimizer;

/// Treatment of bare expression statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImplicitPushes {
    Allow,
    #[default]
    Warn,
    Deny,
}

impl ImplicitPushes {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "allow" => Some(Self::Allow),
            "warn" => Some(Self::Warn),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// Output dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Asm,
    Hex,
}

impl Target {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "asm" => Some(Self::Asm),
            "hex" => Some(Self::Hex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Log detail for optimizer rewrites, 0..=3.
    pub verbosity: u8,
    pub implicit_pushes: ImplicitPushes,
    pub optimize: bool,
    pub target: Target,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { verbosity: 0, implicit_pushes: ImplicitPushes::default(), optimize: true, target: Target::default() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledScript {
    pub ops: Vec<OpInstr>,
    pub warnings: Vec<Warning>,
}

impl CompiledScript {
    pub fn asm(&self) -> String {
        emitter::emit_asm(&self.ops)
    }

    pub fn hex(&self) -> String {
        emitter::emit_hex(&self.ops)
    }

    pub fn bytes(&self) -> Vec<u8> {
        emitter::encode(&self.ops)
    }

    pub fn output(&self, target: Target) -> String {
        match target {
            Target::Asm => self.asm(),
            Target::Hex => self.hex(),
        }
    }
}

/// Compile TxScript source to opcode IR.
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledScript, CompilerError> {
    let script = parse_script_ast(source)?;
    compile_script_ast(&script, options)
}

/// Compile an already parsed script.
pub fn compile_script_ast(script: &ScriptAst<'_>, options: &CompileOptions) -> Result<CompiledScript, CompilerError> {
    let warnings = checker::check(script, options)?;
    debug!(statements = script.statements.len(), warnings = warnings.len(), "semantic check passed");

    let mut ops = lower::lower(script, options)?;
    debug!(instructions = ops.len(), "lowering complete");

    if options.optimize {
        optimizer::optimize(&mut ops);
        debug!(instructions = ops.len(), "optimization complete");
    }

    Ok(CompiledScript { ops, warnings })
}
