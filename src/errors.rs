use thiserror::Error;

pub use crate::diagnostic::{ErrorSpan, ParseDiagnostic, ParseErrorInterpretation};
use crate::span;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseDiagnostic),
    #[error("unknown name: {0}")]
    UnknownName(String),
    #[error("name is already declared in this scope: {0}")]
    RedeclaredName(String),
    #[error("cannot reassign immutable binding: {0}")]
    ImmutableBinding(String),
    #[error("assume must be the first statement of a script")]
    MisplacedAssume,
    #[error("assumption '{0}' is unusable after conditional branches with unequal stack effects")]
    AssumptionAfterImbalancedBranch(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("{name} expects {expected} argument(s), got {got}")]
    ArityMismatch { name: String, expected: usize, got: usize },
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("expression requires more stack items than are available")]
    StackUnderflow,
    #[error("bare expression statements are denied by configuration")]
    ImplicitPushDenied,
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
    #[error("{source}")]
    Context {
        #[source]
        source: Box<CompilerError>,
        span: ErrorSpan,
    },
}

impl CompilerError {
    pub fn root(&self) -> &CompilerError {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn span(&self) -> Option<ErrorSpan> {
        match self {
            Self::Context { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub fn with_span(self, span: &span::Span<'_>) -> Self {
        if self.span().is_some() || matches!(self.root(), Self::Parse(_)) {
            return self;
        }
        Self::Context { source: Box::new(self), span: ErrorSpan { start: span.start(), end: span.end() } }
    }
}
