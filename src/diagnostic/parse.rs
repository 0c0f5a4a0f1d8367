use std::fmt;

use crate::parser::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseErrorInterpretation {
    MissingSemicolon,
    MissingBlock,
    Unclassified,
}

impl ParseErrorInterpretation {
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingSemicolon => "missing_semicolon",
            Self::MissingBlock => "missing_block",
            Self::Unclassified => "parse_error",
        }
    }
}

/// A parse failure interpreted for display: what went wrong, where, and
/// what the parser would have accepted there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    interpretation: ParseErrorInterpretation,
    span: ErrorSpan,
    message: String,
    expected: Vec<String>,
    help: Option<&'static str>,
    line: usize,
    column: usize,
    line_text: String,
}

impl ParseDiagnostic {
    pub fn code(&self) -> &'static str {
        self.interpretation.code()
    }

    pub fn interpretation(&self) -> ParseErrorInterpretation {
        self.interpretation
    }

    pub fn span(&self) -> ErrorSpan {
        self.span
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    pub fn help(&self) -> Option<&str> {
        self.help
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "line {}, column {}: {}", self.line, self.column, self.message)?;
        if !self.line_text.is_empty() {
            let gutter = format!("{:>5} | ", self.line);
            writeln!(f, "{gutter}{}", self.line_text)?;
            writeln!(f, "{}^", " ".repeat(gutter.len() + self.column.saturating_sub(1)))?;
        }
        if !self.expected.is_empty() {
            writeln!(f, "  note: expected one of: {}", self.expected.join(", "))?;
        }
        if let Some(help) = self.help {
            writeln!(f, "  help: {help}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseDiagnostic {}

pub(crate) fn interpret_parse_error(input: &str, err: &pest::error::Error<Rule>) -> ParseDiagnostic {
    let failure = failure_offset(err, input);
    let positives = match &err.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } => positives.clone(),
        pest::error::ErrorVariant::CustomError { .. } => Vec::new(),
    };

    let (interpretation, anchor) = classify(input, failure, &positives);
    let (message, help) = match interpretation {
        ParseErrorInterpretation::MissingSemicolon => {
            ("expected ';' to terminate the statement".to_string(), Some("TxScript statements end with ';'"))
        }
        ParseErrorInterpretation::MissingBlock => (
            "expected a '{' block".to_string(),
            Some("if branches and func bodies are brace-delimited blocks of statements"),
        ),
        ParseErrorInterpretation::Unclassified => (err.variant.message().into_owned(), None),
    };

    let (line, column, line_text) = locate(input, anchor);
    ParseDiagnostic {
        interpretation,
        span: ErrorSpan { start: anchor, end: anchor },
        message,
        expected: describe_expected(&positives),
        help,
        line,
        column,
        line_text,
    }
}

/// Rules pest reports while trying to continue an expression. Failing on
/// one of these at a statement boundary almost always means the
/// terminating semicolon is missing.
const EXPRESSION_CONTINUATION_RULES: &[Rule] = &[
    Rule::eq_op,
    Rule::cmp_op,
    Rule::or_op,
    Rule::xor_op,
    Rule::and_op,
    Rule::shift_op,
    Rule::add_op,
    Rule::mul_op,
    Rule::kw_and,
    Rule::kw_or,
];

/// Decide what the failure means and which offset the caret should sit on.
fn classify(input: &str, failure: usize, positives: &[Rule]) -> (ParseErrorInterpretation, usize) {
    if positives.contains(&Rule::block) {
        return (ParseErrorInterpretation::MissingBlock, failure);
    }
    if positives.iter().any(|rule| EXPRESSION_CONTINUATION_RULES.contains(rule)) {
        return (ParseErrorInterpretation::MissingSemicolon, statement_end(input, failure));
    }
    // Running out of input on a source whose last statement is unclosed
    // reads as a missing terminator too.
    let trimmed = input.trim_end();
    if !trimmed.is_empty() && failure >= trimmed.len() && !trimmed.ends_with(';') && !trimmed.ends_with('}') {
        return (ParseErrorInterpretation::MissingSemicolon, statement_end(input, failure));
    }
    (ParseErrorInterpretation::Unclassified, failure)
}

/// The offset of the last visible character before `failure`, where the
/// missing semicolon belongs. A closing delimiter at the failure itself is
/// kept as the anchor so the caret does not drift into the previous line.
fn statement_end(input: &str, failure: usize) -> usize {
    let failure = failure.min(input.len());
    if matches!(input.as_bytes().get(failure), Some(b')' | b'}')) {
        return failure;
    }
    input[..failure]
        .char_indices()
        .rev()
        .find(|(_, ch)| !ch.is_whitespace())
        .map(|(offset, _)| offset)
        .unwrap_or(failure)
}

fn failure_offset(err: &pest::error::Error<Rule>, input: &str) -> usize {
    let offset = match err.location {
        pest::error::InputLocation::Pos(pos) => pos,
        pest::error::InputLocation::Span((start, _)) => start,
    };
    offset.min(input.len())
}

/// 1-based line and column of `offset`, plus the text of that line.
fn locate(input: &str, offset: usize) -> (usize, usize, String) {
    let offset = offset.min(input.len());
    let before = &input[..offset];
    let line = before.bytes().filter(|byte| *byte == b'\n').count() + 1;
    let line_start = before.rfind('\n').map(|index| index + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    let line_text = input[line_start..].lines().next().unwrap_or("").to_string();
    (line, column, line_text)
}

/// Render pest's expected rules as TxScript surface tokens, deduplicated
/// and in a stable order.
fn describe_expected(positives: &[Rule]) -> Vec<String> {
    let mut described: Vec<String> = positives.iter().map(|rule| describe_rule(*rule).to_string()).collect();
    described.sort();
    described.dedup();
    described
}

fn describe_rule(rule: Rule) -> &'static str {
    match rule {
        Rule::eq_op => "'==' or '!='",
        Rule::cmp_op => "a comparison operator",
        Rule::or_op => "'|'",
        Rule::xor_op => "'^'",
        Rule::and_op => "'&'",
        Rule::shift_op => "'<<' or '>>'",
        Rule::add_op => "'+' or '-'",
        Rule::mul_op => "'*', '/' or '%'",
        Rule::assign_op => "'='",
        Rule::aug_op => "an augmented assignment operator",
        Rule::unary_op => "'-', '~' or 'not'",
        Rule::kw_and => "'and'",
        Rule::kw_or => "'or'",
        Rule::kw_not => "'not'",
        Rule::kw_else => "'else'",
        Rule::kw_mutable => "'mutable'",
        Rule::identifier => "a name",
        Rule::NumberLiteral => "an integer literal",
        Rule::HexBytesLiteral => "a hex byte literal",
        Rule::StringLiteral => "a string literal",
        Rule::literal => "a literal",
        Rule::type_name => "a type name (int, bytes or expr)",
        Rule::param_list => "a parameter list",
        Rule::expression_list => "call arguments",
        Rule::block => "a '{' block",
        Rule::statement => "a statement",
        Rule::expression
        | Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::comparison
        | Rule::bit_or
        | Rule::bit_xor
        | Rule::bit_and
        | Rule::shift
        | Rule::term
        | Rule::factor
        | Rule::unary
        | Rule::primary
        | Rule::parenthesized
        | Rule::function_call => "an expression",
        Rule::EOI => "end of input",
        _ => "valid TxScript syntax",
    }
}
