use pest::error::Error;
use pest::iterators::Pairs;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "txscript.pest"]
pub struct TxScriptParser;

pub fn parse_source_file(input: &str) -> Result<Pairs<'_, Rule>, Error<Rule>> {
    TxScriptParser::parse(Rule::source_file, input)
}

pub fn parse_expression(input: &str) -> Result<Pairs<'_, Rule>, Error<Rule>> {
    TxScriptParser::parse(Rule::expression, input)
}
