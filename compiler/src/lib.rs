pub mod ast;
pub mod error;
pub mod lex;
pub mod lower;
pub mod options;
pub mod parse;
pub mod tuple;

use tracing::{debug, instrument};
use noja_bytecode::{Executable, ForwardArena, Source, Span};

pub use ast::Ast;
pub use error::{CompileError, Diagnostic, Error, SyntaxError};
pub use lower::{compile, compile_with};
pub use options::Options;

/// Lexes and parses the whole source text.
#[instrument(skip_all, fields(source = source.name()))]
pub fn parse_source(source: &Source) -> Result<Ast<'_>, Error> {
    let toks = lex::lex(source.text()).map_err(|errs| {
        errs.iter()
            .map(|e| {
                let span = e.span();
                let found = source.text()
                    .get(span.start..)
                    .and_then(|rest| rest.chars().next())
                    .map(String::from);
                SyntaxError { span: Span::new(span.start, span.end - span.start), found }
            })
            .collect::<Vec<_>>()
    })?;
    debug!(tokens = toks.len(), "lexed");

    Ok(parse::parse(source, toks)?)
}

/// Source text to executable in one go.
pub fn compile_source<'a>(
    source: &'a Source,
    arena: Option<&mut ForwardArena>,
    options: &Options,
) -> Result<Executable<'a>, Error> {
    let ast = parse_source(source)?;
    Ok(compile_with(&ast, arena, options)?)
}
