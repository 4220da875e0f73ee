use std::fmt::{Display, Write};
use noja_bytecode::{BuildError, Source, Span};

/// Reasons an otherwise well-formed tree cannot be lowered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("tuple outside of assignment or return statement")]
    StrayTuple { span: Span },
    #[error("assigning to {count} variables only 1 value")]
    ArityMismatch { count: usize, span: Span },
    #[error("assigning to something that can't be assigned to")]
    NotAssignable { span: Span },
    #[error("break not inside a loop")]
    BreakOutsideLoop { span: Span },
    #[error("tuple has more than {limit} items")]
    TupleTooLong { limit: usize, span: Span },
    #[error("nested more than {limit} levels deep")]
    TooDeep { limit: usize, span: Span },
    #[error("out of memory")]
    OutOfMemory,
    /// the lowering pass misused the builder
    #[error("internal compiler error: {0}")]
    Internal(#[source] BuildError),
}

impl From<BuildError> for CompileError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::OutOfMemory => CompileError::OutOfMemory,
            e => CompileError::Internal(e),
        }
    }
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::StrayTuple { span } |
            CompileError::ArityMismatch { span, .. } |
            CompileError::NotAssignable { span } |
            CompileError::BreakOutsideLoop { span } |
            CompileError::TupleTooLong { span, .. } |
            CompileError::TooDeep { span, .. } => Some(*span),
            CompileError::OutOfMemory |
            CompileError::Internal(_) => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}

impl Diagnostic for CompileError {
    fn span(&self) -> Option<Span> {
        CompileError::span(self)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unexpected {}", .found.as_deref().unwrap_or("end of input"))]
pub struct SyntaxError {
    pub span: Span,
    /// `None` at the end of the input
    pub found: Option<String>,
}

impl Diagnostic for SyntaxError {
    fn span(&self) -> Option<Span> {
        Some(self.span)
    }
}

/// Anything that can go wrong between source text and executable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{}", .0.first().map(ToString::to_string).unwrap_or_default())]
    Syntax(Vec<SyntaxError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl From<Vec<SyntaxError>> for Error {
    fn from(errs: Vec<SyntaxError>) -> Self {
        Error::Syntax(errs)
    }
}

impl Error {
    /// every diagnostic, one after another
    pub fn render(&self, source: &Source, color: bool) -> String {
        match self {
            Error::Syntax(errs) => errs.iter()
                .map(|e| e.render(source, color))
                .collect(),
            Error::Compile(e) => e.render(source, color),
        }
    }
}

pub trait Diagnostic: Display {
    fn span(&self) -> Option<Span>;

    /// ```text
    /// error: break not inside a loop
    ///  --> demo.noja:3:5
    ///   |
    /// 3 |     break;
    ///   |     ^^^^^^
    /// ```
    fn render(&self, source: &Source, color: bool) -> String {
        render(self, self.span(), source, color)
    }
}

fn render<D: Display + ?Sized>(message: &D, span: Option<Span>, source: &Source, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: {}", paint("error", color), message);

    let Some(span) = span else {
        return out;
    };

    let (line, col) = source.line_col(span.offset);
    let text = source.line(line).unwrap_or("");
    let gutter = line.to_string().len();
    let width = source.text()
        .get(span.offset..span.end())
        .map_or(0, |s| s.lines().next().unwrap_or("").chars().count())
        .max(1);

    let _ = writeln!(out, "{:gutter$}--> {}:{}:{}", "", source.name(), line, col);
    let _ = writeln!(out, "{:gutter$} |", "");
    let _ = writeln!(out, "{} | {}", line, text);
    let _ = writeln!(out, "{:gutter$} | {:pad$}{}", "", "", caret(width, color), pad = col - 1);
    out
}

#[cfg(feature = "color")]
fn paint(label: &str, color: bool) -> String {
    use yansi::Paint;
    if color {
        label.red().bold().to_string()
    } else {
        label.to_string()
    }
}

#[cfg(not(feature = "color"))]
fn paint(label: &str, _color: bool) -> String {
    label.to_string()
}

fn caret(width: usize, color: bool) -> String {
    let marks = "^".repeat(width);
    #[cfg(feature = "color")]
    if color {
        use yansi::Paint;
        return marks.red().to_string();
    }
    let _ = color;
    marks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_offending_line() {
        let source = Source::new("demo.noja", "x = 1;\nwhile x:\n    break;\nbreak;");
        let err = CompileError::BreakOutsideLoop { span: Span::new(27, 6) };
        assert_eq!(err.render(&source, false), "\
error: break not inside a loop
 --> demo.noja:4:1
  |
4 | break;
  | ^^^^^^
");
    }

    #[test]
    fn empty_span_still_points() {
        let source = Source::new("t", "x = 1");
        let err = SyntaxError { span: Span::at(5), found: None };
        let text = err.render(&source, false);
        assert!(text.starts_with("error: unexpected end of input\n --> t:1:6\n"));
        assert!(text.ends_with("  |      ^\n"));
    }

    #[test]
    fn spanless_errors_are_one_line() {
        let source = Source::new("t", "");
        assert_eq!(CompileError::OutOfMemory.render(&source, false), "error: out of memory\n");
    }
}
