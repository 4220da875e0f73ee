use chumsky::error::Cheap;
use chumsky::Parser;
use std::fmt::{Display, Formatter};
use std::ops::Range;

pub type TokStr<'src> = std::borrow::Cow<'src, str>;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok<'src> {
    Comment(&'src str),
    Int(i64),
    Float(f64),
    Str(TokStr<'src>),
    Ident(TokStr<'src>),

    If,
    Else,
    While,
    Do,
    Fun,
    Return,
    Break,
    None,
    True,
    False,
    And,
    Or,
    Not,

    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Assign,
    Comma,
    Colon,
    Semicolon,
    ParenOpen,
    ParenClose,
    SquareOpen,
    SquareClose,
    CurlyOpen,
    CurlyClose,

    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokType {
    Num,
    Str,
    Ident,
    Keyword,
    Point,
    Op,
    Comment,
    Err,
}

impl<'src> From<&Tok<'src>> for TokStr<'src> {
    fn from(tok: &Tok<'src>) -> Self {
        match tok {
            Tok::Comment(str) => (*str).into(),
            Tok::Int(v) => v.to_string().into(),
            Tok::Float(v) => v.to_string().into(),
            Tok::Str(str) => format!("{:?}", str).into(),
            Tok::Ident(str) => str.clone(),
            Tok::If => "if".into(),
            Tok::Else => "else".into(),
            Tok::While => "while".into(),
            Tok::Do => "do".into(),
            Tok::Fun => "fun".into(),
            Tok::Return => "return".into(),
            Tok::Break => "break".into(),
            Tok::None => "none".into(),
            Tok::True => "true".into(),
            Tok::False => "false".into(),
            Tok::And => "and".into(),
            Tok::Or => "or".into(),
            Tok::Not => "not".into(),
            Tok::Plus => "+".into(),
            Tok::Minus => "-".into(),
            Tok::Star => "*".into(),
            Tok::Slash => "/".into(),
            Tok::EqEq => "==".into(),
            Tok::NotEq => "!=".into(),
            Tok::Lt => "<".into(),
            Tok::LtEq => "<=".into(),
            Tok::Gt => ">".into(),
            Tok::GtEq => ">=".into(),
            Tok::Assign => "=".into(),
            Tok::Comma => ",".into(),
            Tok::Colon => ":".into(),
            Tok::Semicolon => ";".into(),
            Tok::ParenOpen => "(".into(),
            Tok::ParenClose => ")".into(),
            Tok::SquareOpen => "[".into(),
            Tok::SquareClose => "]".into(),
            Tok::CurlyOpen => "{".into(),
            Tok::CurlyClose => "}".into(),
            Tok::Error => "<ERR>".into(),
        }
    }
}

impl<'src> Display for Tok<'src> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", TokStr::from(self))
    }
}

impl<'src> From<&Tok<'src>> for TokType {
    fn from(tok: &Tok<'src>) -> Self {
        match tok {
            Tok::Comment(_) => TokType::Comment,
            Tok::Int(_) |
            Tok::Float(_) => TokType::Num,
            Tok::Str(_) => TokType::Str,
            Tok::Ident(_) => TokType::Ident,

            Tok::If |
            Tok::Else |
            Tok::While |
            Tok::Do |
            Tok::Fun |
            Tok::Return |
            Tok::Break |
            Tok::None |
            Tok::True |
            Tok::False => TokType::Keyword,

            Tok::ParenOpen |
            Tok::ParenClose |
            Tok::SquareOpen |
            Tok::SquareClose |
            Tok::CurlyOpen |
            Tok::CurlyClose |
            Tok::Comma |
            Tok::Colon |
            Tok::Semicolon => TokType::Point,

            Tok::And |
            Tok::Or |
            Tok::Not |
            Tok::Plus |
            Tok::Minus |
            Tok::Star |
            Tok::Slash |
            Tok::EqEq |
            Tok::NotEq |
            Tok::Lt |
            Tok::LtEq |
            Tok::Gt |
            Tok::GtEq |
            Tok::Assign => TokType::Op,

            Tok::Error => TokType::Err,
        }
    }
}

pub type Spanned<T> = (T, Range<usize>);

fn word(ident: &str) -> Tok<'_> {
    match ident {
        "if" => Tok::If,
        "else" => Tok::Else,
        "while" => Tok::While,
        "do" => Tok::Do,
        "fun" => Tok::Fun,
        "return" => Tok::Return,
        "break" => Tok::Break,
        "none" => Tok::None,
        "true" => Tok::True,
        "false" => Tok::False,
        "and" => Tok::And,
        "or" => Tok::Or,
        "not" => Tok::Not,
        _ => Tok::Ident(ident.into()),
    }
}

pub fn lexer<'src>() ->
    impl Parser<'src, &'src str, Vec<Spanned<Tok<'src>>>, chumsky::extra::Err<Cheap>>
{
    use chumsky::prelude::*;

    // literals too large for an i64 lex as errors
    let num = text::int(10)
        .then(just('.')
            .then(text::digits(10))
            .or_not())
        .to_slice()
        .map(|slice: &str| if slice.contains('.') {
            slice.parse().map(Tok::Float).unwrap_or(Tok::Error)
        } else {
            slice.parse().map(Tok::Int).unwrap_or(Tok::Error)
        });

    let escape = choice((
        just("\\\\").to('\\'),
        just("\\\"").to('"'),
        just("\\n").to('\n'),
        just("\\t").to('\t'),
    ));

    let plain_str = none_of(['"', '\\'])
        .repeated()
        .to_slice()
        .delimited_by(just('"'), just('"'))
        .map(|x: &str| Tok::Str(TokStr::Borrowed(x)));

    let escaped_str = choice((
        escape,
        none_of(['"', '\\'])
    ))
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
        .map(|x| Tok::Str(TokStr::Owned(x)));

    let str = plain_str.or(escaped_str);

    let comment = just("#")
        .then(any().and_is(text::newline().not())
            .repeated())
        .to_slice()
        .map(|span: &str| Tok::Comment(span));

    let op: Boxed<_, Tok, extra::Err<Cheap>> = choice([
        just("==").to(Tok::EqEq),
        just("!=").to(Tok::NotEq),
        just("<=").to(Tok::LtEq),
        just(">=").to(Tok::GtEq),
    ]).or(choice([
        just("<").to(Tok::Lt),
        just(">").to(Tok::Gt),
        just("=").to(Tok::Assign),
        just("+").to(Tok::Plus),
        just("-").to(Tok::Minus),
        just("*").to(Tok::Star),
        just("/").to(Tok::Slash),
        just(",").to(Tok::Comma),
        just(":").to(Tok::Colon),
        just(";").to(Tok::Semicolon),
        just("(").to(Tok::ParenOpen),
        just(")").to(Tok::ParenClose),
        just("[").to(Tok::SquareOpen),
        just("]").to(Tok::SquareClose),
        just("{").to(Tok::CurlyOpen),
        just("}").to(Tok::CurlyClose),
    ])).boxed();

    let tok: Boxed<_, Tok, extra::Err<Cheap>> = choice((
        num.boxed(),
        str.boxed(),
        comment.boxed(),
        op,
        text::ident().map(|x: &'src str| word(x)).boxed(),
    )).boxed();

    tok.recover_with(via_parser(any::<_, extra::Err<Cheap>>().to(Tok::Error)))
        .map_with(|t: Tok, e| (t, (e.span() as SimpleSpan).into_range()))
        .padded()
        .repeated()
        .collect::<Vec<_>>()
        .padded()
        .then_ignore(end())
        .boxed()
}

/// Fails if any part of the input did not form a token.
/// Use [lexer] directly to get the tokens anyway, as the highlighter does.
pub fn lex(input: &str) -> Result<Vec<Spanned<Tok<'_>>>, Vec<Cheap>> {
    let (v, err) = lexer().parse(input).into_output_errors();
    match v {
        Some(v) if err.is_empty() => Ok(v),
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<Tok<'_>> {
        lex(input).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(toks("if iffy none"), vec![
            Tok::If,
            Tok::Ident("iffy".into()),
            Tok::None,
        ]);
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(toks("a<=b==c=d"), vec![
            Tok::Ident("a".into()),
            Tok::LtEq,
            Tok::Ident("b".into()),
            Tok::EqEq,
            Tok::Ident("c".into()),
            Tok::Assign,
            Tok::Ident("d".into()),
        ]);
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("12 3.25"), vec![Tok::Int(12), Tok::Float(3.25)]);
        assert_eq!(toks("99999999999999999999"), vec![Tok::Error]);
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(toks(r#""a\"b\n""#), vec![Tok::Str("a\"b\n".into())]);
    }

    #[test]
    fn plain_strings_borrow_the_source() {
        let out = toks(r#""plain" "esc\t""#);
        assert!(matches!(&out[0], Tok::Str(TokStr::Borrowed("plain"))));
        assert!(matches!(&out[1], Tok::Str(TokStr::Owned(s)) if s == "esc\t"));
    }

    #[test]
    fn comments_and_spans() {
        let out = lex("x # note\n  y").unwrap();
        assert_eq!(out[0], (Tok::Ident("x".into()), 0..1));
        assert_eq!(out[1], (Tok::Comment("# note"), 2..8));
        assert_eq!(out[2], (Tok::Ident("y".into()), 11..12));
    }

    #[test]
    fn blank_input() {
        assert!(lex("").unwrap().is_empty());
        assert!(lex("  \n\t").unwrap().is_empty());
    }

    #[test]
    fn stray_character_is_an_error() {
        assert!(lex("x = @;").is_err());
        let (toks, errs) = lexer().parse("x = @;").into_output_errors();
        assert!(!errs.is_empty());
        assert!(toks.unwrap().iter().any(|(t, _)| *t == Tok::Error));
    }
}
