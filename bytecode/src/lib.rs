pub mod builder;
pub mod disasm;
pub mod forward;
pub mod image;

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use int_enum::IntEnum;
use smallvec::SmallVec;

pub use builder::{BuildError, ExeBuilder};
pub use forward::{ForwardArena, ForwardRef};

/// every opcode takes at most two operands
pub type Operands<'a> = SmallVec<Operand<'a>, 2>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, IntEnum)]
#[repr(u8)]
pub enum Opcode {
    Pos = 1,
    Neg = 2,
    Not = 3,

    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,

    Eql = 16,
    Nql = 17,
    Lss = 18,
    Leq = 19,
    Grt = 20,
    Geq = 21,
    And = 22,
    Or = 23,

    /// removes the top `n` values
    Pop = 32,

    PushInt = 40,
    PushFlt = 41,
    PushStr = 42,
    PushNne = 43,
    PushTru = 44,
    PushFls = 45,

    /// pushes the value bound to a name, resolved at runtime
    PushVar = 48,
    /// binds the top value to a name, leaving it on the stack
    Ass = 49,

    /// pushes an empty list with room for `n` items
    PushLst = 56,
    /// pushes an empty map with room for `n` items
    PushMap = 57,
    /// ( container key value -- container )
    Insert = 58,
    /// ( value container key -- value ), used by index assignment
    Insert2 = 59,
    /// ( container key -- item )
    Select = 60,

    Jump = 64,
    JumpIfNotAndPop = 65,
    JumpIfAndPop = 66,

    /// `argc retc`: arguments are below the callee
    Call = 72,
    /// `count` values are returned to the caller
    Return = 73,
    /// `entry argc`
    PushFun = 74,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    Int,
    Float,
    Str,
    /// absolute instruction index
    Index,
}

impl Opcode {
    /// operands expected by this opcode, in order
    pub fn signature(self) -> &'static [OperandKind] {
        use OperandKind::*;

        match self {
            Opcode::Pop |
            Opcode::PushInt |
            Opcode::PushLst |
            Opcode::PushMap |
            Opcode::Return => &[Int],

            Opcode::PushFlt => &[Float],

            Opcode::PushStr |
            Opcode::PushVar |
            Opcode::Ass => &[Str],

            Opcode::Jump |
            Opcode::JumpIfNotAndPop |
            Opcode::JumpIfAndPop => &[Index],

            Opcode::Call => &[Int, Int],
            Opcode::PushFun => &[Index, Int],

            _ => &[],
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfNotAndPop | Opcode::JumpIfAndPop)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Pos => "POS",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Eql => "EQL",
            Opcode::Nql => "NQL",
            Opcode::Lss => "LSS",
            Opcode::Leq => "LEQ",
            Opcode::Grt => "GRT",
            Opcode::Geq => "GEQ",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Pop => "POP",
            Opcode::PushInt => "PUSHINT",
            Opcode::PushFlt => "PUSHFLT",
            Opcode::PushStr => "PUSHSTR",
            Opcode::PushNne => "PUSHNNE",
            Opcode::PushTru => "PUSHTRU",
            Opcode::PushFls => "PUSHFLS",
            Opcode::PushVar => "PUSHVAR",
            Opcode::Ass => "ASS",
            Opcode::PushLst => "PUSHLST",
            Opcode::PushMap => "PUSHMAP",
            Opcode::Insert => "INSERT",
            Opcode::Insert2 => "INSERT2",
            Opcode::Select => "SELECT",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfNotAndPop => "JUMPIFNOTANDPOP",
            Opcode::JumpIfAndPop => "JUMPIFANDPOP",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::PushFun => "PUSHFUN",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand<'a> {
    Int(i64),
    Float(f64),
    /// borrowed from the source text whenever possible
    Str(Cow<'a, str>),
    Index(u32),
    /// only valid inside an [ExeBuilder], replaced by [Operand::Index] on finalize
    Forward(ForwardRef),
}

impl<'a> Operand<'a> {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Int(_) => OperandKind::Int,
            Operand::Float(_) => OperandKind::Float,
            Operand::Str(_) => OperandKind::Str,
            Operand::Index(_) |
            Operand::Forward(_) => OperandKind::Index,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<u32> {
        match self {
            Operand::Index(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::Str(v) => Some(v.as_ref()),
            _ => None,
        }
    }

}

impl<'a> Display for Operand<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Int(v) => write!(f, "{}", v),
            Operand::Float(v) => write!(f, "{:?}", v),
            Operand::Str(v) => write!(f, "{:?}", v),
            Operand::Index(v) => write!(f, "@{}", v),
            Operand::Forward(v) => write!(f, "?{}", v.id()),
        }
    }
}

/// byte range in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Span { offset, length }
    }

    /// zero length span
    pub fn at(offset: usize) -> Self {
        Span { offset, length: 0 }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// smallest span containing both
    pub fn cover(self, other: Span) -> Span {
        let offset = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        Span { offset, length: end - offset }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction<'a> {
    pub opcode: Opcode,
    pub operands: Operands<'a>,
    pub span: Span,
}

impl<'a> Instruction<'a> {
    pub fn operand(&self, idx: usize) -> Option<&Operand<'a>> {
        self.operands.get(idx)
    }

    /// jump destination or function entry
    pub fn target(&self) -> Option<u32> {
        match self.opcode {
            op if op.is_jump() || op == Opcode::PushFun => self.operand(0).and_then(Operand::as_index),
            _ => None,
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Self {
        Source { name: name.into(), text: text.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 1-based line and column of a byte offset; offsets past the end map to the last position
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let before = &self.text.as_bytes()[..offset];
        let line = before.iter().filter(|b| **b == b'\n').count() + 1;
        let line_start = before.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        let col = self.text.get(line_start..offset)
            .map_or(offset - line_start, |s| s.chars().count()) + 1;
        (line, col)
    }

    /// text of a 1-based line, without the line break
    pub fn line(&self, line: usize) -> Option<&str> {
        self.text.lines().nth(line.checked_sub(1)?)
    }
}

/// finalized program: instructions plus the source they came from
#[derive(Debug, Clone, PartialEq)]
pub struct Executable<'a> {
    code: Vec<Instruction<'a>>,
    source: Option<Cow<'a, Source>>,
}

impl<'a> Executable<'a> {
    /// only [ExeBuilder::finalize] and the image reader create executables
    pub(crate) fn new(code: Vec<Instruction<'a>>, source: Option<Cow<'a, Source>>) -> Self {
        Executable { code, source }
    }

    pub fn with_source(self, source: &'a Source) -> Self {
        Executable { source: Some(Cow::Borrowed(source)), ..self }
    }

    pub fn without_source(self) -> Self {
        Executable { source: None, ..self }
    }

    pub fn code(&self) -> &[Instruction<'a>] {
        &self.code
    }

    pub fn get(&self, idx: usize) -> Option<&Instruction<'a>> {
        self.code.get(idx)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_deref()
    }

}

#[derive(Debug, thiserror::Error)]
pub enum ByteCodeError {
    #[error("invalid magic")]
    InvalidMagic,
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("not enough bytes")]
    NotEnoughBytes,
    #[error("invalid string encoding")]
    InvalidStringEncoding,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("value does not fit the image format")]
    Overflow,
    #[error("{opcode} at {index} targets {target}, past the last instruction {len}")]
    TargetOutOfRange {
        opcode: Opcode,
        index: usize,
        target: u32,
        len: usize,
    },
    #[error("{0} still refers to an unresolved forward reference")]
    UnfinalizedOperand(Opcode),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_byte_conversion() {
        assert_eq!(Opcode::try_from(65_u8).ok(), Some(Opcode::JumpIfNotAndPop));
        assert_eq!(Opcode::PushFun as u8, 74);
        assert!(Opcode::try_from(0_u8).is_err());
    }

    #[test]
    fn line_col_counts_chars() {
        let src = Source::new("t", "a = 1;\nbé = 2;\n");
        assert_eq!(src.line_col(0), (1, 1));
        assert_eq!(src.line_col(7), (2, 1));
        // 'é' is two bytes wide
        assert_eq!(src.line_col(10), (2, 3));
        assert_eq!(src.line(2), Some("bé = 2;"));
        assert_eq!(src.line(0), None);
    }

    #[test]
    fn span_cover() {
        let a = Span::new(4, 2);
        let b = Span::new(10, 3);
        assert_eq!(a.cover(b), Span::new(4, 9));
        assert_eq!(b.cover(a), Span::new(4, 9));
    }
}
