use std::fmt::Write;
use itertools::Itertools;
use crate::{Executable, Instruction, Span};

pub struct Disasm<'e, 'a> {
    exe: &'e Executable<'a>,
}

impl<'e, 'a> Disasm<'e, 'a> {
    pub fn new(exe: &'e Executable<'a>) -> Self {
        Self { exe }
    }

    pub fn op(&self, instr: &Instruction) -> String {
        if instr.operands.is_empty() {
            instr.opcode.to_string()
        } else {
            format!("{} {}", instr.opcode, instr.operands.iter().join(" "))
        }
    }

    /// `name:line:col` if the executable still knows its source
    pub fn location(&self, span: Span) -> Option<String> {
        let source = self.exe.source()?;
        let (line, col) = source.line_col(span.offset);
        Some(format!("{}:{}:{}", source.name(), line, col))
    }

    pub fn line(&self, idx: usize) -> Option<String> {
        let instr = self.exe.get(idx)?;
        let op = self.op(instr);
        Some(match self.location(instr.span) {
            Some(loc) => format!("{:>5}  {:<28} ; {}", idx, op, loc),
            None => format!("{:>5}  {}", idx, op),
        })
    }

    pub fn listing(&self) -> String {
        let mut out = String::new();
        for idx in 0..self.exe.len() {
            if let Some(line) = self.line(idx) {
                let _ = writeln!(out, "{}", line.trim_end());
            }
        }
        out
    }
}
