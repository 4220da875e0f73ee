use tracing::error;
use crate::forward::{ForwardArena, ForwardError, ForwardRef};
use crate::{Executable, Instruction, Opcode, Operand, OperandKind, Operands, Span};

/// Violations of the builder contract. Apart from [BuildError::OutOfMemory]
/// these point at a bug in whatever drives the builder, never at user input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("too many instructions")]
    TooManyInstructions,
    #[error("forward reference ?{} was never resolved", .0.id())]
    Unresolved(ForwardRef),
    #[error("forward reference ?{} resolved twice", .0.id())]
    AlreadyResolved(ForwardRef),
    #[error("forward reference ?{} does not belong to this builder", .0.id())]
    Dangling(ForwardRef),
    #[error("{opcode} expects operands {expected:?}, got {found:?}")]
    OperandMismatch {
        opcode: Opcode,
        expected: &'static [OperandKind],
        found: Vec<OperandKind>,
    },
    #[error("{opcode} at {index} targets {target}, past the last instruction {len}")]
    TargetOutOfRange {
        opcode: Opcode,
        index: usize,
        target: u32,
        len: usize,
    },
}

impl From<ForwardError> for BuildError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::OutOfMemory => BuildError::OutOfMemory,
            ForwardError::AlreadyResolved(r) => BuildError::AlreadyResolved(r),
            ForwardError::Dangling(r) => BuildError::Dangling(r),
        }
    }
}

/// Append-only instruction sequence.
///
/// Operands may refer to cells of the borrowed [ForwardArena]; they are
/// replaced by the resolved indices in [ExeBuilder::finalize]. The arena is
/// cleared when the builder goes away, whether it was finalized or not.
pub struct ExeBuilder<'a, 'f> {
    code: Vec<Instruction<'a>>,
    forwards: &'f mut ForwardArena,
}

impl<'a, 'f> ExeBuilder<'a, 'f> {
    pub fn new(forwards: &'f mut ForwardArena) -> Self {
        Self { code: Vec::new(), forwards }
    }

    /// index the next appended instruction will get
    pub fn instr_count(&self) -> usize {
        self.code.len()
    }

    pub fn append<I>(&mut self, opcode: Opcode, operands: I, span: Span) -> Result<usize, BuildError>
    where
        I: IntoIterator<Item = Operand<'a>>,
    {
        let operands: Operands<'a> = operands.into_iter().collect();

        let expected = opcode.signature();
        let fits = operands.len() == expected.len()
            && operands.iter().zip(expected).all(|(op, kind)| op.kind() == *kind);
        if !fits {
            let err = BuildError::OperandMismatch {
                opcode,
                expected,
                found: operands.iter().map(Operand::kind).collect(),
            };
            error!(%err, "malformed instruction");
            return Err(err);
        }

        self.code.try_reserve(1).map_err(|_| BuildError::OutOfMemory)?;
        let index = self.code.len();
        self.code.push(Instruction { opcode, operands, span });
        Ok(index)
    }

    pub fn forward(&mut self) -> Result<ForwardRef, BuildError> {
        Ok(self.forwards.alloc()?)
    }

    /// resolves the cell to the index of the next instruction
    pub fn resolve(&mut self, cell: ForwardRef) -> Result<(), BuildError> {
        let here = self.here()?;
        self.resolve_to(cell, here)
    }

    pub fn resolve_to(&mut self, cell: ForwardRef, index: u32) -> Result<(), BuildError> {
        self.forwards.resolve(cell, index).map_err(|e| {
            let err = BuildError::from(e);
            error!(%err, "bad forward reference");
            err
        })
    }

    /// [ExeBuilder::instr_count] as an operand value
    pub fn here(&self) -> Result<u32, BuildError> {
        u32::try_from(self.code.len()).map_err(|_| BuildError::TooManyInstructions)
    }

    pub fn finalize(mut self) -> Result<Executable<'a>, BuildError> {
        let mut code = std::mem::take(&mut self.code);
        let len = code.len();

        for (index, instr) in code.iter_mut().enumerate() {
            for op in instr.operands.iter_mut() {
                if let Operand::Forward(cell) = *op {
                    let value = self.forwards.get(cell)?
                        .ok_or(BuildError::Unresolved(cell))
                        .inspect_err(|err| error!(%err, index, "incomplete executable"))?;
                    *op = Operand::Index(value);
                }
            }

            if let Some(target) = instr.target() {
                if target as usize >= len {
                    let err = BuildError::TargetOutOfRange { opcode: instr.opcode, index, target, len };
                    error!(%err, "incomplete executable");
                    return Err(err);
                }
            }
        }

        Ok(Executable::new(code, None))
    }
}

impl<'a, 'f> Drop for ExeBuilder<'a, 'f> {
    fn drop(&mut self) {
        self.forwards.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::default()
    }

    #[test]
    fn aliased_cells_resolve_together() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);

        let done = b.forward().unwrap();
        b.append(Opcode::PushTru, [], span()).unwrap();
        b.append(Opcode::JumpIfNotAndPop, [Operand::Forward(done)], span()).unwrap();
        b.append(Opcode::Jump, [Operand::Forward(done)], span()).unwrap();
        assert_eq!(b.instr_count(), 3);
        b.resolve(done).unwrap();
        b.append(Opcode::Return, [Operand::Int(0)], span()).unwrap();

        let exe = b.finalize().unwrap();
        assert_eq!(exe.len(), 4);
        assert_eq!(exe.code()[1].target(), Some(3));
        assert_eq!(exe.code()[2].target(), Some(3));
        assert!(arena.is_empty());
    }

    #[test]
    fn unresolved_cell_fails_finalize() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        let cell = b.forward().unwrap();
        b.append(Opcode::Jump, [Operand::Forward(cell)], span()).unwrap();
        assert_eq!(b.finalize().unwrap_err(), BuildError::Unresolved(cell));
    }

    #[test]
    fn double_resolve_is_rejected() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        let cell = b.forward().unwrap();
        b.resolve(cell).unwrap();
        assert_eq!(b.resolve(cell), Err(BuildError::AlreadyResolved(cell)));
    }

    #[test]
    fn operand_signature_is_checked() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        assert!(matches!(
            b.append(Opcode::Call, [Operand::Int(1)], span()),
            Err(BuildError::OperandMismatch { opcode: Opcode::Call, .. })
        ));
        assert!(matches!(
            b.append(Opcode::Ass, [Operand::Int(1)], span()),
            Err(BuildError::OperandMismatch { .. })
        ));
        assert_eq!(b.instr_count(), 0);
    }

    #[test]
    fn target_past_the_end_fails_finalize() {
        let mut arena = ForwardArena::new();
        let mut b = ExeBuilder::new(&mut arena);
        let cell = b.forward().unwrap();
        b.append(Opcode::Jump, [Operand::Forward(cell)], span()).unwrap();
        b.resolve(cell).unwrap();
        assert!(matches!(
            b.finalize(),
            Err(BuildError::TargetOutOfRange { target: 1, len: 1, .. })
        ));
    }
}
