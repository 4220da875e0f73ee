//! Write-once cells for instruction indices that are not known yet.
//!
//! A jump to the end of a loop has to be emitted before the end of the loop
//! exists. The emitter allocates a cell, lets any number of operands refer to
//! it, and resolves it once the target position is reached. Cells live in an
//! index based arena that is cleared in bulk after each compilation.

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardRef(u32);

impl ForwardRef {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("forward reference ?{} resolved twice", .0.id())]
    AlreadyResolved(ForwardRef),
    #[error("forward reference ?{} does not belong to this arena", .0.id())]
    Dangling(ForwardRef),
}

#[derive(Debug, Default)]
pub struct ForwardArena {
    cells: Vec<Option<u32>>,
}

impl ForwardArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> Result<ForwardRef, ForwardError> {
        let id = u32::try_from(self.cells.len()).map_err(|_| ForwardError::OutOfMemory)?;
        self.cells.try_reserve(1).map_err(|_| ForwardError::OutOfMemory)?;
        self.cells.push(None);
        Ok(ForwardRef(id))
    }

    pub fn resolve(&mut self, cell: ForwardRef, value: u32) -> Result<(), ForwardError> {
        let slot = self.cells.get_mut(cell.0 as usize)
            .ok_or(ForwardError::Dangling(cell))?;
        if slot.is_some() {
            return Err(ForwardError::AlreadyResolved(cell));
        }
        trace!(cell = cell.0, value, "resolved forward reference");
        *slot = Some(value);
        Ok(())
    }

    /// `Ok(None)` while the cell is still pending
    pub fn get(&self, cell: ForwardRef) -> Result<Option<u32>, ForwardError> {
        self.cells.get(cell.0 as usize)
            .copied()
            .ok_or(ForwardError::Dangling(cell))
    }

    pub fn is_resolved(&self, cell: ForwardRef) -> bool {
        matches!(self.get(cell), Ok(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// releases every cell at once, keeping the allocation for reuse
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_once() {
        let mut arena = ForwardArena::new();
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        assert_ne!(a, b);

        assert_eq!(arena.get(a), Ok(None));
        arena.resolve(a, 7).unwrap();
        assert_eq!(arena.get(a), Ok(Some(7)));
        assert_eq!(arena.resolve(a, 8), Err(ForwardError::AlreadyResolved(a)));
        assert_eq!(arena.get(a), Ok(Some(7)));

        assert!(!arena.is_resolved(b));
    }

    #[test]
    fn cleared_refs_dangle() {
        let mut arena = ForwardArena::new();
        let a = arena.alloc().unwrap();
        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.resolve(a, 0), Err(ForwardError::Dangling(a)));
        assert!(!arena.is_resolved(a));
    }
}
