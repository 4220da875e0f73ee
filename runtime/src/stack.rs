//! Value stack shared between frames of the machine.
//!
//! Handles share one reference counted buffer. A [Stack] may write to it,
//! copying the buffer first if another handle still sees it; a
//! [ReadOnlyStack] can only look.

use std::rc::Rc;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("stack is full")]
    Full,
    #[error("not enough values on the stack")]
    Underflow,
    #[error("stack is read-only")]
    ReadOnly,
}

#[derive(Debug, Clone)]
struct Storage<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Storage<T> {
    /// `0` is the top, `-1` the value below it
    fn peek(&self, rel: isize) -> Option<&T> {
        if rel > 0 {
            return None;
        }
        let down = rel.unsigned_abs();
        let idx = self.items.len().checked_sub(down + 1)?;
        self.items.get(idx)
    }
}

#[derive(Debug)]
pub struct Stack<T> {
    storage: Rc<Storage<T>>,
}

#[derive(Debug)]
pub struct ReadOnlyStack<T> {
    storage: Rc<Storage<T>>,
}

/// Result of [Stack::copy] and [ReadOnlyStack::copy].
#[derive(Debug)]
pub enum StackHandle<T> {
    Mutable(Stack<T>),
    ReadOnly(ReadOnlyStack<T>),
}

/// true if `storage` was the last handle and the buffer goes away with it
fn release<T>(storage: Rc<Storage<T>>) -> bool {
    Rc::into_inner(storage).is_some()
}

impl<T: Clone> Stack<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Stack {
            storage: Rc::new(Storage { items: Vec::new(), capacity }),
        }
    }

    fn storage_mut(&mut self) -> &mut Storage<T> {
        if Rc::strong_count(&self.storage) > 1 {
            trace!(len = self.storage.items.len(), "copying shared stack");
        }
        Rc::make_mut(&mut self.storage)
    }

    pub fn push(&mut self, item: T) -> Result<(), StackError> {
        if self.storage.items.len() >= self.storage.capacity {
            return Err(StackError::Full);
        }
        self.storage_mut().items.push(item);
        Ok(())
    }

    /// drops the top `count` values; nothing is dropped if there are fewer
    pub fn pop(&mut self, count: usize) -> Result<(), StackError> {
        let len = self.storage.items.len();
        let keep = len.checked_sub(count).ok_or(StackError::Underflow)?;
        if count > 0 {
            self.storage_mut().items.truncate(keep);
        }
        Ok(())
    }

    /// removes and returns the top value
    pub fn take(&mut self) -> Result<T, StackError> {
        if self.storage.items.is_empty() {
            return Err(StackError::Underflow);
        }
        self.storage_mut().items.pop().ok_or(StackError::Underflow)
    }
}

impl<T: Clone> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stack<T> {
    pub fn peek(&self, rel: isize) -> Option<&T> {
        self.storage.peek(rel)
    }

    pub fn len(&self) -> usize {
        self.storage.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity
    }

    /// bottom to top
    pub fn as_slice(&self) -> &[T] {
        &self.storage.items
    }

    /// whether another handle still sees this buffer
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.storage) > 1
    }

    pub fn copy(&self, readonly: bool) -> StackHandle<T> {
        let storage = Rc::clone(&self.storage);
        if readonly {
            StackHandle::ReadOnly(ReadOnlyStack { storage })
        } else {
            StackHandle::Mutable(Stack { storage })
        }
    }

    pub fn release(self) -> bool {
        release(self.storage)
    }
}

impl<T> ReadOnlyStack<T> {
    pub fn peek(&self, rel: isize) -> Option<&T> {
        self.storage.peek(rel)
    }

    pub fn len(&self) -> usize {
        self.storage.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity
    }

    pub fn as_slice(&self) -> &[T] {
        &self.storage.items
    }

    /// copies of a read-only handle are read-only too
    pub fn copy(&self) -> ReadOnlyStack<T> {
        ReadOnlyStack { storage: Rc::clone(&self.storage) }
    }

    pub fn release(self) -> bool {
        release(self.storage)
    }
}

impl<T: Clone> StackHandle<T> {
    pub fn push(&mut self, item: T) -> Result<(), StackError> {
        match self {
            StackHandle::Mutable(stack) => stack.push(item),
            StackHandle::ReadOnly(_) => Err(StackError::ReadOnly),
        }
    }

    pub fn pop(&mut self, count: usize) -> Result<(), StackError> {
        match self {
            StackHandle::Mutable(stack) => stack.pop(count),
            StackHandle::ReadOnly(_) => Err(StackError::ReadOnly),
        }
    }
}

impl<T> StackHandle<T> {
    pub fn is_readonly(&self) -> bool {
        matches!(self, StackHandle::ReadOnly(_))
    }

    pub fn peek(&self, rel: isize) -> Option<&T> {
        match self {
            StackHandle::Mutable(stack) => stack.peek(rel),
            StackHandle::ReadOnly(stack) => stack.peek(rel),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StackHandle::Mutable(stack) => stack.len(),
            StackHandle::ReadOnly(stack) => stack.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `readonly` is ignored for a read-only handle
    pub fn copy(&self, readonly: bool) -> StackHandle<T> {
        match self {
            StackHandle::Mutable(stack) => stack.copy(readonly),
            StackHandle::ReadOnly(stack) => StackHandle::ReadOnly(stack.copy()),
        }
    }

    pub fn release(self) -> bool {
        match self {
            StackHandle::Mutable(stack) => stack.release(),
            StackHandle::ReadOnly(stack) => stack.release(),
        }
    }
}

impl<T> From<Stack<T>> for StackHandle<T> {
    fn from(stack: Stack<T>) -> Self {
        StackHandle::Mutable(stack)
    }
}

impl<T> From<ReadOnlyStack<T>> for StackHandle<T> {
    fn from(stack: ReadOnlyStack<T>) -> Self {
        StackHandle::ReadOnly(stack)
    }
}
