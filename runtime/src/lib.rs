pub mod stack;

pub use stack::{ReadOnlyStack, Stack, StackError, StackHandle, DEFAULT_CAPACITY};
