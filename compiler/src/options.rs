/// Most leaves a single assignment or return may name: `a, b, c = f()`.
pub const DEFAULT_MAX_TUPLE: usize = 32;

/// Deepest AST nesting the lowering pass will follow before giving up.
pub const DEFAULT_MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct Options {
    pub max_tuple: usize,
    pub max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_tuple: DEFAULT_MAX_TUPLE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
