//! The token-source contract (§6) and an in-memory fixture for tests.
//!
//! Grounded on `aex/token.rs`'s token stream for the token/position shapes
//! it consumes (component re-used from `token.rs`); the trait itself is new
//! — modeled as a plain synchronous iterator-like contract rather than
//! pulling in an async runtime (see `DESIGN.md`, "No async runtime"). §5/§9
//! describe the only suspension point as "fetch the next line," with no
//! multi-task coordination, so a host that genuinely needs async I/O can
//! block on it from its own side of this trait (e.g. with a runtime's
//! `block_on`) without this crate needing to know about it.

use std::collections::VecDeque;

use crate::error::AssembleError;
use crate::token::Line;

/// Supplies one already-tokenized [`Line`] at a time to the assembler core.
/// Tokenizing, preprocessing (`.include`, `.define`/macro expansion) and
/// conditional-assembly skipping all happen upstream of this trait (§1).
pub trait Source {
    /// Returns the next line, or `Ok(None)` at end of input. An `Err`
    /// aborts assembly immediately — this trait has no notion of "skip and
    /// continue," that policy belongs to the host feeding it.
    fn next_line(&mut self) -> Result<Option<Line>, AssembleError>;
}

/// An in-memory [`Source`] over a fixed sequence of lines, used by this
/// crate's own end-to-end tests and suitable as a host-side fixture for
/// feeding pre-tokenized fixtures without a real tokenizer.
#[derive(Debug, Default)]
pub struct VecSource {
    lines: VecDeque<Line>,
}

impl VecSource {
    pub fn new(lines: impl IntoIterator<Item = Line>) -> Self {
        VecSource { lines: lines.into_iter().collect() }
    }
}

impl Source for VecSource {
    fn next_line(&mut self) -> Result<Option<Line>, AssembleError> {
        Ok(self.lines.pop_front())
    }
}
