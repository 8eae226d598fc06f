//! Structured error taxonomy (§7).
//!
//! One `thiserror`-derived enum, one variant family per error kind the spec
//! names. Every variant carries the structured data needed to reconstruct
//! the message (names, mnemonics, modes, positions) instead of a
//! pre-formatted string, so a host can build its own diagnostics (carets
//! under a source span, JSON, ...) from the fields, or just use the
//! `Display` impl `thiserror` derives for a ca65-style one-liner.
//!
//! Grounded in spec §7's taxonomy; the "one enum, one message per case"
//! shape echoes `aex/message.rs`'s `messages!` macro (an enum of diagnostic
//! codes mapped to static strings), reimplemented with `thiserror` instead
//! of a hand-rolled `repr(u8)` + parallel string array, since this crate
//! needs structured fields per message, not just a code.

use crate::token::Pos;
use thiserror::Error;

/// Wraps an optional [`Pos`] for use inside `#[error(...)]` format strings,
/// rendering as `"line:col: "` when known and as `""` otherwise.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Loc(pub Option<Pos>);

impl From<Option<Pos>> for Loc {
    fn from(pos: Option<Pos>) -> Self {
        Loc(pos)
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(pos) => write!(f, "{pos}: "),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AssembleError {
    // --- Syntax / shape -----------------------------------------------
    #[error("{loc}expected identifier")]
    ExpectedIdentifier { loc: Loc },

    #[error("{loc}expected a segment list")]
    ExpectedSegmentList { loc: Loc },

    #[error("{loc}bad argument")]
    BadArgument { loc: Loc },

    #[error("{loc}unbalanced (")]
    UnbalancedParen { loc: Loc },

    #[error("{loc}unknown directive: {name}")]
    UnknownDirective { name: String, loc: Loc },

    // --- Semantic -------------------------------------------------------
    #[error("{loc}unknown mnemonic: {mnemonic}")]
    UnknownMnemonic { mnemonic: String, loc: Loc },

    #[error("{loc}bad address mode {mode} for {mnemonic}")]
    BadAddressMode {
        mnemonic: String,
        mode: &'static str,
        loc: Loc,
    },

    #[error("{loc}cannot force {kind} addressing on {mode}")]
    CannotForceAddressing {
        kind: &'static str,
        mode: &'static str,
        loc: Loc,
    },

    // --- Symbol lifecycle -------------------------------------------------
    #[error("{loc}redefining symbol {name}")]
    RedefiningSymbol { name: String, loc: Loc },

    #[error("{loc}symbol {name} undefined")]
    SymbolUndefined { name: String, loc: Loc },

    #[error("{loc}cannot change mutability of symbol {name}")]
    CannotChangeMutability { name: String, loc: Loc },

    #[error("{loc}mutable set requires a constant expression")]
    MutableSetRequiresConstant { loc: Loc },

    #[error("{loc}cheap local label {name} never defined")]
    CheapLocalNeverDefined { name: String, loc: Loc },

    #[error("{loc}could not resolve scope in {name}")]
    CouldNotResolveScope { name: String, loc: Loc },

    // --- Structural -------------------------------------------------------
    #[error("scope never closed: {name}")]
    ScopeNeverClosed { name: String },

    #[error("{loc}.endscope without .scope")]
    EndScopeWithoutScope { loc: Loc },

    #[error("{loc}.endproc without .proc")]
    EndProcWithoutProc { loc: Loc },

    #[error("{loc}.popseg without .pushseg")]
    PopSegWithoutPushSeg { loc: Loc },

    #[error("{loc}.free in .reloc mode")]
    FreeInRelocMode { loc: Loc },

    #[error("{loc}re-entering scope {name} is not allowed")]
    ScopeReentryNotAllowed { name: String, loc: Loc },

    #[error("{loc}overlapping write at offset {offset:#x}")]
    OverlappingWrite { offset: usize, loc: Loc },

    // --- Evaluation -------------------------------------------------------
    #[error("{loc}expression is not constant")]
    ExpressionNotConstant { loc: Loc },

    #[error("{loc}bad anonymous backref")]
    BadAnonymousBackref { loc: Loc },

    #[error("{loc}bad relative backref")]
    BadRelativeBackref { loc: Loc },

    #[error("{loc}assertion failed: {message}")]
    AssertFailed { message: String, loc: Loc },

    // --- Host-facing -------------------------------------------------------
    /// Raised by an explicit `.error` directive; the message is whatever
    /// the source passed.
    #[error("{loc}{message}")]
    UserError { message: String, loc: Loc },
}

impl AssembleError {
    /// The source position attached to this error, if any.
    pub fn pos(&self) -> Option<Pos> {
        use AssembleError::*;
        match self {
            ExpectedIdentifier { loc }
            | ExpectedSegmentList { loc }
            | BadArgument { loc }
            | UnbalancedParen { loc }
            | UnknownDirective { loc, .. }
            | UnknownMnemonic { loc, .. }
            | BadAddressMode { loc, .. }
            | CannotForceAddressing { loc, .. }
            | RedefiningSymbol { loc, .. }
            | SymbolUndefined { loc, .. }
            | CannotChangeMutability { loc, .. }
            | MutableSetRequiresConstant { loc }
            | CheapLocalNeverDefined { loc, .. }
            | CouldNotResolveScope { loc, .. }
            | EndScopeWithoutScope { loc }
            | EndProcWithoutProc { loc }
            | PopSegWithoutPushSeg { loc }
            | FreeInRelocMode { loc }
            | ScopeReentryNotAllowed { loc, .. }
            | OverlappingWrite { loc, .. }
            | ExpressionNotConstant { loc }
            | BadAnonymousBackref { loc }
            | BadRelativeBackref { loc }
            | AssertFailed { loc, .. }
            | UserError { loc, .. } => loc.0,
            ScopeNeverClosed { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssembleError>;
