//! Ambient configuration (§6, §10).
//!
//! Grounded in §6's list of host-tunable knobs (bracket-group syntax,
//! scope re-entry, overwrite policy) and the `refExtractor`/diagnostic
//! callback shape; bundled into one options struct the way a host
//! constructs an assembler run, rather than threading five separate
//! arguments through every constructor.

use crate::token::Pos;

/// What happens when a fixed-origin emit (`.org`) would overwrite bytes a
/// previous emit already wrote at the same address (§4.E, §7). Stamped onto
/// every chunk at the moment it's created, then checked across all
/// fixed-origin chunks during finalization once every chunk's final length
/// is known.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub enum OverwriteMode {
    /// Silently allow it — the new bytes win.
    Allow,
    /// Reject it with `OverlappingWrite`.
    Forbid,
    /// Allow it, but emit a diagnostic through the active sink.
    Warn,
}

impl Default for OverwriteMode {
    fn default() -> Self {
        OverwriteMode::Forbid
    }
}

/// Receives a callback for every resolved symbol reference the assembler
/// encounters, for hosts that build cross-reference indexes or "jump to
/// definition" tooling (§6's `refExtractor`).
pub trait RefExtractor {
    fn on_reference(&mut self, name: &str, def_pos: Option<Pos>, use_pos: Option<Pos>);
}

/// Host-tunable assembler behavior (§6, §10).
pub struct AssemblerOptions {
    /// Allow `[...]` as an alternate grouping syntax alongside `(...)`
    /// (ca65 extension, §4.F).
    pub allow_brackets: bool,
    /// Allow `.scope`/`.proc` to re-open an existing named child scope
    /// instead of erroring on the name collision (§4.D).
    pub reentrant_scopes: bool,
    pub overwrite_mode: OverwriteMode,
    pub ref_extractor: Option<Box<dyn RefExtractor>>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions {
            allow_brackets: false,
            reentrant_scopes: false,
            overwrite_mode: OverwriteMode::default(),
            ref_extractor: None,
        }
    }
}

impl std::fmt::Debug for AssemblerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblerOptions")
            .field("allow_brackets", &self.allow_brackets)
            .field("reentrant_scopes", &self.reentrant_scopes)
            .field("overwrite_mode", &self.overwrite_mode)
            .field("ref_extractor", &self.ref_extractor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let opts = AssemblerOptions::default();
        assert!(!opts.allow_brackets);
        assert!(!opts.reentrant_scopes);
        assert_eq!(opts.overwrite_mode, OverwriteMode::Forbid);
        assert!(opts.ref_extractor.is_none());
    }
}
