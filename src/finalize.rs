//! Component G: module finalization.
//!
//! New code grounded in spec §4.G; the post-order promotion walk is shaped
//! like the teacher's recursive parent-walk pattern (`aex::scope`'s
//! subscope chaining) generalized to a full tree traversal instead of a
//! single parent hop. See `DESIGN.md` for the Open Question resolution this
//! implements (`promote_undefined` below) and for the documented
//! simplification around chunk address assignment: a chunk's base address
//! is its own `.org` if fixed, or `0` otherwise — genuinely relocatable
//! (non-`.org`) cross-chunk address arithmetic is a linker's job and out of
//! scope for this core, but same-chunk arithmetic (the common case: branch
//! displacements, `. - label` sizes) is exact regardless of the base used,
//! since the base term cancels out of the subtraction.

use crate::assembler::Assembler;
use crate::config::OverwriteMode;
use crate::diagnostics::Severity;
use crate::error::{AssembleError, Loc};
use crate::expr::evaluate;
use crate::module::Module;
use crate::symbol::Binding;

pub fn finalize(mut asm: Assembler) -> Result<Module, AssembleError> {
    if let Some(name) = asm.unclosed_scope_names().into_iter().next() {
        return Err(AssembleError::ScopeNeverClosed { name });
    }

    promote_undefined(&mut asm);
    resolve_label_addresses(&mut asm);
    import_remaining_undefined(&mut asm)?;
    patch_substitutions(&mut asm)?;
    check_fixed_origin_overlaps(&mut asm)?;

    let symbols: Vec<_> = asm.symbols.iter().cloned().collect();
    let (exports, imports) = Module::collect_symbols(&symbols);

    Ok(Module {
        chunks: asm.chunks.iter().cloned().collect(),
        segments: asm.segments.iter().cloned().collect(),
        exports,
        imports,
    })
}

/// Promotes undefined, unscoped symbols one level up into their enclosing
/// scope, processing scopes children-before-parents so a chain of nested
/// scopes bubbles a name all the way to the root in one pass (§4.G step 2).
///
/// Resolves the spec's Open Question literally: promotion never checks
/// whether the parent scope already has a same-named binding — it always
/// aliases the child's id into the parent's map, overwriting whatever was
/// there. A symbol recorded as `scoped` (reached only via an explicit
/// `::`-qualified path) is never promoted.
fn promote_undefined(asm: &mut Assembler) {
    for scope_id in asm.scopes.post_order() {
        let Some(parent_id) = asm.scopes.get(scope_id).parent else {
            continue;
        };
        let candidates: Vec<(String, crate::symbol::SymbolId)> = asm
            .scopes
            .get(scope_id)
            .bindings()
            .filter(|(_, id)| {
                let sym = asm.symbols.get(*id);
                !sym.is_defined() && !sym.scoped
            })
            .map(|(name, id)| (name.to_string(), id))
            .collect();

        for (name, id) in candidates {
            asm.scopes.get_mut(parent_id).bind(name, id);
        }
    }
}

/// Resolves every `Label(chunk, offset)` binding into a concrete value now
/// that every chunk exists, converting it to an ordinary `Value` binding so
/// later expression folding treats labels exactly like any other constant.
fn resolve_label_addresses(asm: &mut Assembler) {
    let mut updates = Vec::new();
    for sym in asm.symbols.iter() {
        if let Binding::Label { chunk, offset } = sym.binding {
            let base = asm.chunks.get(chunk).org.unwrap_or(0);
            updates.push((sym.id, base + offset as i64));
        }
    }
    for (id, value) in updates {
        asm.symbols.define(id, value);
    }
}

/// Any symbol still undefined after promotion is either a hard error
/// (explicitly scoped, e.g. via `::`) or an external reference the linker
/// must supply (§4.G step 3).
fn import_remaining_undefined(asm: &mut Assembler) -> Result<(), AssembleError> {
    let undefined: Vec<_> = asm
        .symbols
        .iter()
        .filter(|s| !s.is_defined())
        .map(|s| (s.id, s.name.clone(), s.scoped, s.first_seen))
        .collect();

    for (id, name, scoped, pos) in undefined {
        if scoped || name.is_empty() {
            return Err(AssembleError::SymbolUndefined { name, loc: Loc(pos) });
        }
        asm.symbols.get_mut(id).binding = Binding::Import;
    }
    Ok(())
}

/// Folds every chunk's pending substitutions against the now-fully-resolved
/// symbol table and patches their bytes in place (§4.E, §4.F).
fn patch_substitutions(asm: &mut Assembler) -> Result<(), AssembleError> {
    let chunk_ids: Vec<_> = asm.chunks.iter().map(|c| c.id).collect();
    for id in chunk_ids {
        let subs = asm.chunks.get(id).subs.clone();
        for sub in subs {
            let folded = evaluate(&sub.expr, &asm.symbols);
            let value = folded.as_const().ok_or(AssembleError::ExpressionNotConstant { loc: Loc(sub.expr.pos) })?;
            let chunk = asm.chunks.get_mut(id);
            match sub.size {
                crate::expr::Size::Byte => chunk.patch_byte(sub.offset, value as u8),
                crate::expr::Size::Word => chunk.patch_word_le(sub.offset, value as u16),
            }
        }
    }
    Ok(())
}

/// Checks every fixed-origin chunk's final byte range against every other
/// for overlap, now that each chunk's length is settled (§4.E, §8's "each
/// emitted byte appears exactly once in the written-range set" invariant).
/// Chunks without a fixed origin are the linker's problem to place without
/// collision, not this core's (§4.E).
fn check_fixed_origin_overlaps(asm: &mut Assembler) -> Result<(), AssembleError> {
    let mut ranges: Vec<(i64, i64, OverwriteMode)> = asm
        .chunks
        .iter()
        .filter_map(|c| c.org.map(|org| (org, org + c.data.len() as i64, c.overwrite_mode)))
        .filter(|(lo, hi, _)| lo < hi)
        .collect();
    ranges.sort_by_key(|&(lo, ..)| lo);

    for pair in ranges.windows(2) {
        let (lo_a, hi_a, mode_a) = pair[0];
        let (lo_b, _, mode_b) = pair[1];
        if lo_b >= hi_a {
            continue;
        }
        match (mode_a, mode_b) {
            (OverwriteMode::Forbid, _) | (_, OverwriteMode::Forbid) => {
                return Err(AssembleError::OverlappingWrite { offset: lo_b as usize, loc: Loc(None) });
            }
            (OverwriteMode::Warn, _) | (_, OverwriteMode::Warn) => {
                asm.emit_diagnostic(
                    Severity::Warning,
                    &format!("overlapping fixed-origin write at {lo_b:#x}"),
                    None,
                );
            }
            (OverwriteMode::Allow, OverwriteMode::Allow) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use crate::config::AssemblerOptions;
    use crate::token::Token;

    #[test]
    fn undefined_unreferenced_symbol_becomes_import() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&vec![Token::ident("jsr", None), Token::ident("external_routine", None)]).unwrap();
        let module = finalize(asm).unwrap();
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].name, "external_routine");
    }

    #[test]
    fn exported_constant_is_collected() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&vec![Token::ident("foo", None), Token::op("=", None), Token::num(7, None)]).unwrap();
        asm.assemble_line(&vec![Token::cs("export", None), Token::ident("foo", None)]).unwrap();
        let module = finalize(asm).unwrap();
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.exports[0].value, 7);
    }

    #[test]
    fn undefined_reference_inside_a_closed_scope_still_surfaces_as_import() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&vec![Token::cs("scope", None), Token::ident("inner", None)]).unwrap();
        asm.assemble_line(&vec![Token::ident("jsr", None), Token::ident("shared_const", None)]).unwrap();
        asm.assemble_line(&vec![Token::cs("endscope", None)]).unwrap();
        // before finalization, "shared_const" is known only inside "inner" —
        // promotion during finalize is what surfaces it at the global scope.
        let root = asm.scopes.root();
        assert!(asm.scopes.resolve(root, "shared_const").is_none());
        let module = finalize(asm).unwrap();
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].name, "shared_const");
    }

    #[test]
    fn unclosed_scope_is_a_hard_error() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&vec![Token::cs("scope", None), Token::ident("inner", None)]).unwrap();
        let err = finalize(asm).unwrap_err();
        assert!(matches!(err, AssembleError::ScopeNeverClosed { .. }));
    }

    #[test]
    fn overlapping_fixed_origin_chunks_are_rejected_by_default() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&vec![Token::cs("org", None), Token::num(0x8000, None)]).unwrap();
        asm.assemble_line(&vec![Token::ident("lda", None), Token::num(0x10, None)]).unwrap();
        asm.assemble_line(&vec![Token::cs("org", None), Token::num(0x8001, None)]).unwrap();
        asm.assemble_line(&vec![Token::ident("nop", None)]).unwrap();
        let err = finalize(asm).unwrap_err();
        assert!(matches!(err, AssembleError::OverlappingWrite { .. }));
    }

    #[test]
    fn overlapping_fixed_origin_chunks_allowed_when_configured() {
        let options = AssemblerOptions { overwrite_mode: crate::config::OverwriteMode::Allow, ..AssemblerOptions::default() };
        let mut asm = Assembler::new(options);
        asm.assemble_line(&vec![Token::cs("org", None), Token::num(0x8000, None)]).unwrap();
        asm.assemble_line(&vec![Token::ident("lda", None), Token::num(0x10, None)]).unwrap();
        asm.assemble_line(&vec![Token::cs("org", None), Token::num(0x8001, None)]).unwrap();
        asm.assemble_line(&vec![Token::ident("nop", None)]).unwrap();
        assert!(finalize(asm).is_ok());
    }
}
