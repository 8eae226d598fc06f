//! Component D (symbols): the symbol arena.
//!
//! Grounded on `aex/scope.rs`'s symbol-table entry shape (name, definedness,
//! a slot for the bound value), re-implemented over an owned `Vec` arena
//! indexed by [`SymbolId`] instead of the teacher's `Interner`-backed
//! `&'a Symbol` references (see `DESIGN.md`'s "No `unsafe` arena" entry).
//!
//! A symbol's `id` doubles as its link-visibility flag per §4.D/§6: only
//! symbols assigned an id ever appear in the module's exported/imported
//! symbol tables or get referenced by id from emitted code (`Op::Sym`).
//! Mutable (`.set`) symbols are allocated a slot here like any other (so
//! `.scope`/cheap-local bookkeeping can still find them by name) but are
//! never handed an externally-visible id and are always inlined by value
//! at `evaluate` time rather than emitted as a reference (§4.D "mutable
//! symbols are never link-visible").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;
use crate::token::Pos;

/// An index into the symbol arena. Stable for the lifetime of the table;
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// Whether a symbol's binding may later be changed (`.set`) or is fixed
/// once defined (a label or `.equ`/`=` constant, §4.D).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Mutability {
    Constant,
    Mutable,
}

/// A symbol's current binding state (§4.D).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Binding {
    /// Referenced but not yet given a value.
    Undefined,
    /// Bound to a constant value (folded expression, label address, or
    /// `.set` assignment).
    Value(i64),
    /// Imported from another module; resolved only at link time. Still
    /// occupies a slot so expressions referencing it type-check during
    /// this module's own passes.
    Import,
    /// Bound to a label: an offset within a chunk whose address is not
    /// known until that chunk is placed during finalization (§4.E, §4.G).
    Label { chunk: ChunkId, offset: usize },
}

/// One entry in the symbol arena.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub mutability: Mutability,
    pub binding: Binding,
    /// True for symbols that must resolve within their own defining scope
    /// and are never candidates for promotion to an enclosing scope at
    /// module finalization (§4.D, §4.G) — e.g. names reached only via an
    /// explicit `::`-qualified path.
    pub scoped: bool,
    /// Position of the symbol's first reference or definition, whichever
    /// came first, for "never defined" diagnostics.
    pub first_seen: Option<Pos>,
    /// Export visibility requested via `.export`/`.global` (§4.F); only
    /// meaningful for symbols that end up defined.
    pub exported: bool,
}

impl Symbol {
    pub fn is_defined(&self) -> bool {
        !matches!(self.binding, Binding::Undefined)
    }

    pub fn is_constant(&self) -> bool {
        matches!((&self.binding, self.mutability), (Binding::Value(_), Mutability::Constant))
    }
}

/// The arena of all symbols known to the module being assembled, shared
/// across every [`crate::scope::Scope`] (scopes hold name → id maps that
/// index into this table, §4.D).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Allocates a fresh, unnamed, undefined symbol slot and returns its id.
    /// Used directly by tests; normal code goes through
    /// [`SymbolTable::declare`].
    pub fn alloc(&mut self) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: String::new(),
            mutability: Mutability::Constant,
            binding: Binding::Undefined,
            scoped: false,
            first_seen: None,
            exported: false,
        });
        id
    }

    /// Declares a named symbol, initially undefined.
    pub fn declare(&mut self, name: impl Into<String>, mutability: Mutability, scoped: bool, pos: Option<Pos>) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.into(),
            mutability,
            binding: Binding::Undefined,
            scoped,
            first_seen: pos,
            exported: false,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn constant_value(&self, id: SymbolId) -> Option<i64> {
        match &self.get(id).binding {
            Binding::Value(v) if self.get(id).mutability == Mutability::Constant => Some(*v),
            _ => None,
        }
    }

    /// Test/bootstrap helper: binds a symbol directly to a constant value.
    pub fn set_constant_value(&mut self, id: SymbolId, value: i64) {
        let sym = self.get_mut(id);
        sym.binding = Binding::Value(value);
    }

    pub fn define(&mut self, id: SymbolId, value: i64) {
        self.get_mut(id).binding = Binding::Value(value);
    }

    pub fn define_label(&mut self, id: SymbolId, chunk: ChunkId, offset: usize) {
        self.get_mut(id).binding = Binding::Label { chunk, offset };
    }

    pub fn mark_export(&mut self, id: SymbolId) {
        self.get_mut(id).exported = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Symbol> {
        self.symbols.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// By-name index used alongside a [`SymbolTable`] by scopes that need fast
/// "have I seen this name anywhere" checks independent of scoping rules
/// (e.g. the cheap-local flat namespace, §4.D).
#[derive(Clone, Debug, Default)]
pub struct NameIndex {
    by_name: HashMap<String, SymbolId>,
}

impl NameIndex {
    pub fn new() -> Self {
        NameIndex::default()
    }

    pub fn get(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: SymbolId) {
        self.by_name.insert(name.into(), id);
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_starts_undefined() {
        let mut t = SymbolTable::new();
        let id = t.declare("foo", Mutability::Constant, false, None);
        assert!(!t.get(id).is_defined());
    }

    #[test]
    fn define_then_constant_value() {
        let mut t = SymbolTable::new();
        let id = t.declare("foo", Mutability::Constant, false, None);
        t.define(id, 42);
        assert_eq!(t.constant_value(id), Some(42));
    }

    #[test]
    fn mutable_symbol_has_no_constant_value() {
        let mut t = SymbolTable::new();
        let id = t.declare("foo", Mutability::Mutable, false, None);
        t.define(id, 42);
        assert_eq!(t.constant_value(id), None);
    }

    #[test]
    fn name_index_round_trips() {
        let mut idx = NameIndex::new();
        idx.insert("foo", SymbolId(3));
        assert_eq!(idx.get("foo"), Some(SymbolId(3)));
        assert_eq!(idx.get("bar"), None);
    }
}
