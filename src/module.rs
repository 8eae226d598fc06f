//! The finalized output value (§3, §6): a relocatable object module ready
//! to hand to a linker.
//!
//! Shape grounded in spec §3/§6 directly; `serde` derives throughout so a
//! host can serialize the module to whatever on-disk object format it
//! uses without this crate needing to know that format (§10).

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::segment::SegmentDescriptor;
use crate::symbol::{Binding, Mutability, Symbol};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportedSymbol {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportedSymbol {
    pub name: String,
}

/// The finished, link-ready product of assembling one module (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub chunks: Vec<Chunk>,
    pub segments: Vec<SegmentDescriptor>,
    pub exports: Vec<ExportedSymbol>,
    pub imports: Vec<ImportedSymbol>,
}

impl Module {
    /// Builds the exported/imported symbol lists from a finalized symbol
    /// table (§4.G step 3: only symbols still undefined at the global scope
    /// after promotion become imports; only symbols explicitly `.export`ed
    /// and successfully defined become exports).
    pub fn collect_symbols(symbols: &[Symbol]) -> (Vec<ExportedSymbol>, Vec<ImportedSymbol>) {
        let mut exports = Vec::new();
        let mut imports = Vec::new();
        for sym in symbols {
            match (&sym.binding, sym.exported) {
                (Binding::Value(v), true) if sym.mutability == Mutability::Constant => {
                    exports.push(ExportedSymbol { name: sym.name.clone(), value: *v });
                }
                (Binding::Import, _) => {
                    imports.push(ImportedSymbol { name: sym.name.clone() });
                }
                _ => {}
            }
        }
        (exports, imports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolId;

    #[test]
    fn collects_only_exported_constants_and_imports() {
        let symbols = vec![
            Symbol {
                id: SymbolId(0),
                name: "a".into(),
                mutability: Mutability::Constant,
                binding: Binding::Value(42),
                scoped: false,
                first_seen: None,
                exported: true,
            },
            Symbol {
                id: SymbolId(1),
                name: "b".into(),
                mutability: Mutability::Constant,
                binding: Binding::Value(7),
                scoped: false,
                first_seen: None,
                exported: false,
            },
            Symbol {
                id: SymbolId(2),
                name: "c".into(),
                mutability: Mutability::Constant,
                binding: Binding::Import,
                scoped: false,
                first_seen: None,
                exported: false,
            },
        ];
        let (exports, imports) = Module::collect_symbols(&symbols);
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "a");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name, "c");
    }
}
