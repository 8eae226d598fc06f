//! Component C: the CPU opcode table.
//!
//! Shape grounded in `other_examples/131be27f_popeyeotaku-pop65__src-opcode.rs.rs`
//! — a from-scratch 6502 assembler in the retrieval pack that keys a
//! `HashMap<&'static str, Op>` table by mnemonic, where `Op` is itself a
//! `HashMap<AMode, u8>`, built once behind a `LazyLock`. Adapted to this
//! spec's mode-tag vocabulary (`imp/acc/imm/zpg/zpx/zpy/abs/abx/aby/ind/
//! inx/iny/rel`) and its `argLen` contract (§4.C, §6) rather than pop65's
//! own `AMode::byte_size`.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// An addressing-mode tag, as produced by the instruction-argument parser
/// in component F after pseudo-mode disambiguation (§4.F).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Mode {
    /// Implied: no operand byte.
    Imp,
    /// Accumulator: no operand byte (`asl a`).
    Acc,
    /// Immediate: `#$nn`.
    Imm,
    /// Zero-page.
    Zpg,
    /// Zero-page, X-indexed.
    Zpx,
    /// Zero-page, Y-indexed.
    Zpy,
    /// Absolute.
    Abs,
    /// Absolute, X-indexed.
    Abx,
    /// Absolute, Y-indexed.
    Aby,
    /// Indirect (`jmp ($nnnn)`).
    Ind,
    /// Indexed indirect, X (`($nn,x)`).
    Inx,
    /// Indirect indexed, Y (`($nn),y`).
    Iny,
    /// PC-relative branch displacement.
    Rel,
}

impl Mode {
    /// Operand byte count for this mode (§4.C, §6).
    pub fn arg_len(self) -> u8 {
        use Mode::*;
        match self {
            Imp | Acc => 0,
            Imm | Zpg | Zpx | Zpy | Inx | Iny | Rel => 1,
            Abs | Abx | Aby | Ind => 2,
        }
    }

    /// True for the zero-page family, used when picking among the `add`
    /// pseudo-mode's size-disambiguated variants (§4.F step 3).
    pub fn is_zero_page(self) -> bool {
        matches!(self, Mode::Zpg | Mode::Zpx | Mode::Zpy)
    }
}

/// A single mnemonic's addressing-mode → opcode-byte mapping.
#[derive(Clone, Debug, Default)]
pub struct Op {
    by_mode: HashMap<Mode, u8>,
}

impl Op {
    fn new<T: IntoIterator<Item = (Mode, u8)>>(entries: T) -> Self {
        Op {
            by_mode: HashMap::from_iter(entries),
        }
    }

    pub fn opcode_for(&self, mode: Mode) -> Option<u8> {
        self.by_mode.get(&mode).copied()
    }

    pub fn modes(&self) -> impl Iterator<Item = Mode> + '_ {
        self.by_mode.keys().copied()
    }
}

/// The CPU opcode table: mnemonic (already lowercased by the caller) →
/// addressing mode → opcode byte (§4.C, §6).
pub struct Cpu {
    ops: &'static LazyLock<HashMap<&'static str, Op>>,
}

impl Cpu {
    /// The documented NMOS 6502 instruction set.
    pub fn mos6502() -> Self {
        Cpu { ops: &OP_TABLE }
    }

    pub fn lookup(&self, mnemonic: &str) -> Option<&'static Op> {
        self.ops.get(mnemonic)
    }

    pub fn mnemonics(&self) -> impl Iterator<Item = &'static str> {
        self.ops.keys().copied()
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::mos6502()
    }
}

static OP_TABLE: LazyLock<HashMap<&'static str, Op>> = LazyLock::new(|| {
    use Mode::*;
    HashMap::from([
        ("adc", Op::new([(Imm, 0x69), (Zpg, 0x65), (Zpx, 0x75), (Abs, 0x6D), (Abx, 0x7D), (Aby, 0x79), (Inx, 0x61), (Iny, 0x71)])),
        ("and", Op::new([(Imm, 0x29), (Zpg, 0x25), (Zpx, 0x35), (Abs, 0x2D), (Abx, 0x3D), (Aby, 0x39), (Inx, 0x21), (Iny, 0x31)])),
        ("asl", Op::new([(Acc, 0x0A), (Zpg, 0x06), (Zpx, 0x16), (Abs, 0x0E), (Abx, 0x1E)])),
        ("bcc", Op::new([(Rel, 0x90)])),
        ("bcs", Op::new([(Rel, 0xB0)])),
        ("beq", Op::new([(Rel, 0xF0)])),
        ("bit", Op::new([(Zpg, 0x24), (Abs, 0x2C)])),
        ("bmi", Op::new([(Rel, 0x30)])),
        ("bne", Op::new([(Rel, 0xD0)])),
        ("bpl", Op::new([(Rel, 0x10)])),
        ("brk", Op::new([(Imp, 0x00)])),
        ("bvc", Op::new([(Rel, 0x50)])),
        ("bvs", Op::new([(Rel, 0x70)])),
        ("clc", Op::new([(Imp, 0x18)])),
        ("cld", Op::new([(Imp, 0xD8)])),
        ("cli", Op::new([(Imp, 0x58)])),
        ("clv", Op::new([(Imp, 0xB8)])),
        ("cmp", Op::new([(Imm, 0xC9), (Zpg, 0xC5), (Zpx, 0xD5), (Abs, 0xCD), (Abx, 0xDD), (Aby, 0xD9), (Inx, 0xC1), (Iny, 0xD1)])),
        ("cpx", Op::new([(Imm, 0xE0), (Zpg, 0xE4), (Abs, 0xEC)])),
        ("cpy", Op::new([(Imm, 0xC0), (Zpg, 0xC4), (Abs, 0xCC)])),
        ("dec", Op::new([(Zpg, 0xC6), (Zpx, 0xD6), (Abs, 0xCE), (Abx, 0xDE)])),
        ("dex", Op::new([(Imp, 0xCA)])),
        ("dey", Op::new([(Imp, 0x88)])),
        ("eor", Op::new([(Imm, 0x49), (Zpg, 0x45), (Zpx, 0x55), (Abs, 0x4D), (Abx, 0x5D), (Aby, 0x59), (Inx, 0x41), (Iny, 0x51)])),
        ("inc", Op::new([(Zpg, 0xE6), (Zpx, 0xF6), (Abs, 0xEE), (Abx, 0xFE)])),
        ("inx", Op::new([(Imp, 0xE8)])),
        ("iny", Op::new([(Imp, 0xC8)])),
        ("jmp", Op::new([(Abs, 0x4C), (Ind, 0x6C)])),
        ("jsr", Op::new([(Abs, 0x20)])),
        ("lda", Op::new([(Imm, 0xA9), (Zpg, 0xA5), (Zpx, 0xB5), (Abs, 0xAD), (Abx, 0xBD), (Aby, 0xB9), (Inx, 0xA1), (Iny, 0xB1)])),
        ("ldx", Op::new([(Imm, 0xA2), (Zpg, 0xA6), (Zpy, 0xB6), (Abs, 0xAE), (Aby, 0xBE)])),
        ("ldy", Op::new([(Imm, 0xA0), (Zpg, 0xA4), (Zpx, 0xB4), (Abs, 0xAC), (Abx, 0xBC)])),
        ("lsr", Op::new([(Acc, 0x4A), (Zpg, 0x46), (Zpx, 0x56), (Abs, 0x4E), (Abx, 0x5E)])),
        ("nop", Op::new([(Imp, 0xEA)])),
        ("ora", Op::new([(Imm, 0x09), (Zpg, 0x05), (Zpx, 0x15), (Abs, 0x0D), (Abx, 0x1D), (Aby, 0x19), (Inx, 0x01), (Iny, 0x11)])),
        ("pha", Op::new([(Imp, 0x48)])),
        ("php", Op::new([(Imp, 0x08)])),
        ("pla", Op::new([(Imp, 0x68)])),
        ("plp", Op::new([(Imp, 0x28)])),
        ("rol", Op::new([(Acc, 0x2A), (Zpg, 0x26), (Zpx, 0x36), (Abs, 0x2E), (Abx, 0x3E)])),
        ("ror", Op::new([(Acc, 0x6A), (Zpg, 0x66), (Zpx, 0x76), (Abs, 0x6E), (Abx, 0x7E)])),
        ("rti", Op::new([(Imp, 0x40)])),
        ("rts", Op::new([(Imp, 0x60)])),
        ("sbc", Op::new([(Imm, 0xE9), (Zpg, 0xE5), (Zpx, 0xF5), (Abs, 0xED), (Abx, 0xFD), (Aby, 0xF9), (Inx, 0xE1), (Iny, 0xF1)])),
        ("sec", Op::new([(Imp, 0x38)])),
        ("sed", Op::new([(Imp, 0xF8)])),
        ("sei", Op::new([(Imp, 0x78)])),
        ("sta", Op::new([(Zpg, 0x85), (Zpx, 0x95), (Abs, 0x8D), (Abx, 0x9D), (Aby, 0x99), (Inx, 0x81), (Iny, 0x91)])),
        ("stx", Op::new([(Zpg, 0x86), (Zpy, 0x96), (Abs, 0x8E)])),
        ("sty", Op::new([(Zpg, 0x84), (Zpx, 0x94), (Abs, 0x8C)])),
        ("tax", Op::new([(Imp, 0xAA)])),
        ("tay", Op::new([(Imp, 0xA8)])),
        ("tsx", Op::new([(Imp, 0xBA)])),
        ("txa", Op::new([(Imp, 0x8A)])),
        ("txs", Op::new([(Imp, 0x9A)])),
        ("tya", Op::new([(Imp, 0x98)])),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_all_documented_mnemonics() {
        let cpu = Cpu::mos6502();
        assert_eq!(cpu.mnemonics().count(), 56);
    }

    #[test]
    fn lda_zero_page_and_absolute() {
        let cpu = Cpu::mos6502();
        let op = cpu.lookup("lda").unwrap();
        assert_eq!(op.opcode_for(Mode::Zpg), Some(0xA5));
        assert_eq!(op.opcode_for(Mode::Abs), Some(0xAD));
        assert_eq!(op.opcode_for(Mode::Zpy), None);
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        let cpu = Cpu::mos6502();
        assert!(cpu.lookup("xyz").is_none());
    }

    #[test]
    fn arg_lens() {
        assert_eq!(Mode::Imp.arg_len(), 0);
        assert_eq!(Mode::Acc.arg_len(), 0);
        assert_eq!(Mode::Imm.arg_len(), 1);
        assert_eq!(Mode::Rel.arg_len(), 1);
        assert_eq!(Mode::Abs.arg_len(), 2);
        assert_eq!(Mode::Ind.arg_len(), 2);
    }
}
