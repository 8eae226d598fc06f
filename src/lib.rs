//! A two-pass, ca65-compatible assembler core for the MOS 6502 family.
//!
//! This crate does not tokenize, preprocess, or expand macros — it consumes
//! an already-lexed stream of [`token::Line`]s via the [`source::Source`]
//! trait and produces a relocatable [`module::Module`] of chunks, segments,
//! and symbols, ready to hand to a linker. Tokenizing, `.include` handling,
//! and macro expansion are a host's job, upstream of this crate.
//!
//! Component layout mirrors the design's own decomposition:
//!
//! - [`interval`] — half-open integer interval sets (free-lists, written
//!   ranges)
//! - [`expr`] — expression trees and partial constant evaluation
//! - [`cpu`] — the 6502 opcode table
//! - [`scope`] / [`symbol`] — the `.scope`/`.proc` lexical tree and symbol
//!   arena
//! - [`chunk`] / [`segment`] — relocatable byte chunks and named output
//!   regions
//! - [`assembler`] / [`instr`] / [`directive`] — line classification,
//!   instruction encoding, directive dispatch
//! - [`finalize`] — module finalization: symbol promotion, address
//!   assignment, patch resolution
//!
//! ```
//! use mos6502_asm::assembler::Assembler;
//! use mos6502_asm::config::AssemblerOptions;
//! use mos6502_asm::source::VecSource;
//! use mos6502_asm::token::Token;
//!
//! let mut asm = Assembler::new(AssemblerOptions::default());
//! let source = VecSource::new(vec![
//!     vec![Token::ident("lda", None), Token::num(0x10, None)],
//!     vec![Token::ident("rts", None)],
//! ]);
//! let module = asm.assemble(source).unwrap();
//! assert_eq!(module.chunks[0].data, vec![0xA5, 0x10, 0x60]);
//! ```

pub mod assembler;
pub mod chunk;
pub mod config;
pub mod cpu;
pub mod diagnostics;
pub mod directive;
pub mod error;
pub mod expr;
pub mod finalize;
pub mod instr;
pub mod interval;
pub mod module;
pub mod scope;
pub mod segment;
pub mod source;
pub mod symbol;
pub mod token;

pub use assembler::Assembler;
pub use config::AssemblerOptions;
pub use error::{AssembleError, Result};
pub use module::Module;
pub use source::Source;
