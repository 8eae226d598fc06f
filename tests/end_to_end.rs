//! End-to-end scenarios driven through the public `Source` trait, matching
//! the six worked examples the design document calls out: zero-page
//! auto-sizing, forward branches, anonymous labels, scope promotion,
//! mutability checks, and `.free` bookkeeping. Unit tests colocated with
//! each component cover the same ground at finer grain; these exercise the
//! crate the way a host actually would, end to end through `assemble`.

use mos6502_asm::assembler::Assembler;
use mos6502_asm::config::AssemblerOptions;
use mos6502_asm::error::AssembleError;
use mos6502_asm::source::VecSource;
use mos6502_asm::token::Token;

fn assemble(lines: Vec<Vec<Token>>) -> Result<mos6502_asm::Module, AssembleError> {
    Assembler::new(AssemblerOptions::default()).assemble(VecSource::new(lines))
}

#[test]
fn zero_page_and_absolute_addressing_round_trip() {
    let module = assemble(vec![
        vec![Token::ident("lda", None), Token::num(0x10, None)],
        vec![Token::ident("lda", None), Token::num(0x1000, None)],
    ])
    .unwrap();
    assert_eq!(module.chunks[0].data, vec![0xA5, 0x10, 0xAD, 0x00, 0x10]);
}

#[test]
fn forward_branch_resolves_to_correct_displacement() {
    let module = assemble(vec![
        vec![Token::ident("beq", None), Token::ident("skip", None)],
        vec![Token::ident("nop", None)],
        vec![Token::ident("skip", None), Token::op(":", None)],
        vec![Token::ident("rts", None)],
    ])
    .unwrap();
    assert_eq!(module.chunks[0].data, vec![0xF0, 0x01, 0xEA, 0x60]);
}

#[test]
fn anonymous_forward_label() {
    let module = assemble(vec![
        vec![Token::ident("bne", None), Token::op(":+", None)],
        vec![Token::ident("nop", None)],
        vec![Token::op(":", None)],
    ])
    .unwrap();
    assert_eq!(module.chunks[0].data, vec![0xD0, 0x01, 0xEA]);
}

#[test]
fn undefined_external_reference_becomes_a_module_import() {
    let module = assemble(vec![vec![Token::ident("jsr", None), Token::ident("init", None)]]).unwrap();
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.imports[0].name, "init");
}

#[test]
fn set_on_a_previously_constant_symbol_is_rejected() {
    let err = assemble(vec![
        vec![Token::ident("limit", None), Token::op("=", None), Token::num(10, None)],
        vec![Token::cs("set", None), Token::ident("limit", None), Token::op(",", None), Token::num(20, None)],
    ])
    .unwrap_err();
    assert!(matches!(err, AssembleError::CannotChangeMutability { .. }));
}

#[test]
fn free_range_is_recorded_against_the_active_segment() {
    let module = assemble(vec![
        vec![Token::cs("org", None), Token::num(0x0200, None)],
        vec![Token::cs("free", None), Token::num(0x0100, None)],
    ])
    .unwrap();
    let code = module.segments.iter().find(|s| s.name == "CODE").unwrap();
    assert!(code.free.has(0x0250));
    assert!(!code.free.has(0x0300));
}
