//! Component F: the assembler core — line classification, label binding,
//! instruction encoding, and directive dispatch.
//!
//! The driving loop is shaped like `aex::codegen::CodeGenerator::visit_stmts`
//! (match on statement kind, dispatch to a handler, thread one context
//! struct through the whole pass) and `aex::compiler.rs`/`aex::compilation.rs`
//! (a single owner struct holding every table the pass needs). Instruction
//! encoding and directive semantics are new, grounded directly in spec
//! §4.F. `tracing` spans one per processed line, matching §10.

use std::collections::VecDeque;

use tracing::instrument;

use crate::chunk::ChunkId;
use crate::config::AssemblerOptions;
use crate::cpu::{Cpu, Mode};
use crate::diagnostics::{CollectingSink, DiagnosticSink, Severity};
use crate::directive::Directive;
use crate::error::{AssembleError, Loc};
use crate::expr::{evaluate, BinaryOp, Expr, Size, UnaryOp};
use crate::instr::{self, Arg, Force, Index};
use crate::module::Module;
use crate::scope::{ScopeKind, ScopeTree};
use crate::segment::SegmentTable;
use crate::source::Source;
use crate::symbol::{Mutability, SymbolId, SymbolTable};
use crate::token::{Line, Pos, Token, TokenKind};

/// What opened a lexical scope still on the open-scope stack, so
/// `.endscope` and `.endproc` can be told apart and mismatches reported
/// precisely (§4.F, §7).
#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenScope {
    Scope,
    Proc,
}

/// The two-pass assembler core (§2, §4.F). Owns every table a module's
/// assembly touches; `module()` (component G, `finalize.rs`) consumes it
/// and produces the link-ready [`Module`].
pub struct Assembler {
    pub symbols: SymbolTable,
    pub scopes: ScopeTree,
    pub chunks: crate::chunk::ChunkTable,
    pub segments: SegmentTable,
    cpu: Cpu,
    options: AssemblerOptions,
    sink: Box<dyn DiagnosticSink>,
    current_chunk: ChunkId,
    /// Saved `current_chunk` values, one per still-open `.pushseg`, restored
    /// by the matching `.popseg` (§4.E: "save/restore `(segments,
    /// active-chunk)`").
    segment_chunk_stack: Vec<ChunkId>,
    /// Set by `.segmentprefix`; prepended to every segment name literal a
    /// later `.segment`/`.pushseg` names (§4.F).
    segment_prefix: String,
    open_scopes: Vec<(OpenScope, String)>,
    anon_defs: Vec<SymbolId>,
    anon_pending: VecDeque<SymbolId>,
    plus_pending: VecDeque<SymbolId>,
    minus_defs: Vec<SymbolId>,
}

impl Assembler {
    pub fn new(options: AssemblerOptions) -> Self {
        let mut chunks = crate::chunk::ChunkTable::new();
        let segments = SegmentTable::new("CODE");
        let current_chunk = chunks.create_with_overwrite_mode("CODE", None, options.overwrite_mode);
        Assembler {
            symbols: SymbolTable::new(),
            scopes: ScopeTree::new(),
            chunks,
            segments,
            cpu: Cpu::mos6502(),
            options,
            sink: Box::new(CollectingSink::default()),
            current_chunk,
            segment_chunk_stack: Vec::new(),
            segment_prefix: String::new(),
            open_scopes: Vec::new(),
            anon_defs: Vec::new(),
            anon_pending: VecDeque::new(),
            plus_pending: VecDeque::new(),
            minus_defs: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Drives `source` to exhaustion, assembling every line, then finalizes
    /// the module (component G). Stops at the first error (§4.F, §7).
    pub fn assemble(mut self, mut source: impl Source) -> Result<Module, AssembleError> {
        while let Some(line) = source.next_line()? {
            self.assemble_line(&line)?;
        }
        crate::finalize::finalize(self)
    }

    #[instrument(skip(self, line))]
    pub fn assemble_line(&mut self, line: &Line) -> Result<(), AssembleError> {
        if line.is_empty() {
            return Ok(());
        }

        let pos = line[0].pos();

        // Definition-only forms: a line consisting of exactly one token
        // that is itself a label definition (§4.D).
        if line.len() == 1 {
            if line[0].as_op() == Some(":") {
                self.define_anon_label(pos);
                return Ok(());
            }
            if line[0].as_op() == Some("+") {
                self.define_plus_label(pos);
                return Ok(());
            }
            if line[0].as_op() == Some("-") {
                self.define_minus_label(pos);
                return Ok(());
            }
        }

        let mut rest = &line[..];

        // `name:` or `@name:` label prefix, possibly followed by more
        // tokens on the same line (§4.D).
        if rest.len() >= 2 {
            if let Some(name) = rest[0].as_ident() {
                if rest[1].as_op() == Some(":") {
                    self.define_named_label(name, pos)?;
                    rest = &rest[2..];
                    if rest.is_empty() {
                        return Ok(());
                    }
                }
            }
        }

        // `name = expr`: `.equ`-equivalent assignment sugar (§4.F).
        if rest.len() >= 2 {
            if let Some(name) = rest[0].as_ident() {
                if rest[1].as_op() == Some("=") {
                    return self.assign_symbol(name, &rest[2..], Mutability::Constant, pos);
                }
            }
        }

        match &rest[0].kind {
            TokenKind::Cs(name) => {
                let dir = Directive::from_name(name)
                    .ok_or_else(|| AssembleError::UnknownDirective { name: name.clone(), loc: Loc(pos) })?;
                self.handle_directive(dir, &rest[1..], pos)
            }
            TokenKind::Ident(mnemonic) => self.assemble_instruction(&mnemonic.to_ascii_lowercase(), &rest[1..], pos),
            _ => Err(AssembleError::ExpectedIdentifier { loc: Loc(pos) }),
        }
    }

    // --- Label definitions -------------------------------------------------

    fn clear_cheap_locals_if_needed(&mut self, cheap: bool) {
        if !cheap {
            let current = self.scopes.current();
            self.scopes.get_mut(current).clear_cheap_locals();
        }
    }

    fn define_named_label(&mut self, name: &str, pos: Option<Pos>) -> Result<(), AssembleError> {
        let cheap = name.starts_with('@');
        self.clear_cheap_locals_if_needed(cheap);

        let current = self.scopes.current();
        let existing = if cheap { self.scopes.get(current).cheap_local(name) } else { self.scopes.get(current).local(name) };

        let id = match existing {
            Some(id) if self.symbols.get(id).is_defined() => {
                return Err(AssembleError::RedefiningSymbol { name: name.to_string(), loc: Loc(pos) });
            }
            Some(id) => id,
            None => {
                let id = self.symbols.declare(name, Mutability::Constant, cheap, pos);
                if cheap {
                    self.scopes.get_mut(current).bind_cheap_local(name, id);
                } else {
                    self.scopes.get_mut(current).bind(name, id);
                }
                id
            }
        };

        let offset = self.chunks.get(self.current_chunk).offset();
        self.symbols.define_label(id, self.current_chunk, offset);
        tracing::debug!(name, offset, "label bound");
        Ok(())
    }

    fn define_anon_label(&mut self, pos: Option<Pos>) {
        let id = self.anon_pending.pop_front().unwrap_or_else(|| self.symbols.alloc());
        let offset = self.chunks.get(self.current_chunk).offset();
        self.symbols.define_label(id, self.current_chunk, offset);
        self.anon_defs.push(id);
        let _ = pos;
    }

    fn define_plus_label(&mut self, _pos: Option<Pos>) {
        if let Some(id) = self.plus_pending.pop_front() {
            let offset = self.chunks.get(self.current_chunk).offset();
            self.symbols.define_label(id, self.current_chunk, offset);
        }
    }

    fn define_minus_label(&mut self, _pos: Option<Pos>) {
        let id = self.symbols.alloc();
        let offset = self.chunks.get(self.current_chunk).offset();
        self.symbols.define_label(id, self.current_chunk, offset);
        self.minus_defs.push(id);
    }

    // --- Assignment ---------------------------------------------------------

    fn assign_symbol(&mut self, name: &str, expr_tokens: &[Token], mutability: Mutability, pos: Option<Pos>) -> Result<(), AssembleError> {
        let expr = self.parse_expr(expr_tokens, pos)?;
        let folded = evaluate(&expr, &self.symbols);
        let value = folded.as_const().ok_or(match mutability {
            Mutability::Mutable => AssembleError::MutableSetRequiresConstant { loc: Loc(pos) },
            Mutability::Constant => AssembleError::ExpressionNotConstant { loc: Loc(pos) },
        })?;

        let current = self.scopes.current();
        match self.scopes.get(current).local(name) {
            Some(id) => {
                let sym = self.symbols.get(id);
                if sym.mutability != mutability {
                    return Err(AssembleError::CannotChangeMutability { name: name.to_string(), loc: Loc(pos) });
                }
                if sym.is_defined() && mutability == Mutability::Constant {
                    return Err(AssembleError::RedefiningSymbol { name: name.to_string(), loc: Loc(pos) });
                }
                self.symbols.define(id, value);
            }
            None => {
                let id = self.symbols.declare(name, mutability, false, pos);
                self.scopes.get_mut(current).bind(name, id);
                self.symbols.define(id, value);
            }
        }
        Ok(())
    }

    // --- Instructions -------------------------------------------------------

    fn assemble_instruction(&mut self, mnemonic: &str, operand: &[Token], pos: Option<Pos>) -> Result<(), AssembleError> {
        let arg = self.parse_arg(operand, pos)?;
        let (mode, expr) = instr::select_mode(mnemonic, &arg, &self.cpu, pos)?;
        let opcode = self
            .cpu
            .lookup(mnemonic)
            .and_then(|op| op.opcode_for(mode))
            .expect("select_mode only returns modes the mnemonic supports");

        self.chunks.get_mut(self.current_chunk).push_byte(opcode);

        match (mode, expr) {
            (Mode::Imp, _) | (Mode::Acc, _) => {}
            (Mode::Rel, Some(target)) => {
                let next_offset = self.chunks.get(self.current_chunk).offset() + 1;
                let here = self.symbols.alloc();
                self.symbols.define_label(here, self.current_chunk, next_offset);
                let disp = Expr::binary(BinaryOp::Sub, target.clone(), Expr::sym(here, pos), pos);
                self.chunks.get_mut(self.current_chunk).push_pending(Size::Byte, disp);
            }
            (_, Some(e)) => {
                let size = if mode.arg_len() == 1 { Size::Byte } else { Size::Word };
                self.chunks.get_mut(self.current_chunk).push_pending(size, e.clone());
            }
            (_, None) => {}
        }
        Ok(())
    }

    // --- Expression / argument parsing --------------------------------------

    fn parse_arg(&mut self, tokens: &[Token], pos: Option<Pos>) -> Result<Arg, AssembleError> {
        if tokens.is_empty() {
            return Ok(Arg::Implied);
        }
        if tokens.len() == 1 {
            if let Some(id) = tokens[0].as_ident() {
                if id.eq_ignore_ascii_case("a") {
                    return Ok(Arg::Accumulator);
                }
            }
        }
        if tokens[0].as_op() == Some("#") {
            let e = self.parse_expr(&tokens[1..], pos)?;
            return Ok(Arg::Immediate(e));
        }
        if let TokenKind::Group(inner) = &tokens[0].kind {
            let rest = &tokens[1..];
            if inner.len() >= 2
                && inner[inner.len() - 2].as_op() == Some(",")
                && inner.last().and_then(Token::as_ident).map(|s| s.eq_ignore_ascii_case("x")).unwrap_or(false)
            {
                let e = self.parse_expr(&inner[..inner.len() - 2], pos)?;
                return Ok(Arg::IndirectX(e));
            }
            if rest.len() >= 2 && rest[0].as_op() == Some(",") && rest[1].as_ident().map(|s| s.eq_ignore_ascii_case("y")).unwrap_or(false) {
                let e = self.parse_expr(inner, pos)?;
                return Ok(Arg::IndirectY(e));
            }
            let e = self.parse_expr(inner, pos)?;
            return Ok(Arg::Indirect(e));
        }

        let (force, tokens) = match tokens[0].as_op() {
            Some("z:") => (Some(Force::ZeroPage), &tokens[1..]),
            Some("a:") => (Some(Force::Absolute), &tokens[1..]),
            _ => (None, tokens),
        };

        if tokens.len() >= 2 {
            let last = &tokens[tokens.len() - 1];
            let second_last = &tokens[tokens.len() - 2];
            if second_last.as_op() == Some(",") {
                if let Some(reg) = last.as_ident() {
                    if reg.eq_ignore_ascii_case("x") {
                        let e = self.parse_expr(&tokens[..tokens.len() - 2], pos)?;
                        return Ok(Arg::Indexed(e, Index::X, force));
                    } else if reg.eq_ignore_ascii_case("y") {
                        let e = self.parse_expr(&tokens[..tokens.len() - 2], pos)?;
                        return Ok(Arg::Indexed(e, Index::Y, force));
                    }
                }
            }
        }

        if tokens.len() == 1 {
            if tokens[0].as_op() == Some(":+") {
                return Ok(Arg::Plain(self.ref_anon_forward(pos), force));
            }
            if tokens[0].as_op() == Some(":-") {
                return Ok(Arg::Plain(self.ref_anon_backward(pos)?, force));
            }
            if tokens[0].as_op() == Some("+") {
                return Ok(Arg::Plain(self.ref_plus(pos), force));
            }
            if tokens[0].as_op() == Some("-") {
                return Ok(Arg::Plain(self.ref_minus(pos)?, force));
            }
        }

        let e = self.parse_expr(tokens, pos)?;
        Ok(Arg::Plain(e, force))
    }

    fn ref_anon_forward(&mut self, pos: Option<Pos>) -> Expr {
        let id = self.symbols.alloc();
        self.anon_pending.push_back(id);
        Expr::sym(id, pos)
    }

    fn ref_anon_backward(&mut self, pos: Option<Pos>) -> Result<Expr, AssembleError> {
        self.anon_defs.last().copied().map(|id| Expr::sym(id, pos)).ok_or(AssembleError::BadAnonymousBackref { loc: Loc(pos) })
    }

    fn ref_plus(&mut self, pos: Option<Pos>) -> Expr {
        let id = self.symbols.alloc();
        self.plus_pending.push_back(id);
        Expr::sym(id, pos)
    }

    fn ref_minus(&mut self, pos: Option<Pos>) -> Result<Expr, AssembleError> {
        self.minus_defs.last().copied().map(|id| Expr::sym(id, pos)).ok_or(AssembleError::BadRelativeBackref { loc: Loc(pos) })
    }

    fn parse_expr(&mut self, tokens: &[Token], pos: Option<Pos>) -> Result<Expr, AssembleError> {
        let mut idx = 0usize;
        let e = self.parse_bin_expr(tokens, &mut idx, 0, pos)?;
        if idx != tokens.len() {
            return Err(AssembleError::BadArgument { loc: Loc(pos) });
        }
        Ok(e)
    }

    fn parse_bin_expr(&mut self, tokens: &[Token], idx: &mut usize, min_bp: u8, pos: Option<Pos>) -> Result<Expr, AssembleError> {
        let mut lhs = self.parse_unary(tokens, idx, pos)?;
        loop {
            // Precedence, loosest to tightest: logical or/and, comparisons,
            // additive/bitwise, multiplicative/shift (§4.B).
            let (op, bp) = match tokens.get(*idx).and_then(Token::as_op) {
                Some("||") => (BinaryOp::LogOr, 1),
                Some("&&") => (BinaryOp::LogAnd, 2),
                Some("=") => (BinaryOp::Eq, 3),
                Some("<>") => (BinaryOp::Ne, 3),
                Some("<=") => (BinaryOp::Le, 3),
                Some(">=") => (BinaryOp::Ge, 3),
                Some("<") => (BinaryOp::Lt, 3),
                Some(">") => (BinaryOp::Gt, 3),
                Some("+") => (BinaryOp::Add, 4),
                Some("-") => (BinaryOp::Sub, 4),
                Some("&") => (BinaryOp::And, 4),
                Some("|") => (BinaryOp::Or, 4),
                Some("^") => (BinaryOp::Xor, 4),
                Some("*") => (BinaryOp::Mul, 5),
                Some("/") => (BinaryOp::Div, 5),
                Some("%") => (BinaryOp::Mod, 5),
                Some("<<") => (BinaryOp::Shl, 5),
                Some(">>") => (BinaryOp::Shr, 5),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            *idx += 1;
            let rhs = self.parse_bin_expr(tokens, idx, bp + 1, pos)?;
            lhs = Expr::binary(op, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, tokens: &[Token], idx: &mut usize, pos: Option<Pos>) -> Result<Expr, AssembleError> {
        match tokens.get(*idx).and_then(Token::as_op) {
            Some("-") => {
                *idx += 1;
                let operand = self.parse_unary(tokens, idx, pos)?;
                Ok(Expr::unary(UnaryOp::Neg, operand, pos))
            }
            Some("!") => {
                *idx += 1;
                let operand = self.parse_unary(tokens, idx, pos)?;
                Ok(Expr::unary(UnaryOp::Not, operand, pos))
            }
            Some("<") => {
                *idx += 1;
                let operand = self.parse_unary(tokens, idx, pos)?;
                Ok(Expr::unary(UnaryOp::Lo, operand, pos))
            }
            Some(">") => {
                *idx += 1;
                let operand = self.parse_unary(tokens, idx, pos)?;
                Ok(Expr::unary(UnaryOp::Hi, operand, pos))
            }
            _ => self.parse_primary(tokens, idx, pos),
        }
    }

    fn parse_primary(&mut self, tokens: &[Token], idx: &mut usize, pos: Option<Pos>) -> Result<Expr, AssembleError> {
        let tok = tokens.get(*idx).ok_or(AssembleError::BadArgument { loc: Loc(pos) })?;
        *idx += 1;
        match &tok.kind {
            TokenKind::Num(n) => Ok(Expr::num(*n, tok.pos.or(pos))),
            TokenKind::Op(op) if op == "*" => Ok(Expr::here(tok.pos.or(pos))),
            TokenKind::Group(inner) => self.parse_expr(inner, pos),
            TokenKind::Ident(name) => {
                let mut segments = vec![name.clone()];
                while tokens.get(*idx).and_then(Token::as_op) == Some("::") {
                    let next = tokens.get(*idx + 1).and_then(Token::as_ident).ok_or(AssembleError::ExpectedIdentifier { loc: Loc(pos) })?;
                    segments.push(next.to_string());
                    *idx += 2;
                }
                let id = self.resolve_or_declare(&segments, tok.pos.or(pos))?;
                Ok(Expr::sym(id, tok.pos.or(pos)))
            }
            _ => Err(AssembleError::BadArgument { loc: Loc(pos) }),
        }
    }

    fn resolve_or_declare(&mut self, segments: &[String], pos: Option<Pos>) -> Result<SymbolId, AssembleError> {
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let current = self.scopes.current();

        if segments.len() == 1 {
            let name = &segments[0];
            if let Some(name) = name.strip_prefix('@') {
                if let Some(id) = self.scopes.get(current).cheap_local(&format!("@{name}")) {
                    return Ok(id);
                }
                let id = self.symbols.declare(format!("@{name}"), Mutability::Constant, true, pos);
                self.scopes.get_mut(current).bind_cheap_local(format!("@{name}"), id);
                return Ok(id);
            }
            if let Some(id) = self.scopes.resolve(current, name) {
                return Ok(id);
            }
            let id = self.symbols.declare(name.clone(), Mutability::Constant, false, pos);
            self.scopes.get_mut(current).bind(name.clone(), id);
            return Ok(id);
        }

        self.scopes
            .resolve_path(current, &refs)
            .ok_or_else(|| AssembleError::CouldNotResolveScope { name: segments.join("::"), loc: Loc(pos) })
    }

    // --- Directives -----------------------------------------------------------

    fn handle_directive(&mut self, dir: Directive, operand: &[Token], pos: Option<Pos>) -> Result<(), AssembleError> {
        match dir {
            Directive::Org => {
                let addr = self.eval_const(operand, pos)?;
                let seg = self.segments.current().to_string();
                self.current_chunk = self.chunks.create_with_overwrite_mode(seg, Some(addr), self.options.overwrite_mode);
                Ok(())
            }
            Directive::Reloc => {
                let seg = self.segments.current().to_string();
                self.current_chunk = self.chunks.create_with_overwrite_mode(seg, None, self.options.overwrite_mode);
                Ok(())
            }
            Directive::Segment => {
                let name = self.prefixed_segment_name(operand, pos)?;
                self.segments.switch_to(name.clone());
                self.current_chunk = self.chunks.create_with_overwrite_mode(name, None, self.options.overwrite_mode);
                Ok(())
            }
            Directive::PushSeg => {
                let name = self.prefixed_segment_name(operand, pos)?;
                self.segment_chunk_stack.push(self.current_chunk);
                self.segments.push(name.clone());
                self.current_chunk = self.chunks.create_with_overwrite_mode(name, None, self.options.overwrite_mode);
                Ok(())
            }
            Directive::PopSeg => {
                if !self.segments.pop() {
                    return Err(AssembleError::PopSegWithoutPushSeg { loc: Loc(pos) });
                }
                self.current_chunk = self
                    .segment_chunk_stack
                    .pop()
                    .expect("segments.pop() succeeded, so a matching .pushseg pushed a chunk to restore");
                Ok(())
            }
            Directive::Scope => {
                let name = self.expect_ident(operand, pos)?;
                self.enter_named_scope(name, OpenScope::Scope, pos)
            }
            Directive::Proc => {
                let name = self.expect_ident(operand, pos)?;
                self.enter_named_scope(name, OpenScope::Proc, pos)
            }
            Directive::EndScope => self.leave_named_scope(OpenScope::Scope, pos, AssembleError::EndScopeWithoutScope { loc: Loc(pos) }),
            Directive::EndProc => self.leave_named_scope(OpenScope::Proc, pos, AssembleError::EndProcWithoutProc { loc: Loc(pos) }),
            Directive::Equ => {
                let name = self.expect_leading_ident(operand, pos)?;
                self.assign_symbol(&name.0, name.1, Mutability::Constant, pos)
            }
            Directive::Set => {
                let name = self.expect_leading_ident(operand, pos)?;
                self.assign_symbol(&name.0, name.1, Mutability::Mutable, pos)
            }
            Directive::Export | Directive::Global => {
                let name = self.expect_ident(operand, pos)?;
                let current = self.scopes.current();
                let id = match self.scopes.get(current).local(&name) {
                    Some(id) => id,
                    None => {
                        let id = self.symbols.declare(name.clone(), Mutability::Constant, false, pos);
                        self.scopes.get_mut(current).bind(name.clone(), id);
                        id
                    }
                };
                self.symbols.mark_export(id);
                Ok(())
            }
            Directive::Import => {
                let name = self.expect_ident(operand, pos)?;
                let current = self.scopes.current();
                if self.scopes.get(current).local(&name).is_none() {
                    let id = self.symbols.declare(name.clone(), Mutability::Constant, false, pos);
                    self.scopes.get_mut(current).bind(name, id);
                    self.symbols.get_mut(id).binding = crate::symbol::Binding::Import;
                }
                Ok(())
            }
            Directive::Byte => self.emit_list(operand, Size::Byte, pos),
            Directive::Word => self.emit_list(operand, Size::Word, pos),
            Directive::Res => {
                let parts = split_commas(operand);
                if parts.is_empty() || parts.len() > 2 {
                    return Err(AssembleError::BadArgument { loc: Loc(pos) });
                }
                let count = self.eval_const(parts[0], pos)?;
                let fill = match parts.get(1) {
                    Some(expr_tokens) => self.eval_const(expr_tokens, pos)? as u8,
                    None => 0,
                };
                if count < 0 {
                    return Err(AssembleError::BadArgument { loc: Loc(pos) });
                }
                let chunk = self.chunks.get_mut(self.current_chunk);
                for _ in 0..count {
                    chunk.push_byte(fill);
                }
                Ok(())
            }
            Directive::Bytestr => {
                if operand.len() != 1 {
                    return Err(AssembleError::BadArgument { loc: Loc(pos) });
                }
                let text = operand[0].as_str_lit().ok_or(AssembleError::BadArgument { loc: Loc(pos) })?;
                let bytes = base64::decode(text).map_err(|_| AssembleError::BadArgument { loc: Loc(pos) })?;
                self.chunks.get_mut(self.current_chunk).push_bytes(&bytes);
                Ok(())
            }
            Directive::Free => {
                let chunk = self.chunks.get(self.current_chunk);
                let org = chunk.org.ok_or(AssembleError::FreeInRelocMode { loc: Loc(pos) })?;
                let here = org + chunk.offset() as i64;
                let seg = chunk.segment.clone();
                let n = self.eval_const(operand, pos)?;
                self.segments.mark_free(&seg, here, here + n);
                self.current_chunk = self.chunks.create_with_overwrite_mode(seg, Some(here + n), self.options.overwrite_mode);
                Ok(())
            }
            Directive::Move => {
                let parts = split_commas(operand);
                if parts.len() != 2 {
                    return Err(AssembleError::BadArgument { loc: Loc(pos) });
                }
                let len = self.eval_const(parts[0], pos)?;
                if len < 0 {
                    return Err(AssembleError::BadArgument { loc: Loc(pos) });
                }
                let expr = self.parse_expr(parts[1], pos)?;
                self.chunks.get_mut(self.current_chunk).push_move(len as usize, expr);
                Ok(())
            }
            Directive::SegmentPrefix => {
                self.segment_prefix = self.expect_name(operand, pos)?;
                Ok(())
            }
            Directive::Assert => {
                let parts = split_commas(operand);
                let value = self.eval_const(parts[0], pos)?;
                if value == 0 {
                    let message = parts.get(1).map(|toks| render_message(toks)).unwrap_or_else(|| "assertion failed".to_string());
                    return Err(AssembleError::AssertFailed { message, loc: Loc(pos) });
                }
                Ok(())
            }
            Directive::Out => {
                self.sink.emit(Severity::Info, &render_message(operand), pos);
                Ok(())
            }
            Directive::Warning => {
                self.sink.emit(Severity::Warning, &render_message(operand), pos);
                Ok(())
            }
            Directive::Error => Err(AssembleError::UserError { message: render_message(operand), loc: Loc(pos) }),
        }
    }

    fn enter_named_scope(&mut self, name: String, kind: OpenScope, pos: Option<Pos>) -> Result<(), AssembleError> {
        let current = self.scopes.current();
        if !self.options.reentrant_scopes && self.scopes.existing_child(current, &name).is_some() {
            return Err(AssembleError::ScopeReentryNotAllowed { name, loc: Loc(pos) });
        }
        // `.proc name` also binds `name` as an ordinary label at the current
        // PC, in the enclosing scope, so it is callable from outside the
        // procedure (§4.F) — bind before entering so the label lands in the
        // parent scope, not the one being opened.
        if kind == OpenScope::Proc {
            self.define_named_label(&name, pos)?;
        }
        self.scopes.enter(ScopeKind::Named, Some(name.clone()), self.options.reentrant_scopes);
        self.open_scopes.push((kind, name));
        Ok(())
    }

    fn leave_named_scope(&mut self, expected: OpenScope, pos: Option<Pos>, mismatch_err: AssembleError) -> Result<(), AssembleError> {
        match self.open_scopes.last() {
            Some((kind, _)) if *kind == expected => {
                self.open_scopes.pop();
                self.scopes.leave();
                Ok(())
            }
            _ => {
                let _ = pos;
                Err(mismatch_err)
            }
        }
    }

    /// Names of every `.scope`/`.proc` still open when assembly ended,
    /// innermost first — a structural error (§7 `ScopeNeverClosed`).
    pub fn unclosed_scope_names(&self) -> Vec<String> {
        self.open_scopes.iter().rev().map(|(_, name)| name.clone()).collect()
    }

    fn emit_list(&mut self, operand: &[Token], size: Size, pos: Option<Pos>) -> Result<(), AssembleError> {
        for part in split_commas(operand) {
            let e = self.parse_expr(part, pos)?;
            self.chunks.get_mut(self.current_chunk).push_pending(size, e);
        }
        Ok(())
    }

    fn eval_const(&mut self, tokens: &[Token], pos: Option<Pos>) -> Result<i64, AssembleError> {
        let e = self.parse_expr(tokens, pos)?;
        evaluate(&e, &self.symbols).as_const().ok_or(AssembleError::ExpressionNotConstant { loc: Loc(pos) })
    }

    fn expect_ident(&self, tokens: &[Token], pos: Option<Pos>) -> Result<String, AssembleError> {
        match tokens.first().and_then(Token::as_ident) {
            Some(name) if tokens.len() == 1 => Ok(name.to_string()),
            _ => Err(AssembleError::ExpectedIdentifier { loc: Loc(pos) }),
        }
    }

    /// Like [`Self::expect_ident`] but also accepts a quoted string, for
    /// directives whose name argument is conventionally spelled as a
    /// string literal in ca65 (`.segment "CODE"`, §4.F).
    fn expect_name(&self, tokens: &[Token], pos: Option<Pos>) -> Result<String, AssembleError> {
        if tokens.len() != 1 {
            return Err(AssembleError::ExpectedIdentifier { loc: Loc(pos) });
        }
        tokens[0]
            .as_ident()
            .or_else(|| tokens[0].as_str_lit())
            .map(str::to_string)
            .ok_or(AssembleError::ExpectedIdentifier { loc: Loc(pos) })
    }

    /// Like [`Self::expect_name`], but prepends the active `.segmentprefix`
    /// (if any) to the result (§4.F).
    fn prefixed_segment_name(&self, tokens: &[Token], pos: Option<Pos>) -> Result<String, AssembleError> {
        let name = self.expect_name(tokens, pos)?;
        Ok(format!("{}{}", self.segment_prefix, name))
    }

    fn expect_leading_ident<'a>(&self, tokens: &'a [Token], pos: Option<Pos>) -> Result<(String, &'a [Token]), AssembleError> {
        match tokens.first().and_then(Token::as_ident) {
            Some(name) if tokens.len() >= 2 && tokens[1].as_op() == Some(",") => Ok((name.to_string(), &tokens[2..])),
            Some(name) if tokens.len() >= 2 && tokens[1].as_op() == Some("=") => Ok((name.to_string(), &tokens[2..])),
            _ => Err(AssembleError::ExpectedIdentifier { loc: Loc(pos) }),
        }
    }

    pub fn current_chunk_id(&self) -> ChunkId {
        self.current_chunk
    }

    /// Forwards a diagnostic to the configured sink; used by `finalize` for
    /// warnings that only become detectable once every chunk's final length
    /// is known (e.g. `OverwriteMode::Warn` overlap checks, §4.E/§8).
    pub(crate) fn emit_diagnostic(&mut self, severity: Severity, message: &str, pos: Option<Pos>) {
        self.sink.emit(severity, message, pos);
    }
}

fn render_message(tokens: &[Token]) -> String {
    tokens.iter().filter_map(Token::as_str_lit).collect::<Vec<_>>().join(" ")
}

fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if t.as_op() == Some(",") {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    parts.push(&tokens[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn line(tokens: Vec<Token>) -> Line {
        tokens
    }

    #[test]
    fn zero_page_auto_sizing_scenario() {
        // lda $10  =>  A5 10
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("lda", None), Token::num(0x10, None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert_eq!(module.chunks[0].data, vec![0xA5, 0x10]);
    }

    #[test]
    fn absolute_auto_sizing_scenario() {
        // lda $1000  =>  AD 00 10
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("lda", None), Token::num(0x1000, None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert_eq!(module.chunks[0].data, vec![0xAD, 0x00, 0x10]);
    }

    #[test]
    fn forward_branch_scenario() {
        // beq foo / nop / foo: rts  =>  F0 01 EA 60
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("beq", None), Token::ident("foo", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("nop", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("foo", None), Token::op(":", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("rts", None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert_eq!(module.chunks[0].data, vec![0xF0, 0x01, 0xEA, 0x60]);
    }

    #[test]
    fn anonymous_label_scenario() {
        // bne :+ / nop / :  =>  D0 01 EA
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("bne", None), Token::op(":+", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("nop", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::op(":", None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert_eq!(module.chunks[0].data, vec![0xD0, 0x01, 0xEA]);
    }

    #[test]
    fn mutability_check_rejects_set_on_constant() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("foo", None), Token::op("=", None), Token::num(1, None)])).unwrap();
        let err = asm
            .assemble_line(&line(vec![Token::cs("set", None), Token::ident("foo", None), Token::op(",", None), Token::num(2, None)]))
            .unwrap_err();
        assert!(matches!(err, AssembleError::CannotChangeMutability { .. }));
    }

    #[test]
    fn free_in_reloc_mode_is_rejected() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::cs("reloc", None)])).unwrap();
        let err = asm.assemble_line(&line(vec![Token::cs("free", None), Token::num(0x100, None)])).unwrap_err();
        assert!(matches!(err, AssembleError::FreeInRelocMode { .. }));
    }

    #[test]
    fn pushseg_popseg_restores_the_active_chunk() {
        // lda $10 / pushseg DATA / lda $20 / popseg / nop — the trailing nop
        // must land in the CODE chunk right after the first lda, not a new
        // chunk, and CODE's bytes must stay contiguous.
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("lda", None), Token::num(0x10, None)])).unwrap();
        let code_chunk = asm.current_chunk_id();
        asm.assemble_line(&line(vec![Token::cs("pushseg", None), Token::ident("DATA", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("lda", None), Token::num(0x20, None)])).unwrap();
        asm.assemble_line(&line(vec![Token::cs("popseg", None)])).unwrap();
        assert_eq!(asm.current_chunk_id(), code_chunk);
        asm.assemble_line(&line(vec![Token::ident("nop", None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert_eq!(module.chunks[code_chunk.0 as usize].data, vec![0xA5, 0x10, 0xEA]);
    }

    #[test]
    fn proc_binds_its_name_to_the_entry_pc_in_the_enclosing_scope() {
        // `.proc foo` must bind `foo` as a callable label in the scope it
        // was opened from, so a `jsr foo` issued before `.proc foo` even
        // appears resolves against the real definition instead of becoming
        // an unresolved import.
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::ident("jsr", None), Token::ident("foo", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::cs("proc", None), Token::ident("foo", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::ident("rts", None)])).unwrap();
        asm.assemble_line(&line(vec![Token::cs("endproc", None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        assert!(module.imports.is_empty());
    }

    #[test]
    fn free_records_range_under_org_and_advances_org() {
        let mut asm = Assembler::new(AssemblerOptions::default());
        asm.assemble_line(&line(vec![Token::cs("org", None), Token::num(0x8000, None)])).unwrap();
        asm.assemble_line(&line(vec![Token::cs("res", None), Token::num(16, None)])).unwrap();
        asm.assemble_line(&line(vec![Token::cs("free", None), Token::num(0x100, None)])).unwrap();
        let new_chunk = asm.current_chunk_id();
        asm.assemble_line(&line(vec![Token::ident("nop", None)])).unwrap();
        let module = crate::finalize::finalize(asm).unwrap();
        let seg = module.segments.iter().find(|s| s.name == "CODE").unwrap();
        assert!(seg.free.has(0x8010));
        assert!(!seg.free.has(0x8110));
        assert_eq!(module.chunks[new_chunk.0 as usize].org, Some(0x8110));
        assert_eq!(module.chunks[new_chunk.0 as usize].data, vec![0xEA]);
    }
}
