//! Compiler (component G): a single-pass, precedence-climbing parser that
//! emits bytecode directly into a [`Chunk`] as it goes -- there is no AST.
//!
//! Dispatch over prefix/infix parse rules is a plain `match` on
//! [`TokenKind`], not a function-pointer table: the token set is small and
//! fixed, so a match reads better in Rust than mimicking the source's
//! array-of-function-pointers trick (see DESIGN.md).

use crate::chunk::{Chunk, OpCode};
use crate::error::{At, CompileError};
use crate::gc::Gc;
use crate::object::{Obj, ObjFunction, ObjRef};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_PARAMS: usize = 255;

#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord)]
#[repr(u8)]
enum Precedence {
  None,
  Assignment,
  Or,
  And,
  Equality,
  Comparison,
  Term,
  Factor,
  Unary,
  Call,
  Primary,
}

impl Precedence {
  fn next(self) -> Precedence {
    use Precedence::*;
    match self {
      None => Assignment,
      Assignment => Or,
      Or => And,
      And => Equality,
      Equality => Comparison,
      Comparison => Term,
      Term => Factor,
      Factor => Unary,
      Unary => Call,
      Call | Primary => Primary,
    }
  }
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionKind {
  Script,
  Function,
  Method,
  Initializer,
}

struct Local {
  name: String,
  /// -1 while the initializer of its own declaration is still compiling,
  /// so `var a = a;` resolves `a` on the right as the enclosing scope's.
  depth: i32,
  is_captured: bool,
}

struct UpvalueDesc {
  index: u8,
  is_local: bool,
}

struct FunctionState {
  kind: FunctionKind,
  name: Option<ObjRef>,
  arity: u8,
  chunk: Chunk,
  locals: Vec<Local>,
  upvalues: Vec<UpvalueDesc>,
  scope_depth: i32,
}

impl FunctionState {
  fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
    // Slot 0 is reserved: `this` for methods/initializers, an unnameable
    // placeholder for plain functions and the top-level script.
    let slot0_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
      "this"
    } else {
      ""
    };
    FunctionState {
      kind,
      name,
      arity: 0,
      chunk: Chunk::new(),
      locals: vec![Local {
        name: slot0_name.to_string(),
        depth: 0,
        is_captured: false,
      }],
      upvalues: Vec::new(),
      scope_depth: 0,
    }
  }
}

struct ClassState {
  has_superclass: bool,
}

pub struct Compiler<'src, 'gc> {
  scanner: Scanner<'src>,
  gc: &'gc mut Gc,
  errors: Vec<CompileError>,
  panic_mode: bool,
  funcs: Vec<FunctionState>,
  classes: Vec<ClassState>,
}

pub fn compile(gc: &mut Gc, src: &str) -> Result<ObjRef, Vec<CompileError>> {
  let mut compiler = Compiler {
    scanner: Scanner::new(src),
    gc,
    errors: Vec::new(),
    panic_mode: false,
    funcs: vec![FunctionState::new(FunctionKind::Script, None)],
    classes: Vec::new(),
  };

  while !compiler.check(TokenKind::Eof) {
    compiler.declaration();
  }

  let (function, _upvalues) = compiler.end_function();
  if compiler.errors.is_empty() {
    Ok(function)
  } else {
    Err(compiler.errors)
  }
}

impl<'src, 'gc> Compiler<'src, 'gc> {
  fn func(&mut self) -> &mut FunctionState {
    self.funcs.last_mut().unwrap()
  }

  fn chunk(&mut self) -> &mut Chunk {
    &mut self.func().chunk
  }

  // -- token plumbing --------------------------------------------------

  fn advance(&mut self) -> Token<'src> {
    loop {
      let tok = self.scanner.advance();
      if tok.kind != TokenKind::Error {
        return tok;
      }
      let message = tok.error.unwrap_or("Unexpected character.");
      self.error_at(tok, message);
    }
  }

  fn check(&self, kind: TokenKind) -> bool {
    self.scanner.current().kind == kind
  }

  fn matches(&mut self, kind: TokenKind) -> bool {
    if !self.check(kind) {
      return false;
    }
    self.advance();
    true
  }

  fn consume(&mut self, kind: TokenKind, message: &'static str) {
    if self.check(kind) {
      self.advance();
      return;
    }
    let tok = self.scanner.current();
    self.error_at(tok, message);
  }

  fn error_at(&mut self, tok: Token<'src>, message: &str) {
    if self.panic_mode {
      return;
    }
    self.panic_mode = true;
    let at = match tok.kind {
      TokenKind::Eof => At::End,
      TokenKind::Error => At::Nothing,
      _ => At::Lexeme(tok.lexeme.to_string()),
    };
    self.errors.push(CompileError {
      line: tok.line,
      at,
      message: message.to_string(),
    });
  }

  fn error_at_previous(&mut self, message: &str) {
    let tok = self.scanner.previous();
    self.error_at(tok, message);
  }

  /// Panic-mode recovery: discard tokens until we're at a statement
  /// boundary, so one syntax error doesn't cascade into dozens.
  fn synchronize(&mut self) {
    self.panic_mode = false;
    while !self.check(TokenKind::Eof) {
      if self.scanner.previous().kind == TokenKind::Semicolon {
        return;
      }
      match self.scanner.current().kind {
        TokenKind::Class
        | TokenKind::Fun
        | TokenKind::Var
        | TokenKind::For
        | TokenKind::If
        | TokenKind::While
        | TokenKind::Print
        | TokenKind::Return => return,
        _ => {
          self.advance();
        }
      }
    }
  }

  // -- bytecode emission ------------------------------------------------

  fn line(&self) -> u32 {
    self.scanner.previous().line
  }

  fn emit(&mut self, byte: u8) {
    let line = self.line();
    self.chunk().write(byte, line);
  }

  fn emit_op(&mut self, op: OpCode) {
    self.emit(op as u8);
  }

  fn emit_ops(&mut self, a: OpCode, b: u8) {
    self.emit_op(a);
    self.emit(b);
  }

  fn emit_constant(&mut self, value: Value) {
    let index = self.chunk().add_constant(value);
    if index > u8::MAX as usize {
      self.error_at_previous("Too many constants in one chunk.");
      return;
    }
    self.emit_ops(OpCode::Constant, index as u8);
  }

  fn emit_jump(&mut self, op: OpCode) -> usize {
    self.emit_op(op);
    self.emit(0xff);
    self.emit(0xff);
    self.chunk().len() - 2
  }

  fn patch_jump(&mut self, offset: usize) {
    let jump = self.chunk().len() - offset - 2;
    if jump > u16::MAX as usize {
      self.error_at_previous("Too much code to jump over.");
      return;
    }
    let bytes = (jump as u16).to_le_bytes();
    self.chunk().code[offset] = bytes[0];
    self.chunk().code[offset + 1] = bytes[1];
  }

  fn emit_loop(&mut self, loop_start: usize) {
    self.emit_op(OpCode::Loop);
    let offset = self.chunk().len() - loop_start + 2;
    if offset > u16::MAX as usize {
      self.error_at_previous("Loop body too large.");
      return;
    }
    let bytes = (offset as u16).to_le_bytes();
    self.emit(bytes[0]);
    self.emit(bytes[1]);
  }

  fn emit_return(&mut self) {
    if self.func().kind == FunctionKind::Initializer {
      self.emit_ops(OpCode::GetLocal, 0);
    } else {
      self.emit_op(OpCode::Nil);
    }
    self.emit_op(OpCode::Return);
  }

  /// Pops the finished function off the compiler stack, wraps it as a heap
  /// object and returns its `ObjRef` together with the upvalue descriptors
  /// the enclosing function's `OP_CLOSURE` needs to emit. No GC root
  /// bookkeeping is required here: collection is only ever triggered from
  /// inside the VM's dispatch loop (see `vm.rs`), never implicitly from
  /// `Gc::alloc`/`Gc::intern`, so nothing can sweep a function out from
  /// under the compiler mid-build.
  fn end_function(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
    self.emit_return();
    let state = self.funcs.pop().unwrap();
    let mut function = ObjFunction::new(state.name);
    function.arity = state.arity;
    function.upvalue_count = state.upvalues.len();
    function.chunk = state.chunk;
    let r = self.gc.alloc(Obj::Function(function));
    (r, state.upvalues)
  }

  // -- scopes and locals --------------------------------------------------

  fn begin_scope(&mut self) {
    self.func().scope_depth += 1;
  }

  fn end_scope(&mut self) {
    self.func().scope_depth -= 1;
    let depth = self.func().scope_depth;
    while let Some(local) = self.func().locals.last() {
      if local.depth <= depth {
        break;
      }
      if self.func().locals.last().unwrap().is_captured {
        self.emit_op(OpCode::CloseUpvalue);
      } else {
        self.emit_op(OpCode::Pop);
      }
      self.func().locals.pop();
    }
  }

  fn identifier_constant(&mut self, name: &str) -> u8 {
    let r = self.gc.intern(name);
    let index = self.chunk().add_constant(Value::Object(r));
    if index > u8::MAX as usize {
      self.error_at_previous("Too many constants in one chunk.");
      return 0;
    }
    index as u8
  }

  fn add_local(&mut self, name: String) {
    if self.func().locals.len() >= MAX_LOCALS {
      self.error_at_previous("Too many local variables in function.");
      return;
    }
    self.func().locals.push(Local {
      name,
      depth: -1,
      is_captured: false,
    });
  }

  fn declare_variable(&mut self, name: &str) {
    if self.func().scope_depth == 0 {
      return;
    }
    let depth = self.func().scope_depth;
    let mut redeclared = false;
    for local in self.func().locals.iter().rev() {
      if local.depth != -1 && local.depth < depth {
        break;
      }
      if local.name == name {
        redeclared = true;
        break;
      }
    }
    if redeclared {
      self.error_at_previous("Already a variable with this name in this scope.");
      return;
    }
    self.add_local(name.to_string());
  }

  fn parse_variable(&mut self, message: &'static str) -> u8 {
    self.consume(TokenKind::Identifier, message);
    let name = self.scanner.previous().lexeme.to_string();
    self.declare_variable(&name);
    if self.func().scope_depth > 0 {
      return 0;
    }
    self.identifier_constant(&name)
  }

  fn mark_initialized(&mut self) {
    if self.func().scope_depth == 0 {
      return;
    }
    let depth = self.func().scope_depth;
    self.func().locals.last_mut().unwrap().depth = depth;
  }

  fn define_variable(&mut self, global: u8) {
    if self.func().scope_depth > 0 {
      self.mark_initialized();
      return;
    }
    self.emit_ops(OpCode::DefineGlobal, global);
  }

  fn resolve_local(&mut self, func_index: usize, name: &str) -> Option<u8> {
    let found = self.funcs[func_index]
      .locals
      .iter()
      .enumerate()
      .rev()
      .find(|(_, l)| l.name == name)
      .map(|(i, l)| (i, l.depth));
    let (i, depth) = found?;
    if depth == -1 {
      self.error_at_previous("Can't read local variable in its own initializer.");
    }
    Some(i as u8)
  }

  fn add_upvalue(&mut self, func_index: usize, index: u8, is_local: bool) -> u8 {
    for (i, uv) in self.funcs[func_index].upvalues.iter().enumerate() {
      if uv.index == index && uv.is_local == is_local {
        return i as u8;
      }
    }
    if self.funcs[func_index].upvalues.len() >= MAX_UPVALUES {
      self.error_at_previous("Too many closure variables in function.");
      return 0;
    }
    self.funcs[func_index]
      .upvalues
      .push(UpvalueDesc { index, is_local });
    let len = self.funcs[func_index].upvalues.len();
    self.funcs[func_index].upvalue_count = len;
    (len - 1) as u8
  }

  /// Walks the enclosing-function chain looking for `name`, threading an
  /// upvalue through every intermediate function so a deeply nested closure
  /// can still reach an outer local.
  fn resolve_upvalue(&mut self, func_index: usize, name: &str) -> Option<u8> {
    if func_index == 0 {
      return None;
    }
    let enclosing = func_index - 1;
    if let Some(local) = self.resolve_local(enclosing, name) {
      self.funcs[enclosing].locals[local as usize].is_captured = true;
      return Some(self.add_upvalue(func_index, local, true));
    }
    if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
      return Some(self.add_upvalue(func_index, upvalue, false));
    }
    None
  }

  // -- statements --------------------------------------------------------

  fn declaration(&mut self) {
    if self.matches(TokenKind::Class) {
      self.class_declaration();
    } else if self.matches(TokenKind::Fun) {
      self.fun_declaration();
    } else if self.matches(TokenKind::Var) {
      self.var_declaration();
    } else {
      self.statement();
    }
    if self.panic_mode {
      self.synchronize();
    }
  }

  fn statement(&mut self) {
    if self.matches(TokenKind::Print) {
      self.print_statement();
    } else if self.matches(TokenKind::If) {
      self.if_statement();
    } else if self.matches(TokenKind::While) {
      self.while_statement();
    } else if self.matches(TokenKind::For) {
      self.for_statement();
    } else if self.matches(TokenKind::Return) {
      self.return_statement();
    } else if self.matches(TokenKind::LeftBrace) {
      self.begin_scope();
      self.block();
      self.end_scope();
    } else {
      self.expression_statement();
    }
  }

  fn block(&mut self) {
    while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
      self.declaration();
    }
    self.consume(TokenKind::RightBrace, "Expect '}' after block.");
  }

  fn print_statement(&mut self) {
    self.expression();
    self.consume(TokenKind::Semicolon, "Expect ';' after value.");
    self.emit_op(OpCode::Print);
  }

  fn expression_statement(&mut self) {
    self.expression();
    self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
    self.emit_op(OpCode::Pop);
  }

  fn if_statement(&mut self) {
    self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after condition.");

    let then_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.statement();
    let else_jump = self.emit_jump(OpCode::Jump);

    self.patch_jump(then_jump);
    self.emit_op(OpCode::Pop);
    if self.matches(TokenKind::Else) {
      self.statement();
    }
    self.patch_jump(else_jump);
  }

  fn while_statement(&mut self) {
    let loop_start = self.chunk().len();
    self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after condition.");

    let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.statement();
    self.emit_loop(loop_start);

    self.patch_jump(exit_jump);
    self.emit_op(OpCode::Pop);
  }

  fn for_statement(&mut self) {
    self.begin_scope();
    self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

    if self.matches(TokenKind::Semicolon) {
      // no initializer
    } else if self.matches(TokenKind::Var) {
      self.var_declaration();
    } else {
      self.expression_statement();
    }

    let mut loop_start = self.chunk().len();
    let mut exit_jump: Option<usize> = None;
    if !self.matches(TokenKind::Semicolon) {
      self.expression();
      self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
      exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
      self.emit_op(OpCode::Pop);
    }

    if !self.matches(TokenKind::RightParen) {
      let body_jump = self.emit_jump(OpCode::Jump);
      let increment_start = self.chunk().len();
      self.expression();
      self.emit_op(OpCode::Pop);
      self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

      self.emit_loop(loop_start);
      loop_start = increment_start;
      self.patch_jump(body_jump);
    }

    self.statement();
    self.emit_loop(loop_start);

    if let Some(exit_jump) = exit_jump {
      self.patch_jump(exit_jump);
      self.emit_op(OpCode::Pop);
    }

    self.end_scope();
  }

  fn return_statement(&mut self) {
    if self.func().kind == FunctionKind::Script {
      self.error_at_previous("Can't return from top-level code.");
    }
    if self.matches(TokenKind::Semicolon) {
      self.emit_return();
    } else {
      if self.func().kind == FunctionKind::Initializer {
        self.error_at_previous("Can't return a value from an initializer.");
      }
      self.expression();
      self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
      self.emit_op(OpCode::Return);
    }
  }

  fn var_declaration(&mut self) {
    let global = self.parse_variable("Expect variable name.");
    if self.matches(TokenKind::Equal) {
      self.expression();
    } else {
      self.emit_op(OpCode::Nil);
    }
    self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
    self.define_variable(global);
  }

  fn fun_declaration(&mut self) {
    self.consume(TokenKind::Identifier, "Expect function name.");
    let name = self.scanner.previous().lexeme.to_string();
    self.declare_variable(&name);
    if self.func().scope_depth > 0 {
      self.mark_initialized();
    }
    let global = if self.func().scope_depth == 0 {
      self.identifier_constant(&name)
    } else {
      0
    };
    self.function(FunctionKind::Function, &name);
    self.define_variable(global);
  }

  fn function(&mut self, kind: FunctionKind, name: &str) {
    let name_ref = self.gc.intern(name);
    self.funcs.push(FunctionState::new(kind, Some(name_ref)));
    self.begin_scope();

    self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
    if !self.check(TokenKind::RightParen) {
      loop {
        if self.func().arity as usize >= MAX_PARAMS {
          self.error_at_previous("Can't have more than 255 parameters.");
        }
        self.func().arity += 1;
        let constant = self.parse_variable("Expect parameter name.");
        self.define_variable(constant);
        if !self.matches(TokenKind::Comma) {
          break;
        }
      }
    }
    self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
    self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
    self.block();

    let (function, upvalues) = self.end_function();

    let constant = self.chunk().add_constant(Value::Object(function));
    self.emit_ops(OpCode::Closure, constant as u8);
    for uv in &upvalues {
      self.emit(if uv.is_local { 1 } else { 0 });
      self.emit(uv.index);
    }
  }

  fn method(&mut self) {
    self.consume(TokenKind::Identifier, "Expect method name.");
    let name = self.scanner.previous().lexeme.to_string();
    let constant = self.identifier_constant(&name);
    let kind = if name == "init" {
      FunctionKind::Initializer
    } else {
      FunctionKind::Method
    };
    self.function(kind, &name);
    self.emit_ops(OpCode::Method, constant);
  }

  fn class_declaration(&mut self) {
    self.consume(TokenKind::Identifier, "Expect class name.");
    let class_name = self.scanner.previous().lexeme.to_string();
    let name_constant = self.identifier_constant(&class_name);
    self.declare_variable(&class_name);

    self.emit_ops(OpCode::Class, name_constant);
    self.define_variable(name_constant);

    self.classes.push(ClassState {
      has_superclass: false,
    });

    if self.matches(TokenKind::Less) {
      self.consume(TokenKind::Identifier, "Expect superclass name.");
      let super_name = self.scanner.previous().lexeme.to_string();
      if super_name == class_name {
        self.error_at_previous("A class can't inherit from itself.");
      }
      self.named_variable(&super_name, false);

      self.begin_scope();
      self.add_local("super".to_string());
      self.define_variable(0);

      self.named_variable(&class_name, false);
      self.emit_op(OpCode::Inherit);
      self.classes.last_mut().unwrap().has_superclass = true;
    }

    self.named_variable(&class_name, false);
    self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
    while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
      self.method();
    }
    self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
    self.emit_op(OpCode::Pop);

    let class = self.classes.pop().unwrap();
    if class.has_superclass {
      self.end_scope();
    }
  }

  // -- expressions ---------------------------------------------------------

  fn expression(&mut self) {
    self.parse_precedence(Precedence::Assignment);
  }

  fn parse_precedence(&mut self, precedence: Precedence) {
    self.advance();
    let can_assign = precedence <= Precedence::Assignment;
    if !self.prefix(self.scanner.previous().kind, can_assign) {
      self.error_at_previous("Expect expression.");
      return;
    }

    while precedence <= Self::infix_precedence(self.scanner.current().kind) {
      self.advance();
      self.infix(self.scanner.previous().kind, can_assign);
    }

    if can_assign && self.matches(TokenKind::Equal) {
      self.error_at_previous("Invalid assignment target.");
    }
  }

  fn infix_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
      Or => Precedence::Or,
      And => Precedence::And,
      EqualEqual | BangEqual => Precedence::Equality,
      Less | LessEqual | Greater | GreaterEqual => Precedence::Comparison,
      Plus | Minus => Precedence::Term,
      Star | Slash => Precedence::Factor,
      LeftParen | Dot => Precedence::Call,
      _ => Precedence::None,
    }
  }

  fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
    use TokenKind::*;
    match kind {
      LeftParen => self.grouping(),
      Minus | Bang => self.unary(),
      Number => self.number(),
      String => self.string(),
      True | False | Nil => self.literal(kind),
      Identifier => self.variable(can_assign),
      This => self.this(),
      Super => self.super_(),
      _ => return false,
    }
    true
  }

  fn infix(&mut self, kind: TokenKind, can_assign: bool) {
    use TokenKind::*;
    match kind {
      Plus | Minus | Star | Slash | EqualEqual | BangEqual | Less | LessEqual | Greater
      | GreaterEqual => self.binary(kind),
      And => self.and(),
      Or => self.or(),
      LeftParen => self.call(),
      Dot => self.dot(can_assign),
      _ => unreachable!("not an infix operator: {kind:?}"),
    }
  }

  fn grouping(&mut self) {
    self.expression();
    self.consume(TokenKind::RightParen, "Expect ')' after expression.");
  }

  fn number(&mut self) {
    let lexeme = self.scanner.previous().lexeme;
    let value: f64 = lexeme.parse().unwrap_or(f64::NAN);
    self.emit_constant(Value::Number(value));
  }

  fn string(&mut self) {
    let lexeme = self.scanner.previous().lexeme;
    let contents = &lexeme[1..lexeme.len() - 1];
    let r = self.gc.intern(contents);
    self.emit_constant(Value::Object(r));
  }

  fn literal(&mut self, kind: TokenKind) {
    match kind {
      TokenKind::True => self.emit_op(OpCode::True),
      TokenKind::False => self.emit_op(OpCode::False),
      TokenKind::Nil => self.emit_op(OpCode::Nil),
      _ => unreachable!(),
    }
  }

  fn unary(&mut self) {
    let op = self.scanner.previous().kind;
    self.parse_precedence(Precedence::Unary);
    match op {
      TokenKind::Minus => self.emit_op(OpCode::Negate),
      TokenKind::Bang => self.emit_op(OpCode::Not),
      _ => unreachable!(),
    }
  }

  fn binary(&mut self, op: TokenKind) {
    let precedence = Self::infix_precedence(op);
    self.parse_precedence(precedence.next());
    match op {
      TokenKind::Plus => self.emit_op(OpCode::Add),
      TokenKind::Minus => self.emit_op(OpCode::Subtract),
      TokenKind::Star => self.emit_op(OpCode::Multiply),
      TokenKind::Slash => self.emit_op(OpCode::Divide),
      TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
      TokenKind::BangEqual => {
        self.emit_op(OpCode::Equal);
        self.emit_op(OpCode::Not);
      }
      TokenKind::Greater => self.emit_op(OpCode::Greater),
      TokenKind::GreaterEqual => {
        self.emit_op(OpCode::Less);
        self.emit_op(OpCode::Not);
      }
      TokenKind::Less => self.emit_op(OpCode::Less),
      TokenKind::LessEqual => {
        self.emit_op(OpCode::Greater);
        self.emit_op(OpCode::Not);
      }
      _ => unreachable!(),
    }
  }

  fn and(&mut self) {
    let end_jump = self.emit_jump(OpCode::JumpIfFalse);
    self.emit_op(OpCode::Pop);
    self.parse_precedence(Precedence::And);
    self.patch_jump(end_jump);
  }

  fn or(&mut self) {
    let else_jump = self.emit_jump(OpCode::JumpIfFalse);
    let end_jump = self.emit_jump(OpCode::Jump);
    self.patch_jump(else_jump);
    self.emit_op(OpCode::Pop);
    self.parse_precedence(Precedence::Or);
    self.patch_jump(end_jump);
  }

  fn argument_list(&mut self) -> u8 {
    let mut count = 0u8;
    if !self.check(TokenKind::RightParen) {
      loop {
        self.expression();
        if count as usize == MAX_PARAMS {
          self.error_at_previous("Can't have more than 255 arguments.");
        }
        count += 1;
        if !self.matches(TokenKind::Comma) {
          break;
        }
      }
    }
    self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
    count
  }

  fn call(&mut self) {
    let count = self.argument_list();
    self.emit_ops(OpCode::Call, count);
  }

  fn dot(&mut self, can_assign: bool) {
    self.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let name = self.scanner.previous().lexeme.to_string();
    let name_constant = self.identifier_constant(&name);

    if can_assign && self.matches(TokenKind::Equal) {
      self.expression();
      self.emit_ops(OpCode::SetProperty, name_constant);
    } else if self.matches(TokenKind::LeftParen) {
      let count = self.argument_list();
      self.emit_ops(OpCode::Invoke, name_constant);
      self.emit(count);
    } else {
      self.emit_ops(OpCode::GetProperty, name_constant);
    }
  }

  fn this(&mut self) {
    if self.classes.is_empty() {
      self.error_at_previous("Can't use 'this' outside of a class.");
      return;
    }
    self.variable(false);
  }

  fn super_(&mut self) {
    if self.classes.is_empty() {
      self.error_at_previous("Can't use 'super' outside of a class.");
    } else if !self.classes.last().unwrap().has_superclass {
      self.error_at_previous("Can't use 'super' in a class with no superclass.");
    }
    self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    self.consume(TokenKind::Identifier, "Expect superclass method name.");
    let name = self.scanner.previous().lexeme.to_string();
    let name_constant = self.identifier_constant(&name);

    self.named_variable("this", false);
    if self.matches(TokenKind::LeftParen) {
      let count = self.argument_list();
      self.named_variable("super", false);
      self.emit_ops(OpCode::SuperInvoke, name_constant);
      self.emit(count);
    } else {
      self.named_variable("super", false);
      self.emit_ops(OpCode::GetSuper, name_constant);
    }
  }

  fn variable(&mut self, can_assign: bool) {
    let name = self.scanner.previous().lexeme.to_string();
    self.named_variable(&name, can_assign);
  }

  fn named_variable(&mut self, name: &str, can_assign: bool) {
    let func_index = self.funcs.len() - 1;
    let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(func_index, name) {
      (OpCode::GetLocal, OpCode::SetLocal, slot)
    } else if let Some(slot) = self.resolve_upvalue(func_index, name) {
      (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
    } else {
      let constant = self.identifier_constant(name);
      (OpCode::GetGlobal, OpCode::SetGlobal, constant)
    };

    if can_assign && self.matches(TokenKind::Equal) {
      self.expression();
      self.emit_ops(set_op, arg);
    } else {
      self.emit_ops(get_op, arg);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn compiles(src: &str) -> bool {
    let mut gc = Gc::new();
    compile(&mut gc, src).is_ok()
  }

  #[test]
  fn compiles_arithmetic() {
    assert!(compiles("print 1 + 2 * 3;"));
  }

  #[test]
  fn compiles_class_with_inheritance() {
    assert!(compiles(
      "class A { greet() { print \"hi\"; } } class B < A {} var b = B(); b.greet();"
    ));
  }

  #[test]
  fn reports_error_at_end() {
    let mut gc = Gc::new();
    let errors = compile(&mut gc, "var a = 1").unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].at, At::End));
  }

  #[test]
  fn reports_error_at_lexeme() {
    let mut gc = Gc::new();
    let errors = compile(&mut gc, "var 1 = 2;").unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].at, At::Lexeme(ref s) if s == "1"));
  }

  #[test]
  fn redeclaring_a_local_is_an_error() {
    let mut gc = Gc::new();
    let result = compile(&mut gc, "{ var a = 1; var a = 2; }");
    assert!(result.is_err());
  }

  #[test]
  fn return_outside_function_is_an_error() {
    let mut gc = Gc::new();
    assert!(compile(&mut gc, "return 1;").is_err());
  }
}
