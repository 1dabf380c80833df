//! Vela: a small class-based, dynamically-typed scripting language, compiled
//! to bytecode and run on a tree-less stack VM.
//!
//! Mirrors the teacher's crate root (`examples/jprochazk-hebi/src/lib.rs`):
//! an embeddable host struct (`Vela`, there `Hebi`) wrapping interior-mutable
//! interpreter state behind a small builder, plus module declarations for
//! every engineering component.

pub mod builtins;
pub mod chunk;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod gc;
pub mod object;
pub mod repl;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

use std::cell::RefCell;
use std::io::Write;

pub use error::{CompileError, Error, Result, RuntimeError};

use vm::Vm;

/// An embeddable interpreter instance. Mirrors the teacher's `Hebi`: a single
/// struct encapsulating all VM state behind a `RefCell`, so the host type
/// itself can be shared by `&self` while still allowing mutating calls --
/// there is no process-global interpreter.
pub struct Vela {
  vm: RefCell<Vm>,
}

impl Vela {
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn builder() -> VelaBuilder {
    VelaBuilder { stdout: None }
  }

  /// Compiles and runs `src` as a complete program/REPL line.
  ///
  /// A runtime error leaves the VM ready for the next call (§7: stack and
  /// call frames are reset), matching clox's `interpret` contract.
  pub fn eval(&self, src: &str) -> Result<()> {
    let mut vm = self.vm.borrow_mut();
    let function = compiler::compile(&mut vm.gc, src).map_err(Error::from)?;
    vm.interpret(function)
  }
}

impl Default for Vela {
  fn default() -> Self {
    Self::new()
  }
}

pub struct VelaBuilder {
  stdout: Option<Box<dyn Write>>,
}

impl VelaBuilder {
  pub fn with_io(mut self, stdout: impl Write + 'static) -> Self {
    self.stdout = Some(Box::new(stdout));
    self
  }

  pub fn build(mut self) -> Vela {
    let stdout = self
      .stdout
      .take()
      .unwrap_or_else(|| Box::new(std::io::stdout()));
    let mut vm = Vm::new(stdout);
    builtins::register(&mut vm);
    Vela {
      vm: RefCell::new(vm),
    }
  }
}
