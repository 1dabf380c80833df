//! Compiled function bodies.

use crate::chunk::Chunk;
use crate::object::ObjRef;

/// A function template: shared, immutable, produced once by the compiler.
/// Closures wrap an `ObjRef` to one of these together with their captured
/// upvalues.
pub struct ObjFunction {
  pub arity: u8,
  pub upvalue_count: usize,
  pub chunk: Chunk,
  /// `None` for the implicit top-level script function.
  pub name: Option<ObjRef>,
}

impl ObjFunction {
  pub fn new(name: Option<ObjRef>) -> Self {
    ObjFunction {
      arity: 0,
      upvalue_count: 0,
      chunk: Chunk::new(),
      name,
    }
  }
}
