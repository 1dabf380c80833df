//! Host-provided native functions.

use crate::error::RuntimeError;
use crate::object::ObjRef;
use crate::value::Value;
use crate::vm::Vm;

/// `(argCount, args) -> Value`, given direct VM access so natives can raise
/// runtime errors or allocate (e.g. interning a result string).
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

pub struct ObjNative {
  pub name: ObjRef,
  pub arity: Option<u8>,
  pub func: NativeFn,
}

impl ObjNative {
  pub fn new(name: ObjRef, arity: Option<u8>, func: NativeFn) -> Self {
    ObjNative { name, arity, func }
  }
}
