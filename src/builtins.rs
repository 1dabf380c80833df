//! Native function registration.
//!
//! Grounded in the teacher's `src/builtins.rs` (`fn str`, `fn r#type`,
//! `pub fn register`), adapted from its arena-of-values host API to direct
//! `Vm`/`Value` access since this VM has no separate host-value layer.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

fn clock(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
  if !args.is_empty() {
    return Err(RuntimeError::new(format!(
      "expected 0 arguments, got {}",
      args.len()
    )));
  }
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default();
  Ok(Value::Number(now.as_secs_f64()))
}

fn str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
  if args.len() != 1 {
    return Err(RuntimeError::new(format!(
      "expected exactly 1 argument, got {}",
      args.len()
    )));
  }
  let text = vm.stringify(args[0]);
  Ok(Value::Object(vm.gc.intern(&text)))
}

fn type_of(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
  if args.len() != 1 {
    return Err(RuntimeError::new(format!(
      "expected exactly 1 argument, got {}",
      args.len()
    )));
  }
  let name = match args[0] {
    Value::Nil => "nil",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::Object(r) => vm.gc.get(r).type_name(),
  };
  Ok(Value::Object(vm.gc.intern(name)))
}

/// Registers every host-provided native into `vm`'s global table.
pub fn register(vm: &mut Vm) {
  vm.define_native("clock", Some(0), clock);
  vm.define_native("str", Some(1), str);
  vm.define_native("type", Some(1), type_of);
}
