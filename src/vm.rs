//! Virtual machine (component H): a stack-based bytecode interpreter.
//!
//! Struct shape and the "one encapsulated value instead of a process-global"
//! approach are grounded on the teacher's `Isolate` (`src/isolate.rs`): a
//! single struct owns the operand stack, call frames and globals, and
//! dispatch is a loop of small `op_*` handler methods rather than one giant
//! match arm body. Opcode *semantics* are this language's own stack-based
//! ISA, not the teacher's register machine.

use std::io::Write;

use crate::chunk::OpCode;
use crate::error::{Result, RuntimeError, TraceFrame};
use crate::gc::Gc;
use crate::object::{
  Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjRef, ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

struct CallFrame {
  closure: ObjRef,
  ip: usize,
  /// Index into `Vm::stack` where this frame's slot 0 lives.
  base: usize,
}

pub struct Vm {
  pub gc: Gc,
  stack: Vec<Value>,
  frames: Vec<CallFrame>,
  globals: Table,
  /// Upvalues still pointing at a live stack slot, sorted by descending
  /// slot index so closing a range is a simple prefix scan.
  open_upvalues: Vec<ObjRef>,
  init_string: ObjRef,
  stdout: Box<dyn Write>,
}

enum Control {
  Ok,
  Return,
}

impl Vm {
  pub fn new(stdout: Box<dyn Write>) -> Self {
    let mut gc = Gc::new();
    let init_string = gc.intern("init");
    Vm {
      gc,
      stack: Vec::with_capacity(256),
      frames: Vec::with_capacity(16),
      globals: Table::new(),
      open_upvalues: Vec::new(),
      init_string,
      stdout,
    }
  }

  pub fn define_native(
    &mut self,
    name: &str,
    arity: Option<u8>,
    func: crate::object::NativeFn,
  ) {
    let name_ref = self.gc.intern(name);
    let native = self.gc.alloc(Obj::Native(crate::object::ObjNative::new(
      name_ref, arity, func,
    )));
    let hash = self.gc.get(name_ref).as_string().unwrap().hash();
    self.globals.set(name_ref, hash, Value::Object(native));
  }

  /// Runs a freshly compiled script function to completion.
  pub fn interpret(&mut self, function: ObjRef) -> Result<()> {
    let closure = self
      .gc
      .alloc(Obj::Closure(ObjClosure::new(function, Vec::new())));
    self.stack.push(Value::Object(closure));
    self.call_closure(closure, 0)?;
    self.run()
  }

  fn run(&mut self) -> Result<()> {
    loop {
      if self.gc.should_collect() {
        self.mark_roots();
        self.gc.collect();
      }
      match self.step() {
        Ok(Control::Ok) => {}
        Ok(Control::Return) => return Ok(()),
        Err(e) => {
          self.reset();
          return Err(e.into());
        }
      }
    }
  }

  /// Empties the stack and call frames after a runtime error, per §7: the VM
  /// stays usable for the next prompt line rather than being left mid-call.
  fn reset(&mut self) {
    self.stack.clear();
    self.frames.clear();
    self.open_upvalues.clear();
  }

  fn mark_roots(&mut self) {
    for value in &self.stack {
      self.gc.mark_value(*value);
    }
    for frame in &self.frames {
      self.gc.mark_object(frame.closure);
    }
    for upvalue in &self.open_upvalues {
      self.gc.mark_object(*upvalue);
    }
    self.gc.mark_table(&self.globals);
    self.gc.mark_object(self.init_string);
  }

  // -- stack helpers -------------------------------------------------------

  fn push(&mut self, value: Value) {
    self.stack.push(value);
  }

  fn pop(&mut self) -> Value {
    self.stack.pop().expect("stack underflow")
  }

  fn peek(&self, distance: usize) -> Value {
    self.stack[self.stack.len() - 1 - distance]
  }

  fn frame(&self) -> &CallFrame {
    self.frames.last().unwrap()
  }

  fn closure(&self) -> &ObjClosure {
    self.gc.get(self.frame().closure).as_closure().unwrap()
  }

  fn read_byte(&mut self) -> u8 {
    let frame_index = self.frames.len() - 1;
    let closure = self.frames[frame_index].closure;
    let function = self.gc.get(closure).as_closure().unwrap().function;
    let ip = self.frames[frame_index].ip;
    let byte = self.gc.get(function).as_function().unwrap().chunk.code[ip];
    self.frames[frame_index].ip += 1;
    byte
  }

  fn read_u16(&mut self) -> u16 {
    let hi = self.read_byte();
    let lo = self.read_byte();
    u16::from_le_bytes([hi, lo])
  }

  fn read_constant(&mut self) -> Value {
    let index = self.read_byte();
    let function = self.closure().function;
    self.gc.get(function).as_function().unwrap().chunk.constants[index as usize]
  }

  fn read_string(&mut self) -> ObjRef {
    self.read_constant().as_object().expect("constant is a string")
  }

  fn current_line(&self) -> u32 {
    let function = self.closure().function;
    let ip = self.frame().ip.saturating_sub(1);
    self.gc.get(function).as_function().unwrap().chunk.line_at(ip)
  }

  fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
    let mut trace = Vec::new();
    for frame in self.frames.iter().rev() {
      let function_ref = self.gc.get(frame.closure).as_closure().unwrap().function;
      let function = self.gc.get(function_ref).as_function().unwrap();
      let name = function.name.map(|r| self.gc.get(r).as_string().unwrap().as_str().to_string());
      let line = function.chunk.line_at(frame.ip.saturating_sub(1));
      trace.push(TraceFrame { line, name });
    }
    RuntimeError {
      message: message.into(),
      trace,
    }
  }

  pub(crate) fn stringify(&mut self, value: Value) -> String {
    match value {
      Value::Object(r) => match self.gc.get(r) {
        Obj::String(s) => s.as_str().to_string(),
        Obj::Function(f) => match f.name {
          Some(n) => format!("<fn {}>", self.gc.get(n).as_string().unwrap().as_str()),
          None => "<script>".to_string(),
        },
        Obj::Native(n) => format!("<native fn {}>", self.gc.get(n.name).as_string().unwrap().as_str()),
        Obj::Closure(c) => {
          let f = self.gc.get(c.function).as_function().unwrap();
          match f.name {
            Some(n) => format!("<fn {}>", self.gc.get(n).as_string().unwrap().as_str()),
            None => "<script>".to_string(),
          }
        }
        Obj::Class(c) => self.gc.get(c.name).as_string().unwrap().as_str().to_string(),
        Obj::Instance(i) => {
          let class = self.gc.get(i.class).as_class().unwrap();
          format!("{} instance", self.gc.get(class.name).as_string().unwrap().as_str())
        }
        Obj::BoundMethod(b) => {
          let closure = self.gc.get(b.method).as_closure().unwrap();
          let f = self.gc.get(closure.function).as_function().unwrap();
          match f.name {
            Some(n) => format!("<fn {}>", self.gc.get(n).as_string().unwrap().as_str()),
            None => "<script>".to_string(),
          }
        }
        Obj::Upvalue(_) => "<upvalue>".to_string(),
      },
      other => other.to_string(),
    }
  }

  // -- call protocol ---------------------------------------------------

  fn call_value(&mut self, callee: Value, arg_count: u8) -> std::result::Result<(), RuntimeError> {
    let Value::Object(r) = callee else {
      return Err(self.runtime_error("Can only call functions and classes."));
    };

    enum Kind {
      Closure,
      Native {
        func: crate::object::NativeFn,
        arity: Option<u8>,
      },
      Class,
      BoundMethod {
        method: ObjRef,
        receiver: Value,
      },
      Other,
    }

    let kind = match self.gc.get(r) {
      Obj::Closure(_) => Kind::Closure,
      Obj::Native(n) => Kind::Native {
        func: n.func,
        arity: n.arity,
      },
      Obj::Class(_) => Kind::Class,
      Obj::BoundMethod(b) => Kind::BoundMethod {
        method: b.method,
        receiver: b.receiver,
      },
      _ => Kind::Other,
    };

    match kind {
      Kind::Closure => self.call_closure(r, arg_count),
      Kind::Native { func, arity } => {
        let start = self.stack.len() - arg_count as usize;
        let args: Vec<Value> = self.stack[start..].to_vec();
        let arity_ok = arity.map(|a| a == arg_count).unwrap_or(true);
        if !arity_ok {
          return Err(self.runtime_error("Wrong number of arguments to native function."));
        }
        let result = func(self, &args)?;
        self.stack.truncate(start - 1);
        self.push(result);
        Ok(())
      }
      Kind::Class => {
        let instance = self.gc.alloc(Obj::Instance(ObjInstance::new(r)));
        let start = self.stack.len() - arg_count as usize - 1;
        self.stack[start] = Value::Object(instance);
        let init_hash = self.gc.get(self.init_string).as_string().unwrap().hash();
        let initializer = self
          .gc
          .get(r)
          .as_class()
          .unwrap()
          .methods
          .get(self.init_string, init_hash);
        if let Some(Value::Object(method_ref)) = initializer {
          return self.call_closure(method_ref, arg_count);
        }
        if arg_count != 0 {
          return Err(self.runtime_error(format!("Expected 0 arguments but got {arg_count}.")));
        }
        Ok(())
      }
      Kind::BoundMethod { method, receiver } => {
        let start = self.stack.len() - arg_count as usize - 1;
        self.stack[start] = receiver;
        self.call_closure(method, arg_count)
      }
      Kind::Other => Err(self.runtime_error("Can only call functions and classes.")),
    }
  }

  fn call_closure(&mut self, closure_ref: ObjRef, arg_count: u8) -> std::result::Result<(), RuntimeError> {
    if self.frames.len() >= FRAMES_MAX {
      return Err(self.runtime_error("Stack overflow."));
    }
    let closure = self.gc.get(closure_ref).as_closure().unwrap();
    let function = self.gc.get(closure.function).as_function().unwrap();
    if arg_count != function.arity {
      return Err(self.runtime_error(format!(
        "Expected {} arguments but got {arg_count}.",
        function.arity
      )));
    }
    let base = self.stack.len() - arg_count as usize - 1;
    self.frames.push(CallFrame {
      closure: closure_ref,
      ip: 0,
      base,
    });
    Ok(())
  }

  fn invoke(&mut self, name: ObjRef, arg_count: u8) -> std::result::Result<(), RuntimeError> {
    let receiver = self.peek(arg_count as usize);
    let Value::Object(r) = receiver else {
      return Err(self.runtime_error("Only instances have methods."));
    };
    let instance = match self.gc.get(r) {
      Obj::Instance(i) => i,
      _ => return Err(self.runtime_error("Only instances have methods.")),
    };
    let hash = self.gc.get(name).as_string().unwrap().hash();
    if let Some(field) = instance.fields.get(name, hash) {
      let start = self.stack.len() - arg_count as usize - 1;
      self.stack[start] = field;
      return self.call_value(field, arg_count);
    }
    let class = instance.class;
    self.invoke_from_class(class, name, arg_count)
  }

  fn invoke_from_class(
    &mut self,
    class: ObjRef,
    name: ObjRef,
    arg_count: u8,
  ) -> std::result::Result<(), RuntimeError> {
    let hash = self.gc.get(name).as_string().unwrap().hash();
    let method = self.gc.get(class).as_class().unwrap().methods.get(name, hash);
    match method {
      Some(Value::Object(method_ref)) => self.call_closure(method_ref, arg_count),
      _ => {
        let name_str = self.gc.get(name).as_string().unwrap().as_str().to_string();
        Err(self.runtime_error(format!("Undefined property '{name_str}'.")))
      }
    }
  }

  fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> std::result::Result<(), RuntimeError> {
    let hash = self.gc.get(name).as_string().unwrap().hash();
    let method = self.gc.get(class).as_class().unwrap().methods.get(name, hash);
    let Some(Value::Object(method_ref)) = method else {
      let name_str = self.gc.get(name).as_string().unwrap().as_str().to_string();
      return Err(self.runtime_error(format!("Undefined property '{name_str}'.")));
    };
    let receiver = self.pop();
    let bound = self
      .gc
      .alloc(Obj::BoundMethod(ObjBoundMethod::new(receiver, method_ref)));
    self.push(Value::Object(bound));
    Ok(())
  }

  // -- upvalues --------------------------------------------------------

  fn capture_upvalue(&mut self, stack_index: usize) -> ObjRef {
    for &existing in &self.open_upvalues {
      if self
        .gc
        .get(existing)
        .as_upvalue()
        .and_then(|u| u.stack_index())
        == Some(stack_index)
      {
        return existing;
      }
    }
    let upvalue = self.gc.alloc(Obj::Upvalue(ObjUpvalue::open(stack_index)));
    self.open_upvalues.push(upvalue);
    upvalue
  }

  fn close_upvalues(&mut self, from: usize) {
    let mut i = 0;
    while i < self.open_upvalues.len() {
      let r = self.open_upvalues[i];
      let stack_index = self.gc.get(r).as_upvalue().unwrap().stack_index();
      match stack_index {
        Some(index) if index >= from => {
          let value = self.stack[index];
          self.gc.get_mut(r).as_upvalue_mut().unwrap().close(value);
          self.open_upvalues.remove(i);
        }
        _ => i += 1,
      }
    }
  }

  // -- dispatch ----------------------------------------------------------

  fn step(&mut self) -> std::result::Result<Control, RuntimeError> {
    let byte = self.read_byte();
    let op = crate::chunk::OpCode::from_u8(byte)
      .unwrap_or_else(|| panic!("invalid opcode byte {byte}"));

    match op {
      OpCode::Constant => {
        let value = self.read_constant();
        self.push(value);
      }
      OpCode::Nil => self.push(Value::Nil),
      OpCode::True => self.push(Value::Bool(true)),
      OpCode::False => self.push(Value::Bool(false)),
      OpCode::Pop => {
        self.pop();
      }
      OpCode::GetLocal => {
        let slot = self.read_byte() as usize;
        let base = self.frame().base;
        self.push(self.stack[base + slot]);
      }
      OpCode::SetLocal => {
        let slot = self.read_byte() as usize;
        let base = self.frame().base;
        self.stack[base + slot] = self.peek(0);
      }
      OpCode::GetGlobal => {
        let name = self.read_string();
        let hash = self.gc.get(name).as_string().unwrap().hash();
        match self.globals.get(name, hash) {
          Some(v) => self.push(v),
          None => {
            let n = self.gc.get(name).as_string().unwrap().as_str().to_string();
            return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
          }
        }
      }
      OpCode::DefineGlobal => {
        let name = self.read_string();
        let hash = self.gc.get(name).as_string().unwrap().hash();
        let value = self.pop();
        self.globals.set(name, hash, value);
      }
      OpCode::SetGlobal => {
        let name = self.read_string();
        let hash = self.gc.get(name).as_string().unwrap().hash();
        if self.globals.get(name, hash).is_none() {
          let n = self.gc.get(name).as_string().unwrap().as_str().to_string();
          return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
        }
        self.globals.set(name, hash, self.peek(0));
      }
      OpCode::GetUpvalue => {
        let slot = self.read_byte() as usize;
        let upvalue_ref = self.closure().upvalues[slot];
        let value = match self.gc.get(upvalue_ref).as_upvalue().unwrap().state {
          UpvalueState::Open(i) => self.stack[i],
          UpvalueState::Closed(v) => v,
        };
        self.push(value);
      }
      OpCode::SetUpvalue => {
        let slot = self.read_byte() as usize;
        let upvalue_ref = self.closure().upvalues[slot];
        let value = self.peek(0);
        let stack_index = self.gc.get(upvalue_ref).as_upvalue().unwrap().stack_index();
        match stack_index {
          Some(i) => self.stack[i] = value,
          None => self.gc.get_mut(upvalue_ref).as_upvalue_mut().unwrap().close(value),
        }
      }
      OpCode::GetProperty => {
        let name = self.read_string();
        let receiver = self.peek(0);
        let Value::Object(r) = receiver else {
          return Err(self.runtime_error("Only instances have properties."));
        };
        let instance = match self.gc.get(r) {
          Obj::Instance(i) => i,
          _ => return Err(self.runtime_error("Only instances have properties.")),
        };
        let hash = self.gc.get(name).as_string().unwrap().hash();
        if let Some(value) = instance.fields.get(name, hash) {
          self.pop();
          self.push(value);
        } else {
          let class = instance.class;
          self.bind_method(class, name)?;
        }
      }
      OpCode::SetProperty => {
        let name = self.read_string();
        let value = self.peek(0);
        let receiver = self.peek(1);
        let Value::Object(r) = receiver else {
          return Err(self.runtime_error("Only instances have fields."));
        };
        let hash = self.gc.get(name).as_string().unwrap().hash();
        match self.gc.get_mut(r).as_instance_mut() {
          Some(instance) => {
            instance.fields.set(name, hash, value);
          }
          None => return Err(self.runtime_error("Only instances have fields.")),
        }
        let value = self.pop();
        self.pop();
        self.push(value);
      }
      OpCode::GetSuper => {
        let name = self.read_string();
        let superclass = self.pop();
        let Value::Object(class_ref) = superclass else {
          unreachable!("superclass is always a class")
        };
        self.bind_method(class_ref, name)?;
      }
      OpCode::Equal => {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Bool(a.equals(&b)));
      }
      OpCode::Greater => self.number_binary(|a, b| Value::Bool(a > b))?,
      OpCode::Less => self.number_binary(|a, b| Value::Bool(a < b))?,
      OpCode::Add => self.add()?,
      OpCode::Subtract => self.number_binary(|a, b| Value::Number(a - b))?,
      OpCode::Multiply => self.number_binary(|a, b| Value::Number(a * b))?,
      OpCode::Divide => self.number_binary(|a, b| Value::Number(a / b))?,
      OpCode::Not => {
        let v = self.pop();
        self.push(Value::Bool(!v.is_truthy()));
      }
      OpCode::Negate => {
        let v = self.peek(0);
        match v.as_number() {
          Some(n) => {
            self.pop();
            self.push(Value::Number(-n));
          }
          None => return Err(self.runtime_error("Operand must be a number.")),
        }
      }
      OpCode::Print => {
        let v = self.pop();
        let s = self.stringify(v);
        let _ = writeln!(self.stdout, "{s}");
      }
      OpCode::Jump => {
        let offset = self.read_u16();
        self.frames.last_mut().unwrap().ip += offset as usize;
      }
      OpCode::JumpIfFalse => {
        let offset = self.read_u16();
        if !self.peek(0).is_truthy() {
          self.frames.last_mut().unwrap().ip += offset as usize;
        }
      }
      OpCode::Loop => {
        let offset = self.read_u16();
        self.frames.last_mut().unwrap().ip -= offset as usize;
      }
      OpCode::Call => {
        let arg_count = self.read_byte();
        let callee = self.peek(arg_count as usize);
        self.call_value(callee, arg_count)?;
      }
      OpCode::Invoke => {
        let name = self.read_string();
        let arg_count = self.read_byte();
        self.invoke(name, arg_count)?;
      }
      OpCode::SuperInvoke => {
        let name = self.read_string();
        let arg_count = self.read_byte();
        let superclass = self.pop();
        let Value::Object(class_ref) = superclass else {
          unreachable!("superclass is always a class")
        };
        self.invoke_from_class(class_ref, name, arg_count)?;
      }
      OpCode::Closure => {
        let value = self.read_constant();
        let Value::Object(function) = value else {
          unreachable!("closure constant is always a function")
        };
        let upvalue_count = self.gc.get(function).as_function().unwrap().upvalue_count;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
          let is_local = self.read_byte() != 0;
          let index = self.read_byte() as usize;
          if is_local {
            let base = self.frame().base;
            upvalues.push(self.capture_upvalue(base + index));
          } else {
            upvalues.push(self.closure().upvalues[index]);
          }
        }
        let closure = self.gc.alloc(Obj::Closure(ObjClosure::new(function, upvalues)));
        self.push(Value::Object(closure));
      }
      OpCode::CloseUpvalue => {
        let top = self.stack.len() - 1;
        self.close_upvalues(top);
        self.pop();
      }
      OpCode::Return => {
        let result = self.pop();
        let base = self.frame().base;
        self.close_upvalues(base);
        self.frames.pop();
        if self.frames.is_empty() {
          self.pop();
          return Ok(Control::Return);
        }
        self.stack.truncate(base);
        self.push(result);
      }
      OpCode::Class => {
        let name = self.read_string();
        let class = self.gc.alloc(Obj::Class(ObjClass::new(name)));
        self.push(Value::Object(class));
      }
      OpCode::Inherit => {
        let superclass = self.peek(1);
        let Value::Object(super_ref) = superclass else {
          return Err(self.runtime_error("Superclass must be a class."));
        };
        if self.gc.get(super_ref).as_class().is_none() {
          return Err(self.runtime_error("Superclass must be a class."));
        }
        let sub_val = self.peek(0);
        let Value::Object(sub_ref) = sub_val else {
          unreachable!("subclass is always a class")
        };
        let super_methods_copy: Vec<(ObjRef, Value)> = self
          .gc
          .get(super_ref)
          .as_class()
          .unwrap()
          .methods
          .iter()
          .collect();
        for (key, value) in super_methods_copy {
          let hash = self.gc.get(key).as_string().unwrap().hash();
          self
            .gc
            .get_mut(sub_ref)
            .as_class_mut()
            .unwrap()
            .methods
            .set(key, hash, value);
        }
        self.pop();
      }
      OpCode::Method => {
        let name = self.read_string();
        let method = self.peek(0);
        let class_val = self.peek(1);
        let Value::Object(class_ref) = class_val else {
          unreachable!("enclosing class is always a class")
        };
        let hash = self.gc.get(name).as_string().unwrap().hash();
        self
          .gc
          .get_mut(class_ref)
          .as_class_mut()
          .unwrap()
          .methods
          .set(name, hash, method);
        self.pop();
      }
    }
    Ok(Control::Ok)
  }

  fn add(&mut self) -> std::result::Result<(), RuntimeError> {
    let b = self.peek(0);
    let a = self.peek(1);
    match (a, b) {
      (Value::Number(a), Value::Number(b)) => {
        self.pop();
        self.pop();
        self.push(Value::Number(a + b));
      }
      (Value::Object(ar), Value::Object(br))
        if self.gc.get(ar).as_string().is_some() && self.gc.get(br).as_string().is_some() =>
      {
        let sa = self.gc.get(ar).as_string().unwrap().as_str().to_string();
        let sb = self.gc.get(br).as_string().unwrap().as_str().to_string();
        self.pop();
        self.pop();
        let r = self.gc.intern(&(sa + &sb));
        self.push(Value::Object(r));
      }
      _ => return Err(self.runtime_error("Operands must be two numbers or two strings.")),
    }
    Ok(())
  }

  fn number_binary(&mut self, f: impl Fn(f64, f64) -> Value) -> std::result::Result<(), RuntimeError> {
    let b = self.peek(0);
    let a = self.peek(1);
    match (a.as_number(), b.as_number()) {
      (Some(a), Some(b)) => {
        self.pop();
        self.pop();
        self.push(f(a, b));
      }
      _ => return Err(self.runtime_error("Operands must be numbers.")),
    }
    Ok(())
  }
}
