//! Upvalues: a closure's view of a captured variable.
//!
//! An upvalue starts `Open`, pointing at a live slot on the VM's operand
//! stack, so that writes through one closure's capture are visible to every
//! other closure capturing the same local. When the frame that owns the slot
//! returns, the VM closes the upvalue, copying the value out of the stack
//! and into the upvalue itself.

use crate::value::Value;

pub enum UpvalueState {
  Open(usize),
  Closed(Value),
}

pub struct ObjUpvalue {
  pub state: UpvalueState,
}

impl ObjUpvalue {
  pub fn open(stack_index: usize) -> Self {
    ObjUpvalue {
      state: UpvalueState::Open(stack_index),
    }
  }

  pub fn stack_index(&self) -> Option<usize> {
    match self.state {
      UpvalueState::Open(i) => Some(i),
      UpvalueState::Closed(_) => None,
    }
  }

  pub fn close(&mut self, value: Value) {
    self.state = UpvalueState::Closed(value);
  }
}
