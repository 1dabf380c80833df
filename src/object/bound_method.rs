//! A method closure bound to the receiver it was looked up on.

use crate::object::ObjRef;
use crate::value::Value;

pub struct ObjBoundMethod {
  pub receiver: Value,
  pub method: ObjRef,
}

impl ObjBoundMethod {
  pub fn new(receiver: Value, method: ObjRef) -> Self {
    ObjBoundMethod { receiver, method }
  }
}
