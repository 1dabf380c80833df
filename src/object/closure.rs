//! A function template paired with the upvalues it closed over.

use crate::object::ObjRef;

pub struct ObjClosure {
  pub function: ObjRef,
  pub upvalues: Vec<ObjRef>,
}

impl ObjClosure {
  pub fn new(function: ObjRef, upvalues: Vec<ObjRef>) -> Self {
    ObjClosure { function, upvalues }
  }
}
