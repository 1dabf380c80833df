//! Instance objects: a class reference and a per-instance field table.

use crate::object::ObjRef;
use crate::table::Table;

pub struct ObjInstance {
  pub class: ObjRef,
  pub fields: Table,
}

impl ObjInstance {
  pub fn new(class: ObjRef) -> Self {
    ObjInstance {
      class,
      fields: Table::new(),
    }
  }
}
