//! Class objects: a name and a method table.

use crate::object::ObjRef;
use crate::table::Table;

pub struct ObjClass {
  pub name: ObjRef,
  /// Maps method-name `ObjRef` (interned string) to a `Value::Object`
  /// wrapping an `ObjClosure`. Inheritance copies the superclass's table
  /// into the subclass's at class-creation time (`addAll`), so lookup never
  /// has to walk a superclass chain.
  pub methods: Table,
}

impl ObjClass {
  pub fn new(name: ObjRef) -> Self {
    ObjClass {
      name,
      methods: Table::new(),
    }
  }
}
