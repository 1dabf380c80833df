//! Garbage collector (component I) and string interning pool (component E).
//!
//! The heap is an arena of [`Slot`]s rather than an intrusive linked list of
//! owned pointers: [`ObjRef`] is an index, freed slots go on a free list and
//! get reused by later allocations. This is the Rust-shaped translation of
//! the "all objects" list the source VM this design is modeled on uses (see
//! DESIGN.md) -- the mark bit lives on the slot, not the object, for the
//! same reason.
//!
//! Collection is mark-sweep, triggered by an allocation threshold. Marking
//! roots is the caller's job (the VM or the compiler, whichever is
//! allocating): call [`Gc::mark_value`]/[`Gc::mark_object`] for every root,
//! then call [`Gc::collect`], which traces from there, drops now-unreachable
//! interned strings from the pool, and sweeps.

use crate::object::{string::hash_str, Obj, ObjRef};
use crate::table::Table;
use crate::value::Value;

const INITIAL_NEXT_GC: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

struct Slot {
  obj: Option<Obj>,
  marked: bool,
}

pub struct Gc {
  slots: Vec<Slot>,
  free: Vec<u32>,
  gray: Vec<ObjRef>,
  /// Weak: a live entry here does not keep its string alive on its own.
  strings: Table,
  bytes_allocated: usize,
  next_gc: usize,
}

impl Gc {
  pub fn new() -> Self {
    Gc {
      slots: Vec::new(),
      free: Vec::new(),
      gray: Vec::new(),
      strings: Table::new(),
      bytes_allocated: 0,
      next_gc: INITIAL_NEXT_GC,
    }
  }

  pub fn get(&self, r: ObjRef) -> &Obj {
    self.slots[r.index()]
      .obj
      .as_ref()
      .expect("dereferenced a freed object")
  }

  pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
    self.slots[r.index()]
      .obj
      .as_mut()
      .expect("dereferenced a freed object")
  }

  pub fn alloc(&mut self, obj: Obj) -> ObjRef {
    self.bytes_allocated += std::mem::size_of::<Obj>();
    let slot = Slot {
      obj: Some(obj),
      marked: false,
    };
    if let Some(index) = self.free.pop() {
      self.slots[index as usize] = slot;
      ObjRef(index)
    } else {
      self.slots.push(slot);
      ObjRef((self.slots.len() - 1) as u32)
    }
  }

  /// Interns `chars`, returning the existing `ObjRef` if an equal string is
  /// already in the pool, allocating a new one otherwise. This is the only
  /// way string objects are created, which is what makes `Value::equals`'s
  /// by-reference object comparison correct for strings.
  pub fn intern(&mut self, chars: &str) -> ObjRef {
    let hash = hash_str(chars);
    if let Some(existing) = self.strings.find_string(self, chars, hash) {
      return existing;
    }
    let r = self.alloc(Obj::String(crate::object::ObjString::new(chars)));
    self.strings.set(r, hash, Value::Nil);
    r
  }

  pub fn should_collect(&self) -> bool {
    self.bytes_allocated > self.next_gc
  }

  pub fn mark_value(&mut self, value: Value) {
    if let Value::Object(r) = value {
      self.mark_object(r);
    }
  }

  pub fn mark_object(&mut self, r: ObjRef) {
    let slot = &mut self.slots[r.index()];
    if slot.obj.is_none() || slot.marked {
      return;
    }
    slot.marked = true;
    self.gray.push(r);
  }

  pub fn mark_table(&mut self, table: &Table) {
    let entries: Vec<(ObjRef, Value)> = table.iter().collect();
    for (key, value) in entries {
      self.mark_object(key);
      self.mark_value(value);
    }
  }

  /// Traces from whatever roots have already been marked, drops dead
  /// entries from the string pool, then sweeps unmarked objects. Callers
  /// must mark every root *before* calling this.
  pub fn collect(&mut self) {
    while let Some(r) = self.gray.pop() {
      self.blacken(r);
    }
    self.strings
      .remove_unmarked(|r| self.slots.get(r.index()).map(|s| s.marked).unwrap_or(false));
    self.sweep();
    self.next_gc = self.bytes_allocated.max(INITIAL_NEXT_GC) * HEAP_GROW_FACTOR;
  }

  fn children_of(&self, r: ObjRef) -> Vec<ObjRef> {
    let mut out = Vec::new();
    match self.slots[r.index()].obj.as_ref() {
      Some(Obj::Closure(c)) => {
        out.push(c.function);
        out.extend(c.upvalues.iter().copied());
      }
      Some(Obj::Function(f)) => {
        if let Some(name) = f.name {
          out.push(name);
        }
        out.extend(f.chunk.constants.iter().filter_map(Value::as_object));
      }
      Some(Obj::Upvalue(u)) => {
        if let crate::object::UpvalueState::Closed(v) = u.state {
          if let Some(o) = v.as_object() {
            out.push(o);
          }
        }
      }
      Some(Obj::Class(c)) => {
        out.push(c.name);
        for (key, value) in c.methods.iter() {
          out.push(key);
          if let Some(o) = value.as_object() {
            out.push(o);
          }
        }
      }
      Some(Obj::Instance(i)) => {
        out.push(i.class);
        for (key, value) in i.fields.iter() {
          out.push(key);
          if let Some(o) = value.as_object() {
            out.push(o);
          }
        }
      }
      Some(Obj::BoundMethod(b)) => {
        out.push(b.method);
        if let Some(o) = b.receiver.as_object() {
          out.push(o);
        }
      }
      Some(Obj::Native(n)) => out.push(n.name),
      Some(Obj::String(_)) | None => {}
    }
    out
  }

  fn blacken(&mut self, r: ObjRef) {
    for child in self.children_of(r) {
      self.mark_object(child);
    }
  }

  fn sweep(&mut self) {
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if slot.obj.is_none() {
        continue;
      }
      if slot.marked {
        slot.marked = false;
      } else {
        slot.obj = None;
        self.bytes_allocated = self
          .bytes_allocated
          .saturating_sub(std::mem::size_of::<Obj>());
        self.free.push(index as u32);
      }
    }
  }
}

impl Default for Gc {
  fn default() -> Self {
    Gc::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_returns_same_ref_for_equal_contents() {
    let mut gc = Gc::new();
    let a = gc.intern("hello");
    let b = gc.intern("hello");
    assert_eq!(a, b);
  }

  #[test]
  fn interning_distinguishes_different_contents() {
    let mut gc = Gc::new();
    let a = gc.intern("hello");
    let b = gc.intern("world");
    assert_ne!(a, b);
  }

  #[test]
  fn unmarked_objects_are_swept_and_slots_reused() {
    let mut gc = Gc::new();
    let a = gc.intern("temporary");
    // Nothing marks `a` as a root, so it should not survive a collection.
    gc.collect();
    assert!(gc.slots[a.index()].obj.is_none());

    let b = gc.intern("reused-slot");
    assert_eq!(a.index(), b.index());
  }

  #[test]
  fn marked_objects_survive_collection() {
    let mut gc = Gc::new();
    let a = gc.intern("kept");
    gc.mark_object(a);
    gc.collect();
    assert!(gc.get(a).as_string().is_some());
  }
}
