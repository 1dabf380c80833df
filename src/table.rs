//! Hash table (component D): open addressing with linear probing and
//! tombstones, keyed by interned string identity.
//!
//! Capacity is always a power of two, tracked as a mask (`capacity - 1`)
//! rather than the raw capacity -- the masking form is the faster of the two
//! equivalent conventions and is what we standardize on (see DESIGN.md).
//! Buckets are chosen by the key string's content hash, which callers pass
//! in alongside the key (they already have it on hand from the `ObjString`
//! they just looked up or interned) and which we also cache per entry so
//! resizing never needs to dereference back through the heap.

use crate::gc::Gc;
use crate::object::ObjRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone)]
struct Entry {
  key: Option<ObjRef>,
  hash: u32,
  value: Value,
}

/// A tombstone is a deleted entry: `key: None` but `value` is `true` rather
/// than `nil`, which is how probing tells "never used" and "deleted, keep
/// probing past me" apart without a third enum state per slot.
fn is_tombstone(entry: &Entry) -> bool {
  entry.key.is_none() && matches!(entry.value, Value::Bool(true))
}

fn tombstone() -> Entry {
  Entry {
    key: None,
    hash: 0,
    value: Value::Bool(true),
  }
}

fn empty() -> Entry {
  Entry {
    key: None,
    hash: 0,
    value: Value::Nil,
  }
}

pub struct Table {
  entries: Vec<Entry>,
  /// Live entries plus tombstones, i.e. what load factor is computed
  /// against -- a tombstone counts toward triggering a resize even though
  /// it holds no usable key.
  count: usize,
}

impl Table {
  pub fn new() -> Self {
    Table {
      entries: Vec::new(),
      count: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.count
  }

  fn capacity(&self) -> usize {
    self.entries.len()
  }

  fn mask(&self) -> usize {
    self.capacity() - 1
  }

  /// Finds the slot `key`/`hash` belongs in: either the matching entry, or
  /// the first empty slot, reusing the earliest tombstone seen along the
  /// way. Entries only ever collide on hash, never on equal-but-distinct
  /// `ObjRef`s, since strings are interned.
  fn find_entry(entries: &[Entry], mask: usize, key: ObjRef, hash: u32) -> usize {
    let mut index = (hash as usize) & mask;
    let mut first_tombstone: Option<usize> = None;
    loop {
      let entry = &entries[index];
      match entry.key {
        Some(k) if k == key => return index,
        None => {
          if is_tombstone(entry) {
            if first_tombstone.is_none() {
              first_tombstone = Some(index);
            }
          } else {
            return first_tombstone.unwrap_or(index);
          }
        }
        Some(_) => {}
      }
      index = (index + 1) & mask;
    }
  }

  fn grow(&mut self) {
    let new_capacity = if self.entries.is_empty() {
      INITIAL_CAPACITY
    } else {
      self.entries.len() * 2
    };
    let mut new_entries = vec![empty(); new_capacity];
    let new_mask = new_capacity - 1;
    let mut live = 0;
    for entry in self.entries.drain(..) {
      if let Some(key) = entry.key {
        let index = Self::find_entry(&new_entries, new_mask, key, entry.hash);
        new_entries[index] = Entry {
          key: Some(key),
          hash: entry.hash,
          value: entry.value,
        };
        live += 1;
      }
    }
    self.entries = new_entries;
    self.count = live;
  }

  /// Inserts or overwrites `key`. Returns `true` if `key` was not already
  /// present. Resizes *before* probing when the table would cross the load
  /// factor, so the newly inserted entry always lands in the post-grow
  /// table.
  pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
    if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
      self.grow();
    }
    let mask = self.mask();
    let index = Self::find_entry(&self.entries, mask, key, hash);
    let entry = &mut self.entries[index];
    let is_new = entry.key.is_none();
    if is_new && !is_tombstone(entry) {
      self.count += 1;
    }
    entry.key = Some(key);
    entry.hash = hash;
    entry.value = value;
    is_new
  }

  pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
    if self.entries.is_empty() {
      return None;
    }
    let index = Self::find_entry(&self.entries, self.mask(), key, hash);
    let entry = &self.entries[index];
    entry.key.map(|_| entry.value)
  }

  pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
    if self.entries.is_empty() {
      return false;
    }
    let index = Self::find_entry(&self.entries, self.mask(), key, hash);
    let entry = &mut self.entries[index];
    if entry.key.is_none() {
      return false;
    }
    *entry = tombstone();
    true
  }

  /// Copies every live entry from `self` into `dst`, used for class
  /// inheritance (the subclass starts as a copy of the superclass's method
  /// table).
  pub fn add_all(&self, dst: &mut Table) {
    for entry in &self.entries {
      if let Some(key) = entry.key {
        dst.set(key, entry.hash, entry.value);
      }
    }
  }

  /// Specialized lookup used only by the string interning pool: finds an
  /// existing interned string with the same contents, given raw bytes we
  /// don't yet have an `ObjRef` for. Unlike `find_entry`, this compares by
  /// content (hash, length, bytes), not by `ObjRef` identity, so it needs
  /// heap access to read the candidate's bytes back.
  pub fn find_string(&self, gc: &Gc, chars: &str, hash: u32) -> Option<ObjRef> {
    if self.entries.is_empty() {
      return None;
    }
    let mask = self.mask();
    let mut index = (hash as usize) & mask;
    loop {
      let entry = &self.entries[index];
      match entry.key {
        None if !is_tombstone(entry) => return None,
        Some(key) if entry.hash == hash => {
          let s = gc.get(key).as_string().expect("string table key");
          if s.as_str() == chars {
            return Some(key);
          }
        }
        _ => {}
      }
      index = (index + 1) & mask;
    }
  }

  /// Drops entries (interned strings) not satisfying `is_marked`; used to
  /// remove the interning pool's weak references to strings the sweep phase
  /// is about to free.
  pub fn remove_unmarked<F: Fn(ObjRef) -> bool>(&mut self, is_marked: F) {
    for entry in &mut self.entries {
      if let Some(key) = entry.key {
        if !is_marked(key) {
          *entry = tombstone();
        }
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
    self
      .entries
      .iter()
      .filter_map(|e| e.key.map(|k| (k, e.value)))
  }
}

impl Default for Table {
  fn default() -> Self {
    Table::new()
  }
}
