//! Hash table keyed by interned strings.
//!
//! Open addressing with linear probing. Deleted entries leave a tombstone behind so probe
//! sequences running through them stay intact; tombstones are dropped when the table grows.


use std::mem::size_of;

use crate::gc::{Gc, Trace, Tracer};
use crate::object::Str;
use crate::value::Value;

const MIN_CAPACITY: usize = 8;

/// An interned string together with its cached hash.
///
/// Since strings are interned, two symbols are the same key iff they point to the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub string: Gc<Str>,
    pub hash: u32,
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Empty,
    Tombstone,
    Occupied { key: Symbol, value: Value },
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Occupied entries plus tombstones
    count: usize,
    /// Occupied entries only
    live: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.entries.capacity() * size_of::<Entry>()
    }

    /// Find the slot `key` lives in, or the slot it should be inserted into.
    ///
    /// `entries` must contain at least one empty slot.
    fn find_entry(entries: &[Entry], key: Symbol) -> usize {
        let capacity = entries.len();
        let mut index = key.hash as usize % capacity;
        let mut tombstone = None;
        loop {
            match &entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    tombstone.get_or_insert(index);
                }
                Entry::Occupied { key: k, .. } if k.string == key.string => return index,
                Entry::Occupied { .. } => {}
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn get(&self, key: Symbol) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries[Self::find_entry(&self.entries, key)] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Insert or overwrite `key`. Returns `true` if the key was not present before.
    pub fn set(&mut self, key: Symbol, value: Value) -> bool {
        // grow when the load factor would exceed 3/4
        if (self.count + 1) * 4 > self.capacity() * 3 {
            let capacity = (self.capacity() * 2).max(MIN_CAPACITY);
            self.adjust_capacity(capacity);
        }

        let idx = Self::find_entry(&self.entries, key);
        let slot = &mut self.entries[idx];
        let is_new = !matches!(slot, Entry::Occupied { .. });
        if matches!(slot, Entry::Empty) {
            self.count += 1;
        }
        if is_new {
            self.live += 1;
        }
        *slot = Entry::Occupied { key, value };
        is_new
    }

    /// Remove `key`. Returns `true` if the key was present.
    pub fn delete(&mut self, key: Symbol) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_entry(&self.entries, key);
        let slot = &mut self.entries[idx];
        if matches!(slot, Entry::Occupied { .. }) {
            *slot = Entry::Tombstone;
            self.live -= 1;
            true
        } else {
            false
        }
    }

    /// Copy every entry of `self` into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for (key, value) in self.iter() {
            to.set(key, value);
        }
    }

    /// Find a key by content rather than by identity. `eq` is asked about every key with the
    /// same hash. This is the only place where strings are compared by content.
    pub fn find_string(&self, hash: u32, mut eq: impl FnMut(Gc<Str>) -> bool) -> Option<Gc<Str>> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            match &self.entries[index] {
                Entry::Empty => return None,
                Entry::Occupied { key, .. } if key.hash == hash && eq(key.string) => {
                    return Some(key.string)
                }
                _ => {}
            }
            index = (index + 1) % capacity;
        }
    }

    /// Delete every entry whose key does not satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(Symbol) -> bool) {
        for slot in &mut self.entries {
            if let Entry::Occupied { key, .. } = slot {
                if !keep(*key) {
                    *slot = Entry::Tombstone;
                    self.live -= 1;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, Value)> + '_ {
        self.entries.iter().filter_map(|e| match e {
            Entry::Occupied { key, value } => Some((*key, *value)),
            _ => None,
        })
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.count = 0;
        for entry in old {
            if let Entry::Occupied { key, value } = entry {
                let idx = Self::find_entry(&self.entries, key);
                self.entries[idx] = Entry::Occupied { key, value };
                self.count += 1;
            }
        }
        debug_assert_eq!(self.count, self.live);
    }
}

impl Trace for Table {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for (key, value) in self.iter() {
            key.string.trace(tracer);
            value.trace(tracer);
        }
    }
}
