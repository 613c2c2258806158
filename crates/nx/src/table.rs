//! Open-addressing hash table with linear probing and tombstones.
//!
//! A direct Rust port of `original_source/hashtable.c`: same probe sequence, same
//! tombstone representation (empty key + non-nil marker), and the same 75% max load
//! factor before growing. Used for globals, object property tables, and class method
//! tables — anywhere the original keys tables by interned string identity.
//!
//! Every key is a [`StringId`]; since all nx strings are interned, two equal strings
//! always share the same id, so this plays the role the original's pointer-equality
//! `ObjString*` keys did.

use crate::intern::StringId;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(StringId, Value),
}

pub struct HashTable {
    entries: Vec<Slot>,
    count: usize,
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTable {
    pub fn new() -> Self {
        Self { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn hash_of(key: StringId) -> u64 {
        key.index() as u64
    }

    /// Finds the slot `key` occupies, or the first empty/tombstone slot it could be
    /// inserted into. `capacity` must be nonzero and `entries.len() == capacity`.
    fn find_slot(entries: &[Slot], capacity: usize, key: StringId) -> usize {
        let mut index = (Self::hash_of(key) % capacity as u64) as usize;
        let mut tombstone: Option<usize> = None;
        loop {
            match entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) if k == key => return index,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow_capacity(capacity: usize) -> usize {
        if capacity < 8 {
            8
        } else {
            capacity * 2
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut new_entries = vec![Slot::Empty; capacity];
        let mut new_count = 0;
        for slot in &self.entries {
            if let Slot::Occupied(key, value) = slot {
                let index = Self::find_slot(&new_entries, capacity, *key);
                new_entries[index] = Slot::Occupied(*key, *value);
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    pub fn get(&self, key: StringId) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_slot(&self.entries, self.capacity(), key);
        match self.entries[index] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: StringId) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites `key`. Returns `true` if this created a new entry.
    pub fn set(&mut self, key: StringId, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * TABLE_MAX_LOAD {
            let new_cap = Self::grow_capacity(self.capacity());
            self.adjust_capacity(new_cap);
        }
        let index = Self::find_slot(&self.entries, self.capacity(), key);
        let is_new = !matches!(self.entries[index], Slot::Occupied(..));
        if is_new && !matches!(self.entries[index], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[index] = Slot::Occupied(key, value);
        is_new
    }

    pub fn delete(&mut self, key: StringId) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, self.capacity(), key);
        if !matches!(self.entries[index], Slot::Occupied(..)) {
            return false;
        }
        self.entries[index] = Slot::Tombstone;
        true
    }

    pub fn add_all(&mut self, from: &HashTable) {
        for slot in &from.entries {
            if let Slot::Occupied(key, value) = slot {
                self.set(*key, *value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringId, Value)> + '_ {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(k, v) => Some((*k, *v)),
            _ => None,
        })
    }

    /// Deletes every entry whose key is not currently mark-reachable, per
    /// `hashtable_remove_white` — used to prune weak tables (e.g. the module registry)
    /// during a GC sweep.
    pub fn remove_unmarked(&mut self, is_marked: impl Fn(StringId) -> bool) {
        let keys: Vec<StringId> = self
            .entries
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(k, _) => Some(*k),
                _ => None,
            })
            .filter(|k| !is_marked(*k))
            .collect();
        for k in keys {
            self.delete(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u32) -> StringId {
        StringId::from_index(n as u16)
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let mut t = HashTable::new();
        assert!(t.set(sid(1), Value::Int(42)));
        assert_eq!(t.get(sid(1)), Some(Value::Int(42)));
        assert!(!t.set(sid(1), Value::Int(43)));
        assert_eq!(t.get(sid(1)), Some(Value::Int(43)));
        assert!(t.delete(sid(1)));
        assert_eq!(t.get(sid(1)), None);
    }

    #[test]
    fn grows_past_max_load_factor() {
        let mut t = HashTable::new();
        for i in 0..100 {
            t.set(sid(i), Value::Int(i as i64));
        }
        for i in 0..100 {
            assert_eq!(t.get(sid(i)), Some(Value::Int(i as i64)));
        }
    }

    #[test]
    fn tombstones_do_not_break_later_probing() {
        let mut t = HashTable::new();
        t.set(sid(1), Value::Nil);
        t.set(sid(2), Value::Nil);
        t.delete(sid(1));
        assert_eq!(t.get(sid(2)), Some(Value::Nil));
    }
}
