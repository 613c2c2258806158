//! Arena-allocated object heap with a tracing, tri-color-ish mark-and-sweep collector.
//!
//! Grounded in the teacher's `Heap<T: ResourceTracker>` (`heap.rs`): a `Vec`-backed
//! arena addressed by a small `Copy` [`HeapId`], with a free list for recycled slots.
//! The collection strategy itself is NOT ported from the teacher (whose `Value` is
//! refcounted and dropped eagerly) — it instead follows `original_source/memory.h`'s
//! mark-then-sweep design: a gray worklist seeded from VM roots, transitive marking of
//! every object and interned string an object refers to, then a sweep that frees
//! anything left unmarked and prunes the weak intern table.

use crate::intern::{Interns, StringId};
use crate::object::{HeapData, ObjUpvalue};
use crate::table::HashTable;
use crate::value::Value;

/// Unique identifier for a value stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

enum Slot {
    Free { next: Option<usize> },
    Occupied { data: HeapData, marked: bool },
}

/// GC growth factor applied to `next_gc` after every collection, matching the literal
/// constant named in the component design for the garbage collector.
pub const GC_GROW_FACTOR: usize = 2;

pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub stress_gc: bool,
    pub gc_paused: u32,
    pub cycles_run: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl Heap {
    pub fn new(initial_threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            bytes_allocated: 0,
            next_gc: initial_threshold,
            stress_gc: false,
            gc_paused: 0,
            cycles_run: 0,
        }
    }

    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        self.bytes_allocated += Self::estimate_size(&data);
        if let Some(index) = self.free_head {
            let next = match &self.slots[index] {
                Slot::Free { next } => *next,
                Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
            };
            self.free_head = next;
            self.slots[index] = Slot::Occupied { data, marked: false };
            HeapId(index)
        } else {
            self.slots.push(Slot::Occupied { data, marked: false });
            HeapId(self.slots.len() - 1)
        }
    }

    fn estimate_size(data: &HeapData) -> usize {
        match data {
            HeapData::Str(s) => 32 + s.chars.len(),
            HeapData::Seq(s) => 32 + s.items.len() * 16,
            HeapData::Tuple(t) => 32 + t.items.len() * 16,
            HeapData::Object(_) => 64,
            HeapData::Function(_) => 128,
            HeapData::Closure(c) => 32 + c.upvalues.len() * 8,
            HeapData::Upvalue(_) => 24,
            HeapData::Class(_) => 96,
            HeapData::BoundMethod(_) => 32,
            HeapData::Module(_) => 64,
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        match &self.slots[id.0] {
            Slot::Occupied { data, .. } => data,
            Slot::Free { .. } => panic!("use of freed HeapId {id:?}"),
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        match &mut self.slots[id.0] {
            Slot::Occupied { data, .. } => data,
            Slot::Free { .. } => panic!("use of freed HeapId {id:?}"),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.stress_gc || (self.gc_paused == 0 && self.bytes_allocated > self.next_gc)
    }

    /// Runs one full mark-and-sweep cycle. `roots` are every [`Value`] directly reachable
    /// from the VM (stack slots, open upvalues' live copies, the current exception, and
    /// so on); `extra_tables` are weak global/module tables marked transitively and then
    /// pruned of anything that did not survive; `extra_strings` are interned ids reachable
    /// only from plain Rust state (the VM's special-method-name cache, not any heap `Value`)
    /// that must survive even when no class on the heap happens to define that method.
    pub fn collect(&mut self, roots: &[Value], extra_tables: &[&HashTable], extra_strings: &[StringId], interns: &mut Interns) {
        self.cycles_run += 1;
        interns.clear_marks();
        let mut gray: Vec<HeapId> = Vec::new();

        for v in roots {
            self.mark_value(*v, &mut gray, interns);
        }
        for table in extra_tables {
            for (key, value) in table.iter() {
                interns.mark(key);
                self.mark_value(value, &mut gray, interns);
            }
        }
        for sid in extra_strings {
            interns.mark(*sid);
        }

        while let Some(id) = gray.pop() {
            self.trace_children(id, &mut gray, interns);
        }

        self.sweep();
        interns.sweep();
        self.next_gc = self.bytes_allocated.saturating_mul(GC_GROW_FACTOR).max(1024);
    }

    fn mark_value(&mut self, value: Value, gray: &mut Vec<HeapId>, interns: &mut Interns) {
        if let Value::Ref(id) = value {
            self.mark_id(id, gray, interns);
        }
    }

    fn mark_id(&mut self, id: HeapId, gray: &mut Vec<HeapId>, _interns: &mut Interns) {
        if let Slot::Occupied { marked, .. } = &mut self.slots[id.0] {
            if !*marked {
                *marked = true;
                gray.push(id);
            }
        }
    }

    fn trace_children(&mut self, id: HeapId, gray: &mut Vec<HeapId>, interns: &mut Interns) {
        // Collect child references first (immutable borrow), then mark them, to avoid
        // borrowing `self.slots` mutably and immutably at once.
        let mut child_values: Vec<Value> = Vec::new();
        let mut child_ids: Vec<HeapId> = Vec::new();
        let mut child_strings: Vec<StringId> = Vec::new();

        match self.get(id) {
            HeapData::Str(_) => {}
            HeapData::Seq(s) => child_values.extend_from_slice(&s.items),
            HeapData::Tuple(t) => child_values.extend_from_slice(&t.items),
            HeapData::Object(o) => {
                for (k, v) in o.fields.iter() {
                    child_strings.push(k);
                    child_values.push(v);
                }
                if let Some(c) = o.class_id {
                    child_ids.push(c);
                }
            }
            HeapData::Function(f) => {
                if let Some(name) = f.name {
                    child_strings.push(name);
                }
                child_values.extend_from_slice(&f.chunk.constants);
            }
            HeapData::Closure(c) => {
                child_ids.extend_from_slice(&c.upvalues);
                if let Some(name) = c.function.name {
                    child_strings.push(name);
                }
                child_values.extend_from_slice(&c.function.chunk.constants);
            }
            HeapData::Upvalue(ObjUpvalue::Closed(v)) => child_values.push(*v),
            HeapData::Upvalue(ObjUpvalue::Open { .. }) => {}
            HeapData::Class(cls) => {
                child_strings.push(cls.name);
                if let Some(base) = cls.base {
                    child_ids.push(base);
                }
                for (k, v) in cls.methods.iter() {
                    child_strings.push(k);
                    child_values.push(v);
                }
                for special in [cls.ctor, cls.has_method, cls.to_str_method, cls.slice_method] {
                    if let Some(v) = special {
                        child_values.push(v);
                    }
                }
            }
            HeapData::BoundMethod(b) => {
                child_values.push(b.receiver);
                child_values.push(b.method);
            }
            HeapData::Module(table) => {
                for (k, v) in table.iter() {
                    child_strings.push(k);
                    child_values.push(v);
                }
            }
        }

        for sid in child_strings {
            interns.mark(sid);
        }
        for cid in child_ids {
            self.mark_id(cid, gray, interns);
        }
        for v in child_values {
            self.mark_value(v, gray, interns);
        }
    }

    fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            match &mut self.slots[index] {
                Slot::Occupied { marked, .. } if *marked => {
                    *marked = false;
                }
                Slot::Occupied { .. } => {
                    let freed_size = Self::estimate_size(match &self.slots[index] {
                        Slot::Occupied { data, .. } => data,
                        Slot::Free { .. } => unreachable!(),
                    });
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(freed_size);
                    self.slots[index] = Slot::Free { next: self.free_head };
                    self.free_head = Some(index);
                }
                Slot::Free { .. } => {}
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Occupied { .. })).count()
    }
}

impl std::fmt::Debug for HeapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeapId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjString;

    #[test]
    fn allocate_and_get_roundtrip() {
        let mut heap = Heap::default();
        let id = heap.allocate(HeapData::Str(ObjString::new("hi")));
        match heap.get(id) {
            HeapData::Str(s) => assert_eq!(&*s.chars, "hi"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn collect_frees_unreachable_objects() {
        let mut heap = Heap::default();
        let mut interns = Interns::new();
        let kept = heap.allocate(HeapData::Str(ObjString::new("kept")));
        let _dropped = heap.allocate(HeapData::Str(ObjString::new("dropped")));
        let roots = [Value::Ref(kept)];
        heap.collect(&roots, &[], &[], &mut interns);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn collect_reuses_freed_slots() {
        let mut heap = Heap::default();
        let mut interns = Interns::new();
        let _a = heap.allocate(HeapData::Str(ObjString::new("a")));
        heap.collect(&[], &[], &[], &mut interns);
        assert_eq!(heap.live_count(), 0);
        let b = heap.allocate(HeapData::Str(ObjString::new("b")));
        assert_eq!(b.index(), 0);
    }
}
