//! The garbage-collected heap: a slot arena with a free list and a
//! stop-the-world mark-and-sweep collector.
//!
//! The heap itself only stores objects and implements the mark/trace/sweep
//! phases; root discovery lives in the VM context, which owns the root
//! scopes, the module registry and the active coroutine stack. Collection
//! is triggered at allocation points when the live count crosses the
//! threshold (or before every allocation in stress mode).

use crate::vm::{
    error::{VmError, VmResult},
    objects::HeapData,
    value::Value,
};

/// Index of a live object in the heap's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Slot {
    marked: bool,
    data: Option<HeapData>,
}

/// Marker type all GC-owned slot writes are routed through. Currently a
/// no-op; an incremental collector will hook its barrier here.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteBarrier;

impl WriteBarrier {
    #[inline]
    pub fn record(&self, _target: HeapId, _value: Value) {}
}

/// The object heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<HeapId>,
    live: usize,
    /// Collection triggers when `live` reaches this.
    threshold: usize,
    /// Hard cap on live objects; exceeding it after a collection is an
    /// allocation failure.
    max_objects: usize,
    /// Collect before every allocation (test mode).
    stress: bool,
    pub barrier: WriteBarrier,
    /// Scratch mark stack, reused between collections.
    mark_stack: Vec<HeapId>,
}

const INITIAL_THRESHOLD: usize = 1024;

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            threshold: INITIAL_THRESHOLD,
            max_objects: usize::MAX,
            stress: false,
            barrier: WriteBarrier,
            mark_stack: Vec::new(),
        }
    }

    /// Caps the number of live objects; allocation fails (after a forced
    /// collection) once the cap is hit.
    pub fn set_max_objects(&mut self, max: usize) {
        self.max_objects = max;
    }

    /// Forces a collection before every allocation.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    #[must_use]
    pub fn stress(&self) -> bool {
        self.stress
    }

    /// True when the next allocation should collect first.
    #[must_use]
    pub fn wants_collection(&self) -> bool {
        self.stress || self.live >= self.threshold
    }

    /// True when the live-object cap is reached.
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.live >= self.max_objects
    }

    /// Allocates without checking memory pressure. The VM context wraps this
    /// with its collection trigger.
    pub fn allocate_raw(&mut self, data: HeapData) -> VmResult<HeapId> {
        if self.live >= self.max_objects {
            return Err(VmError::out_of_memory());
        }
        self.live += 1;
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.index()];
            debug_assert!(slot.data.is_none(), "free list entry is occupied");
            slot.data = Some(data);
            slot.marked = false;
            return Ok(id);
        }
        let id = HeapId(u32::try_from(self.slots.len()).expect("heap exceeds u32 slots"));
        self.slots.push(Slot {
            marked: false,
            data: Some(data),
        });
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()]
            .data
            .as_ref()
            .expect("access to a freed heap object")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()]
            .data
            .as_mut()
            .expect("access to a freed heap object")
    }

    /// Number of live objects.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    // --- collection phases (driven by the VM context) ---

    /// Marks a root value and everything reachable from it.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.mark_id(id);
        }
        self.trace_marked();
    }

    /// Marks a root object id and everything reachable from it.
    pub fn mark_id(&mut self, id: HeapId) {
        let slot = &mut self.slots[id.index()];
        if slot.marked || slot.data.is_none() {
            return;
        }
        slot.marked = true;
        self.mark_stack.push(id);
    }

    /// Drains the mark stack, invoking each object's walker. Children are
    /// pushed back onto the stack instead of being traced recursively, so
    /// deep object graphs cannot overflow the native stack.
    pub fn trace_marked(&mut self) {
        let mut pending: Vec<HeapId> = Vec::new();
        while let Some(id) = self.mark_stack.pop() {
            let data = self.slots[id.index()].data.as_ref().expect("marked object is live");
            pending.clear();
            data.trace(&mut |value| {
                if let Value::Ref(child) = value {
                    pending.push(child);
                }
            });
            for &child in &pending {
                let slot = &mut self.slots[child.index()];
                if !slot.marked && slot.data.is_some() {
                    slot.marked = true;
                    self.mark_stack.push(child);
                }
            }
        }
    }

    /// Frees unmarked objects and clears the mark flags of the survivors.
    /// Returns the number of freed objects.
    pub fn sweep(&mut self) -> usize {
        debug_assert!(self.mark_stack.is_empty(), "sweep runs after tracing finished");
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.data.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.data = None;
                freed += 1;
                self.free
                    .push(HeapId(u32::try_from(index).expect("heap index fits u32")));
            }
        }
        self.live -= freed;
        // Grow the trigger with the surviving population.
        self.threshold = (self.live * 2).max(INITIAL_THRESHOLD);
        freed
    }

    /// Replaces an object's payload, returning the previous one. Used to
    /// detach a coroutine stack while it executes.
    pub fn replace(&mut self, id: HeapId, data: HeapData) -> HeapData {
        let slot = self.slots[id.index()].data.as_mut().expect("access to a freed heap object");
        std::mem::replace(slot, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new();
        let id = heap.allocate_raw(HeapData::Integer(7)).expect("allocation succeeds");
        assert!(matches!(heap.get(id), HeapData::Integer(7)));
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new();
        let kept = heap.allocate_raw(HeapData::Integer(1)).expect("alloc");
        let _lost = heap.allocate_raw(HeapData::Integer(2)).expect("alloc");

        heap.mark_value(Value::Ref(kept));
        let freed = heap.sweep();
        assert_eq!(freed, 1);
        assert_eq!(heap.live(), 1);
        assert!(matches!(heap.get(kept), HeapData::Integer(1)));
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut heap = Heap::new();
        let first = heap.allocate_raw(HeapData::Integer(1)).expect("alloc");
        heap.sweep(); // nothing marked: everything freed
        let second = heap.allocate_raw(HeapData::Integer(2)).expect("alloc");
        assert_eq!(first, second, "the freed slot is reused");
    }

    #[test]
    fn tracing_follows_object_graphs() {
        let mut heap = Heap::new();
        let inner = heap.allocate_raw(HeapData::Integer(10)).expect("alloc");
        let outer = heap
            .allocate_raw(HeapData::Array(vec![Value::Ref(inner), Value::SmallInt(1)]))
            .expect("alloc");

        heap.mark_value(Value::Ref(outer));
        let freed = heap.sweep();
        assert_eq!(freed, 0, "the array keeps its element alive");
        assert!(matches!(heap.get(inner), HeapData::Integer(10)));
    }

    #[test]
    fn object_cap_produces_out_of_memory() {
        let mut heap = Heap::new();
        heap.set_max_objects(1);
        heap.allocate_raw(HeapData::Integer(1)).expect("first fits");
        let err = heap.allocate_raw(HeapData::Integer(2)).expect_err("cap exceeded");
        assert_eq!(err, VmError::out_of_memory());
    }
}
