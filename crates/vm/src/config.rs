use crate::gc::alloc::{GC_HEAP_GROW_FACTOR, INIT_GC_THRESHOLD};

/// Maximum depth of the call stack.
pub const FRAMES_MAX: usize = 64;

/// Stack slots reserved for each call frame.
pub const SLOTS_PER_FRAME: usize = u8::MAX as usize + 1;

/// Knobs of a [`Vm`](crate::vm::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Collect garbage before every allocation.
    pub stress_gc: bool,
    /// Log every executed instruction along with the value stack.
    pub trace_execution: bool,
    /// Heap size in bytes that triggers the first collection.
    pub initial_gc_threshold: usize,
    /// After a collection, the next one is triggered at `gc_grow_factor` times the live heap.
    pub gc_grow_factor: usize,
    /// Maximum depth of the call stack.
    pub frames_max: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stress_gc: false,
            trace_execution: false,
            initial_gc_threshold: INIT_GC_THRESHOLD,
            gc_grow_factor: GC_HEAP_GROW_FACTOR,
            frames_max: FRAMES_MAX,
        }
    }
}

impl VmConfig {
    /// Capacity of the value stack.
    pub fn stack_max(&self) -> usize {
        self.frames_max * SLOTS_PER_FRAME
    }
}
