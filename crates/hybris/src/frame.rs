//! Execution frames: an insertion-ordered name-to-value scope plus the
//! control-flow state that short-circuits evaluation.
//!
//! Grounded on `ouros::namespace::Namespace`, but name-keyed instead of
//! slot-indexed: a Hybris frame is an insertion-ordered mapping from
//! identifier name to value, which this crate takes literally with
//! [`indexmap::IndexMap`] rather than compiling identifiers to integer
//! slots the way `ouros` does. The `FrameState` save/reset/restore dance
//! mirrors `class_call_overloaded_descriptor` in
//! `examples/original_source/src/types/class.cpp`, which snapshots
//! `vframe->state`, clears it for the duration of a descriptor call, then
//! restores it — so a `__to_string` descriptor invoked mid-`return` can't
//! leak a stray return/break/continue/throw into the caller it interrupted.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::heap::{Handle, Heap};

/// Control-flow signal threaded alongside ordinary evaluation (§4.D). Every
/// recursive call into [`crate::eval::exec`] must check
/// [`FrameState::is_short_circuited`] after evaluating a child and stop
/// evaluating further siblings if it is set — this is how `break`/`next`/
/// `return`/an in-flight exception unwind through `Block`, `For`, `While`,
/// and friends without a dedicated `ControlFlow` return type.
#[derive(Debug, Clone, Default)]
pub struct FrameState {
    pub returning: bool,
    pub return_value: Option<Handle>,
    pub breaking: bool,
    pub continuing: bool,
    pub throwing: bool,
    pub thrown_value: Option<Handle>,
}

impl FrameState {
    #[must_use]
    pub fn is_short_circuited(&self) -> bool {
        self.returning || self.breaking || self.continuing || self.throwing
    }

    /// Whether a loop should stop (either breaking out of it, or unwinding
    /// through it via return/throw). `continuing` alone is consumed by the
    /// loop itself and does not propagate further (§4.E "For"/"While").
    #[must_use]
    pub fn unwinds_past_loop(&self) -> bool {
        self.returning || self.breaking || self.throwing
    }

    pub fn set_return(&mut self, value: Handle) {
        self.returning = true;
        self.return_value = Some(value);
    }

    pub fn set_break(&mut self) {
        self.breaking = true;
    }

    pub fn set_continue(&mut self) {
        self.continuing = true;
    }

    pub fn set_throw(&mut self, value: Handle) {
        self.throwing = true;
        self.thrown_value = Some(value);
    }

    /// Consumes a pending `continue` so an enclosing loop can start its
    /// next iteration (§4.E "For").
    pub fn clear_continue(&mut self) {
        self.continuing = false;
    }

    /// Consumes a pending `break` once the enclosing loop has stopped.
    pub fn clear_break(&mut self) {
        self.breaking = false;
    }

    /// Consumes a pending exception once a matching `catch` has bound it.
    pub fn clear_throw(&mut self) -> Option<Handle> {
        self.throwing = false;
        self.thrown_value.take()
    }
}

/// A single lexical scope: the bindings visible in it, and the control-flow
/// state currently in flight. A frame is created per function/method
/// invocation, not per block, so every nested block and loop iteration
/// inside one call shares the same frame.
#[derive(Debug, Default)]
pub struct Frame {
    bindings: IndexMap<Rc<str>, Handle>,
    pub state: FrameState,
}

impl Frame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Handle> {
        self.bindings.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Binds `name` to `handle`, incrementing its refcount and decrementing
    /// whatever it shadows (§4.A "assignment transfers ownership").
    pub fn bind(&mut self, heap: &mut Heap, name: Rc<str>, handle: Handle) {
        heap.inc_ref(handle);
        if let Some(old) = self.bindings.insert(name, handle) {
            heap.dec_ref(old);
        }
    }

    /// Iteration order matches insertion order, relied on by GC root
    /// collection and by any future "dump frame" introspection.
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, Handle)> {
        self.bindings.iter().map(|(name, handle)| (name, *handle))
    }

    /// Releases every binding's refcount when the frame goes out of scope
    /// (§4.D "A frame's bindings are released when the call returns").
    pub fn destroy(self, heap: &mut Heap) {
        for (_, handle) in self.bindings {
            heap.dec_ref(handle);
        }
    }

    /// Snapshots, clears, and returns the current control-flow state so a
    /// descriptor call can run in isolation; pair with
    /// [`Frame::restore_state`] (§4.F "descriptor dispatch").
    pub fn save_and_reset_state(&mut self) -> FrameState {
        std::mem::take(&mut self.state)
    }

    pub fn restore_state(&mut self, saved: FrameState) {
        self.state = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{GcLimits, HeapData};

    #[test]
    fn binding_transfers_ownership_from_shadowed_value() {
        let mut heap = Heap::new(GcLimits::default());
        let mut frame = Frame::new();
        let first = heap.allocate(HeapData::Integer(1));
        let second = heap.allocate(HeapData::Integer(2));
        frame.bind(&mut heap, Rc::from("x"), first);
        assert_eq!(heap.refcount(first), 1);
        frame.bind(&mut heap, Rc::from("x"), second);
        assert_eq!(heap.refcount(first), 0);
        assert_eq!(heap.refcount(second), 1);
        assert_eq!(frame.get("x"), Some(second));
    }

    #[test]
    fn state_save_reset_restore_isolates_descriptor_calls() {
        let mut heap = Heap::new(GcLimits::default());
        let mut frame = Frame::new();
        let value = heap.allocate(HeapData::Integer(42));
        frame.state.set_return(value);

        let saved = frame.save_and_reset_state();
        assert!(!frame.state.is_short_circuited());
        frame.state.set_break();
        assert!(frame.state.breaking);

        frame.restore_state(saved);
        assert!(frame.state.returning);
        assert!(!frame.state.breaking);
    }

    #[test]
    fn short_circuit_detection_covers_every_signal() {
        let mut s = FrameState::default();
        assert!(!s.is_short_circuited());
        s.set_continue();
        assert!(s.is_short_circuited());
        assert!(!s.unwinds_past_loop());
    }
}
