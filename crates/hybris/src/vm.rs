//! The interpreter instance: heap, call stack, class/native registries, and
//! the ambient collaborators (tracer, print sink, resource limits) tied
//! together in one place.
//!
//! There is no single `Vm`-shaped type to port line-for-line — `ouros`'s
//! equivalent state is spread across a `Session`/`VmState` pair plumbed
//! through `ouros::run`. This module follows that repo's general shape (one
//! struct owning the heap, the registries, and the `dyn Tracer`/
//! `dyn PrintWriter` trait objects) rather than any single file.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::SourcePos;
use crate::class::ClassObject;
use crate::error::{HybrisError, TraceEntry};
use crate::frame::{Frame, FrameState};
use crate::heap::{GcLimits, Handle, Heap, HeapData};
use crate::io::{PrintWriter, StdPrint};
use crate::tracer::{NoopTracer, Tracer};

/// Signature every native (extension-ABI) function must implement (§4.G).
pub type NativeFn = Box<dyn Fn(&mut Vm, &[Handle]) -> Result<Handle, HybrisError>>;

/// A structure template: a named, fixed-shape record with no methods or
/// inheritance (§4.G "Structures").
#[derive(Debug, Clone)]
pub struct StructureTemplate {
    pub field_order: Vec<String>,
}

/// Ties the heap, the frame stack, and every registry the evaluator
/// consults together. One `Vm` is one independent interpreter instance;
/// nothing here is process-global.
pub struct Vm {
    pub heap: Heap,
    pub globals: Frame,
    /// Every frame currently on the call stack, innermost last. Doubles as
    /// the GC's transient-root source (§4.B): anything bound in any of
    /// these frames, or pending in their `FrameState`, is reachable.
    call_stack: Vec<Frame>,
    pub classes: IndexMap<String, Rc<ClassObject>>,
    pub structures: IndexMap<String, StructureTemplate>,
    pub natives: IndexMap<String, NativeFn>,
    pub constants: IndexMap<String, Handle>,
    trace: Vec<TraceEntry>,
    pub tracer: Box<dyn Tracer>,
    pub print: Box<dyn PrintWriter>,
}

impl Vm {
    #[must_use]
    pub fn new(limits: GcLimits) -> Self {
        Self {
            heap: Heap::new(limits),
            globals: Frame::new(),
            call_stack: Vec::new(),
            classes: IndexMap::new(),
            structures: IndexMap::new(),
            natives: IndexMap::new(),
            constants: IndexMap::new(),
            trace: Vec::new(),
            tracer: Box::new(NoopTracer),
            print: Box::new(StdPrint),
        }
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Box<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_print(mut self, print: Box<dyn PrintWriter>) -> Self {
        self.print = print;
        self
    }

    /// The innermost active frame, or the global frame if no call is in
    /// flight (§4.D "top-level code executes in the global frame").
    pub fn current_frame(&mut self) -> &mut Frame {
        self.call_stack.last_mut().unwrap_or(&mut self.globals)
    }

    pub fn push_frame(&mut self, function_name: &str, pos: SourcePos) {
        self.call_stack.push(Frame::new());
        self.trace.push(TraceEntry { function_name: function_name.to_string(), pos });
        self.tracer.on_call(function_name, pos);
    }

    /// Pops the innermost frame, releasing its bindings, and returns the
    /// trace entry that was active for it.
    pub fn pop_frame(&mut self) -> Option<TraceEntry> {
        if let Some(frame) = self.call_stack.pop() {
            frame.destroy(&mut self.heap);
        }
        let entry = self.trace.pop();
        if let Some(entry) = &entry {
            self.tracer.on_return(&entry.function_name);
        }
        entry
    }

    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.trace.clone()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Sets the innermost frame's state to "throwing", allocating the error
    /// message as a Hybris string so scripts can catch and inspect it
    /// (§4.H "script exceptions are values, not Rust errors").
    pub fn raise(&mut self, message: impl Into<String>, pos: SourcePos) -> Handle {
        let message = message.into();
        self.tracer.on_exception(&message, pos);
        let value = self.heap.allocate(HeapData::String(message));
        self.current_frame().state.set_throw(value);
        value
    }

    /// Roots for the GC sweep (§4.B): everything bound in the global frame
    /// or any active call-stack frame, plus anything a `FrameState` is
    /// currently holding onto (an in-flight return/thrown value that
    /// hasn't been rebound into a caller's frame yet).
    fn roots(&self) -> Vec<Handle> {
        let mut roots: Vec<Handle> = self.globals.iter().map(|(_, h)| h).collect();
        roots.extend(state_roots(&self.globals.state));
        for frame in &self.call_stack {
            roots.extend(frame.iter().map(|(_, h)| h));
            roots.extend(state_roots(&frame.state));
        }
        roots.extend(self.constants.values().copied());
        roots
    }

    /// Runs a mark-sweep collection now, regardless of the byte-budget
    /// threshold. Exposed to the `gc_collect()` builtin (§4.B). Instances
    /// doomed by the mark phase get their `__expire` descriptor (§4.F)
    /// invoked before their slot is actually freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.roots();
        let doomed = self.heap.mark_doomed(roots);

        let expiring: Vec<Handle> = doomed
            .iter()
            .copied()
            .filter(|h| matches!(self.heap.get(*h), HeapData::Instance(_)))
            .collect();
        if !expiring.is_empty() {
            let node = crate::ast::Node::new(crate::ast::NodeKind::Call, SourcePos::default());
            for handle in expiring {
                let has_expire = match self.heap.get(handle) {
                    HeapData::Instance(instance) => instance.class.has_method(crate::class::descriptors::EXPIRE),
                    _ => false,
                };
                if has_expire {
                    // A finalizer that resurrects itself by stashing `me`
                    // into a still-reachable root would need a re-mark pass
                    // to survive; Hybris does not support that (§4.F "an
                    // instance cannot outlive its own `__expire` call").
                    let outcome = crate::eval::call_descriptor(self, handle, crate::class::descriptors::EXPIRE, &[], &node);
                    // §7 "The `__expire` destructor is best-effort; exceptions
                    // it raises are logged and swallowed to avoid cascading
                    // teardown failures" — neither an internal `Err` nor a
                    // script-level `throw` from the destructor may leak into
                    // whatever frame happened to be current when the sweep
                    // ran (`gc_collect()`/a statement-boundary safe point).
                    match outcome {
                        Ok(_) => {}
                        Err(err) => self.tracer.on_exception(&err.message, err.pos.unwrap_or_default()),
                    }
                    if let Some(thrown) = self.current_frame().state.clear_throw() {
                        let message = crate::ops::to_display_string(&self.heap, thrown);
                        self.tracer.on_exception(&format!("__expire raised: {message}"), SourcePos::default());
                    }
                }
            }
        }

        let freed = self.heap.sweep(&doomed);
        self.tracer.on_gc_collect(freed, self.heap.stats().live_objects);
        freed
    }

    /// Called at every statement-boundary safe point (§4.B "safe points
    /// are statement boundaries; the interpreter never collects mid-
    /// expression"). A no-op unless the byte-budget threshold has been
    /// crossed.
    pub fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }
}

fn state_roots(state: &FrameState) -> impl Iterator<Item = Handle> + '_ {
    state.return_value.into_iter().chain(state.thrown_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushing_and_popping_frames_tracks_trace_depth() {
        let mut vm = Vm::new(GcLimits::default());
        assert_eq!(vm.call_depth(), 0);
        vm.push_frame("f", SourcePos::default());
        assert_eq!(vm.call_depth(), 1);
        let entry = vm.pop_frame().unwrap();
        assert_eq!(entry.function_name, "f");
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn raise_marks_current_frame_as_throwing() {
        let mut vm = Vm::new(GcLimits::default());
        vm.raise("boom", SourcePos::default());
        assert!(vm.current_frame().state.throwing);
    }

    #[test]
    fn global_bindings_are_collection_roots() {
        let mut vm = Vm::new(GcLimits::default());
        let value = vm.heap.allocate(HeapData::Integer(1));
        vm.globals.bind(&mut vm.heap, Rc::from("x"), value);
        let freed = vm.collect_garbage();
        assert_eq!(freed, 0);
    }
}
