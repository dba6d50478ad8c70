//! The garbage collector (§4.B): a byte-budget-guarded tracing sweep layered
//! on top of per-value reference counts.
//!
//! Grounded on `ouros::heap::Heap` (arena of slots, refcount stored beside
//! the payload, `inc_ref`/`dec_ref`/`allocate`), simplified from
//! `AtomicUsize` counters to plain `Cell<usize>` because Hybris's
//! concurrency model is strictly single-threaded — there is never a
//! second thread that could race a refcount update.
//!
//! Every Hybris value (including integers and floats) is a heap handle:
//! `examples/original_source/src/types/class.cpp` allocates
//! even a zero-valued attribute through `gc_new_integer(0)`, and
//! `include/object.h`'s `Object` is one polymorphic heap type for every
//! variant. Modeling `Handle` uniformly makes the alias/reference variant
//! (§3 "Reference/alias") trivial: it is just another heap slot whose
//! payload is `HeapData::Alias(Handle)`.

use std::cell::Cell;

use crate::error::{ErrorKind, HybrisError};

/// Opaque handle to a value living in the heap arena. Cheap to copy and
/// store in frames, vectors, maps, and class attribute tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Handle(u32);

impl Handle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One type-tagged heap payload (§3 "A value is a discriminated union...").
#[derive(Debug, Clone)]
pub enum HeapData {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Char(char),
    String(String),
    /// An opaque byte string handed in/out through the extension ABI.
    Binary(Vec<u8>),
    /// Ordered sequence of owned element handles (§3 "Vector").
    Vector(Vec<Handle>),
    /// Insertion-ordered `(key, value)` pairs; equality is defined by the
    /// key's `compare` vtable slot, not by Rust `Eq` (§3 "Map") — grounded
    /// directly on `vector<Object *> xmap` in
    /// `examples/original_source/include/object.h`: the original
    /// implementation stores maps as a flat vector of pairs too.
    Map(Vec<(Handle, Handle)>),
    /// A native structure template instance (§4.G): a fixed, named set of
    /// fields with no methods or inheritance.
    Structure { template: String, fields: indexmap::IndexMap<String, Handle> },
    /// A class instance (§3 "Class instance", §4.F).
    Instance(crate::class::ClassInstance),
    /// A first-class function value: a script-level `function` declaration
    /// bound into a frame, or a reference to one passed around as data.
    Function(crate::class::FunctionValue),
    /// Pointer-like indirection (§3 "Reference/alias").
    Alias(Handle),
}

impl HeapData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Vector(_) => "vector",
            Self::Map(_) => "map",
            Self::Structure { .. } => "structure",
            Self::Instance(instance) => {
                // Leaked into a 'static str by the class registry at class
                // declaration time so every instance can share one name.
                instance.class_name_static()
            }
            Self::Function(_) => "function",
            Self::Alias(_) => "alias",
        }
    }

    /// Rough byte footprint used to drive the GC threshold (§4.B).
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Self::String(s) => s.len(),
            Self::Binary(b) => b.len(),
            Self::Vector(v) => v.len() * std::mem::size_of::<Handle>(),
            Self::Map(m) => m.len() * 2 * std::mem::size_of::<Handle>(),
            Self::Structure { fields, .. } => fields.len() * std::mem::size_of::<Handle>(),
            Self::Instance(instance) => instance.estimated_size(),
            _ => 0,
        }
    }
}

struct Slot {
    data: Option<HeapData>,
    refcount: Cell<usize>,
    extern_owned: Cell<bool>,
    marked: Cell<bool>,
}

/// Configurable byte-budget threshold for the GC (`--gc=NNN[K|M]`, §6).
#[derive(Debug, Clone, Copy)]
pub struct GcLimits {
    pub threshold_bytes: usize,
}

impl Default for GcLimits {
    fn default() -> Self {
        // Matches the stock Hybris interpreter's default threshold.
        Self { threshold_bytes: 1024 * 1024 }
    }
}

impl GcLimits {
    /// Parses the `--gc` CLI argument: a plain integer, or one suffixed with
    /// `K`/`M` (case-insensitive) for kibibytes/mebibytes.
    pub fn parse(raw: &str) -> Result<Self, HybrisError> {
        let (digits, multiplier) = match raw.chars().last() {
            Some(c @ ('K' | 'k')) => (&raw[..raw.len() - c.len_utf8()], 1024),
            Some(c @ ('M' | 'm')) => (&raw[..raw.len() - c.len_utf8()], 1024 * 1024),
            _ => (raw, 1),
        };
        let value: usize = digits
            .parse()
            .map_err(|_| HybrisError::new(ErrorKind::Generic, format!("invalid --gc argument '{raw}'")))?;
        Ok(Self { threshold_bytes: value * multiplier })
    }
}

/// Live-object counters surfaced for diagnostics and the `gc_collect()`
/// builtin's return value.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub collections: usize,
    pub freed_last_collection: usize,
    pub live_objects: usize,
}

/// The heap arena: a vector of slots indexed by [`Handle`], a free list for
/// reuse, a live-byte counter, and a pin stack for the "extern pool"
/// (§4.B: "values currently in-flight through a native-function call").
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live_bytes: usize,
    limits: GcLimits,
    pinned: Vec<Handle>,
    stats: GcStats,
}

impl Heap {
    #[must_use]
    pub fn new(limits: GcLimits) -> Self {
        Self { slots: Vec::new(), free_list: Vec::new(), live_bytes: 0, limits, pinned: Vec::new(), stats: GcStats::default() }
    }

    #[must_use]
    pub fn stats(&self) -> GcStats {
        GcStats { live_objects: self.slots.iter().filter(|s| s.data.is_some()).count(), ..self.stats }
    }

    /// `gc_new_<kind>` factory (§3 "Lifecycles"): registers a new value with
    /// the GC and returns a handle with refcount zero.
    pub fn allocate(&mut self, data: HeapData) -> Handle {
        self.live_bytes += data.estimated_size();
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            slot.refcount.set(0);
            slot.extern_owned.set(false);
            slot.marked.set(false);
            Handle(index)
        } else {
            let index = u32::try_from(self.slots.len()).expect("heap exhausted");
            self.slots.push(Slot { data: Some(data), refcount: Cell::new(0), extern_owned: Cell::new(false), marked: Cell::new(false) });
            Handle(index)
        }
    }

    fn slot(&self, handle: Handle) -> &Slot {
        self.slots.get(handle.index()).filter(|s| s.data.is_some()).expect("dangling heap handle")
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> &HeapData {
        self.slot(handle).data.as_ref().expect("dangling heap handle")
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut HeapData {
        self.slots[handle.index()].data.as_mut().expect("dangling heap handle")
    }

    #[must_use]
    pub fn refcount(&self, handle: Handle) -> usize {
        self.slot(handle).refcount.get()
    }

    #[must_use]
    pub fn is_extern_owned(&self, handle: Handle) -> bool {
        self.slot(handle).extern_owned.get()
    }

    pub fn set_extern_owned(&self, handle: Handle, owned: bool) {
        self.slot(handle).extern_owned.set(owned);
    }

    /// `ob_set_references(v, delta)` (§4.A): the sole entry point for
    /// refcount mutation. Recurses into children for containers and class
    /// attributes so nested structures stay consistent.
    pub fn set_references(&mut self, handle: Handle, delta: i64) {
        let count = self.slot(handle).refcount.get();
        let updated = count.saturating_add_signed(delta as isize);
        self.slot(handle).refcount.set(updated);

        let children = self.child_handles(handle);
        for child in children {
            self.set_references(child, delta);
        }
    }

    pub fn inc_ref(&mut self, handle: Handle) {
        self.set_references(handle, 1);
    }

    pub fn dec_ref(&mut self, handle: Handle) {
        self.set_references(handle, -1);
    }

    fn child_handles(&self, handle: Handle) -> Vec<Handle> {
        match self.get(handle) {
            HeapData::Vector(items) => items.clone(),
            HeapData::Map(pairs) => pairs.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            HeapData::Structure { fields, .. } => fields.values().copied().collect(),
            HeapData::Instance(instance) => instance.child_handles(),
            HeapData::Alias(target) => vec![*target],
            _ => Vec::new(),
        }
    }

    /// Pins a value across an operation that could otherwise release it
    /// (§4.B `pool`), e.g. while a native function call is in flight.
    pub fn pool(&mut self, handle: Handle) {
        self.pinned.push(handle);
    }

    /// Releases the most recent pin. Pins nest like a stack so scoped
    /// acquisition (§5) holds even across early-return exceptions, provided
    /// callers always pair `pool`/`depool` in a `finally`-equivalent.
    pub fn depool(&mut self) {
        self.pinned.pop();
    }

    /// Mark phase of the collector (§4.B): traces every handle reachable
    /// from `roots` (plus the pin stack and any `extern_owned` value) and
    /// returns the handles found unreachable — the set that [`Heap::sweep`]
    /// will actually free. Split from the sweep so callers can run a
    /// finalizer (`__expire`, §4.F) on each doomed instance before its slot
    /// is torn down, matching `class_free` in
    /// `examples/original_source/src/types/class.cpp` running the
    /// destructor descriptor before freeing the attribute table.
    ///
    /// Reachability alone decides doom, not refcount: `set_references`
    /// cascades a bind/unbind delta into every current child (matching
    /// `vector_set_references`/`class_set_references` in the original C++),
    /// so two instances holding back-references to each other never settle
    /// at refcount zero even after every external binding to them is
    /// dropped. Gating the free on `refcount == 0` as well would leave such
    /// cycles permanently unreachable-but-allocated, defeating the mark
    /// pass the GC exists to run. `extern_owned` values and anything on the
    /// pin stack are protected by being seeded into the mark worklist as
    /// roots, so they stay marked (and therefore alive) regardless of this.
    pub fn mark_doomed(&mut self, roots: impl IntoIterator<Item = Handle>) -> Vec<Handle> {
        for slot in &self.slots {
            slot.marked.set(false);
        }

        let mut worklist: Vec<Handle> = roots.into_iter().collect();
        worklist.extend(self.pinned.iter().copied());
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.data.is_some() && slot.extern_owned.get() {
                worklist.push(Handle(u32::try_from(index).unwrap()));
            }
        }

        while let Some(handle) = worklist.pop() {
            let slot = &self.slots[handle.index()];
            if slot.data.is_none() || slot.marked.get() {
                continue;
            }
            slot.marked.set(true);
            worklist.extend(self.child_handles(handle));
        }

        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.data.is_some() && !slot.marked.get())
            .map(|(index, _)| Handle(u32::try_from(index).unwrap()))
            .collect()
    }

    /// Sweep phase: frees every slot in `doomed` (as produced by
    /// [`Heap::mark_doomed`]). Safe to call with a stale/partially-expired
    /// list, since freeing is idempotent for already-empty slots.
    pub fn sweep(&mut self, doomed: &[Handle]) -> usize {
        let mut freed = 0;
        for handle in doomed {
            let slot = &mut self.slots[handle.index()];
            if slot.data.is_none() {
                continue;
            }
            self.live_bytes = self.live_bytes.saturating_sub(slot.data.as_ref().map_or(0, HeapData::estimated_size));
            slot.data = None;
            self.free_list.push(handle.0);
            freed += 1;
        }
        self.stats.collections += 1;
        self.stats.freed_last_collection = freed;
        freed
    }

    /// Runs mark then sweep back to back with no finalizer pass in
    /// between; used by tests and by embedders that know their value
    /// graph contains no `__expire`-declaring instances.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Handle>) -> usize {
        let doomed = self.mark_doomed(roots);
        self.sweep(&doomed)
    }

    /// Whether the live-byte counter has crossed the configured threshold,
    /// i.e. the next safe point (§4.B) should trigger a sweep.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.live_bytes >= self.limits.threshold_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_limits_parses_suffixes() {
        assert_eq!(GcLimits::parse("1024").unwrap().threshold_bytes, 1024);
        assert_eq!(GcLimits::parse("4K").unwrap().threshold_bytes, 4096);
        assert_eq!(GcLimits::parse("2M").unwrap().threshold_bytes, 2 * 1024 * 1024);
        assert!(GcLimits::parse("nope").is_err());
    }

    #[test]
    fn allocation_starts_at_refcount_zero() {
        let mut heap = Heap::new(GcLimits::default());
        let h = heap.allocate(HeapData::Integer(42));
        assert_eq!(heap.refcount(h), 0);
        heap.inc_ref(h);
        assert_eq!(heap.refcount(h), 1);
    }

    #[test]
    fn sweep_frees_unreachable_values() {
        let mut heap = Heap::new(GcLimits::default());
        let orphan = heap.allocate(HeapData::Integer(1));
        let root = heap.allocate(HeapData::Integer(2));
        heap.inc_ref(root);
        let freed = heap.collect([root]);
        assert_eq!(freed, 1);
        assert!(heap.slots[orphan.index()].data.is_none());
        assert!(heap.slots[root.index()].data.is_some());
    }

    #[test]
    fn cycle_is_reclaimed_once_unreachable() {
        let mut heap = Heap::new(GcLimits::default());
        let a = heap.allocate(HeapData::Vector(Vec::new()));
        let b = heap.allocate(HeapData::Vector(vec![a]));
        heap.set_references(a, 1);
        *heap.get_mut(a) = HeapData::Vector(vec![b]);
        heap.set_references(b, 1);
        // Both are referenced only by each other; no GC roots point at them.
        let freed = heap.collect([]);
        assert_eq!(freed, 2);
    }

    #[test]
    fn extern_owned_values_survive_sweep_even_unreferenced() {
        let mut heap = Heap::new(GcLimits::default());
        let h = heap.allocate(HeapData::Integer(7));
        heap.set_extern_owned(h, true);
        let freed = heap.collect([]);
        assert_eq!(freed, 0);
        assert!(heap.slots[h.index()].data.is_some());
    }
}
