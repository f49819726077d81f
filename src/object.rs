//! The AML object model: tagged runtime values stored in an arena of
//! reference-counted slots.
//!
//! Objects reference each other by [`ObjectHandle`] (a stable arena index)
//! rather than by pointer, so reference cycles created by bytecode cannot
//! dangle; what counting alone cannot reclaim, the mark phase
//! ([`ObjectStore::sweep_unreachable`]) frees when a table is unloaded, and
//! tearing the interpreter down drops the whole arena. Reference chains
//! (`Reference` objects pointing at other objects) are reference-counted in
//! lockstep, the way the chain owners see them: taking a strong reference to
//! the head of a chain takes one on every link below it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AmlError, Result};
use crate::field::{BufferField, FieldUnit};
use crate::namespace::NodeHandle;
use crate::opregion::OpRegion;
use crate::sync::{EventId, MutexId};

/// Stable index of an object inside the interpreter's [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(u32);

/// What a `Reference` object points through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Result of a `RefOf`/`Index` expression stored into an object.
    RefOf,
    /// Reference to a method local.
    Local,
    /// Reference to a method argument.
    Arg,
    /// Reference to a named object.
    Named,
}

/// Discriminant of an [`Object`], usable in type masks and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[repr(u8)]
pub enum ObjectType {
    Uninitialized = 0,
    Integer = 1,
    String = 2,
    Buffer = 3,
    Package = 4,
    FieldUnit = 5,
    Device = 6,
    Event = 7,
    Method = 8,
    Mutex = 9,
    OperationRegion = 10,
    PowerResource = 11,
    Processor = 12,
    ThermalZone = 13,
    BufferField = 14,
    Debug = 16,
    Reference = 20,
    BufferIndex = 21,
}

/// Body of a control method.
#[derive(Debug, Clone)]
pub struct Method {
    /// Table image the bytecode lives in.
    pub image: Arc<[u8]>,
    /// Offset of the first body byte within `image`.
    pub start: u32,
    /// Body length in bytes.
    pub len: u32,
    /// Declared argument count (0..=7).
    pub args: u8,
    /// Whether the method may not run concurrently with itself.
    pub serialized: bool,
    /// Sync level acquired while a serialized method runs.
    pub sync_level: u8,
    /// Lazily created serialization mutex.
    pub mutex: Option<MutexId>,
    /// Native override: evaluated in-process instead of pushing a frame.
    pub native: Option<NativeMethod>,
}

/// A method implemented by the interpreter itself (e.g. `_OSI`).
pub type NativeMethod = fn(&mut ObjectStore, &[ObjectHandle]) -> Result<Object>;

/// A discriminated union over every runtime value AML can produce.
#[derive(Debug, Clone)]
pub enum Object {
    /// Initial state of a fresh local, argument, or named node.
    Uninitialized,
    /// 64-bit unsigned integer (32-bit when the DSDT declares revision < 2).
    Integer(u64),
    /// Byte string; the trailing NUL of the AML encoding is not stored.
    String(Vec<u8>),
    /// Raw bytes.
    Buffer(Vec<u8>),
    /// Ordered, heterogeneous sequence of object references.
    Package(Vec<ObjectHandle>),
    /// Pointer to another object plus a kind tag.
    Reference {
        /// How stores through this reference behave.
        kind: RefKind,
        /// The referenced object.
        inner: ObjectHandle,
    },
    /// Byte-wise index into a buffer or string object.
    BufferIndex {
        /// The indexed buffer object.
        buffer: ObjectHandle,
        /// Byte position.
        index: usize,
    },
    /// Sub-bit-string view of a buffer.
    BufferField(BufferField),
    /// A named window into an operation region.
    FieldUnit(FieldUnit),
    /// A control method.
    Method(Method),
    /// An AML mutex.
    Mutex(MutexId),
    /// An AML event.
    Event(EventId),
    /// A named window into an address space.
    OpRegion(OpRegion),
    /// Device container.
    Device,
    /// Legacy processor container.
    Processor {
        /// Processor id.
        id: u8,
        /// Processor block address.
        block_address: u32,
        /// Processor block length.
        block_length: u8,
    },
    /// Thermal-zone container.
    ThermalZone,
    /// Power-resource container.
    PowerResource {
        /// Lowest sleep state keeping the resource on.
        system_level: u8,
        /// Relative ordering for on/off sequencing.
        resource_order: u16,
    },
    /// The debug output sink; stores to it log.
    Debug,
}

impl Object {
    /// The discriminant of this value.
    pub fn type_of(&self) -> ObjectType {
        match self {
            Object::Uninitialized => ObjectType::Uninitialized,
            Object::Integer(_) => ObjectType::Integer,
            Object::String(_) => ObjectType::String,
            Object::Buffer(_) => ObjectType::Buffer,
            Object::Package(_) => ObjectType::Package,
            Object::Reference { .. } => ObjectType::Reference,
            Object::BufferIndex { .. } => ObjectType::BufferIndex,
            Object::BufferField(_) => ObjectType::BufferField,
            Object::FieldUnit(_) => ObjectType::FieldUnit,
            Object::Method(_) => ObjectType::Method,
            Object::Mutex(_) => ObjectType::Mutex,
            Object::Event(_) => ObjectType::Event,
            Object::OpRegion(_) => ObjectType::OperationRegion,
            Object::Device => ObjectType::Device,
            Object::Processor { .. } => ObjectType::Processor,
            Object::ThermalZone => ObjectType::ThermalZone,
            Object::PowerResource { .. } => ObjectType::PowerResource,
            Object::Debug => ObjectType::Debug,
        }
    }

    /// The integer payload, or a type error.
    pub fn as_integer(&self) -> Result<u64> {
        match self {
            Object::Integer(v) => Ok(*v),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }
}

/// What to do when reference counting goes provably wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefcountPolicy {
    /// Pin the whole chain and leak it, keeping the interpreter alive.
    #[default]
    Leak,
    /// Panic immediately. Useful when qualifying firmware in a test rig.
    Panic,
}

/// A refcount pinned at this value marks a deliberately leaked object.
const BUGGED_REFCOUNT: u32 = u32::MAX;

enum Slot {
    Free,
    Used { refs: u32, object: Object },
}

/// Arena of reference-counted objects.
pub struct ObjectStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    policy: RefcountPolicy,
    /// Namespace references released by freed objects, pending a drain by
    /// the interpreter (the store cannot reach the namespace itself).
    dropped_node_refs: Vec<NodeHandle>,
}

impl ObjectStore {
    /// An empty store with the given mismanagement policy.
    pub fn new(policy: RefcountPolicy) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            policy,
            dropped_node_refs: Vec::new(),
        }
    }

    /// Node references released by freed field units since the last drain.
    pub fn take_dropped_node_refs(&mut self) -> Vec<NodeHandle> {
        std::mem::take(&mut self.dropped_node_refs)
    }

    /// Allocate a slot holding `object` with one strong reference.
    pub fn alloc(&mut self, object: Object) -> ObjectHandle {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Slot::Used { refs: 1, object };
                ObjectHandle(idx)
            }
            None => {
                self.slots.push(Slot::Used { refs: 1, object });
                ObjectHandle((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Borrow the object at `handle`.
    pub fn get(&self, handle: ObjectHandle) -> &Object {
        match &self.slots[handle.0 as usize] {
            Slot::Used { object, .. } => object,
            Slot::Free => unreachable!("stale object handle {handle:?}"),
        }
    }

    /// Mutably borrow the object at `handle`.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> &mut Object {
        match &mut self.slots[handle.0 as usize] {
            Slot::Used { object, .. } => object,
            Slot::Free => unreachable!("stale object handle {handle:?}"),
        }
    }

    /// The type of the object at `handle`.
    pub fn type_of(&self, handle: ObjectHandle) -> ObjectType {
        self.get(handle).type_of()
    }

    /// Current strong count of `handle`.
    pub fn refcount(&self, handle: ObjectHandle) -> u32 {
        match &self.slots[handle.0 as usize] {
            Slot::Used { refs, .. } => *refs,
            Slot::Free => 0,
        }
    }

    fn refs_mut(&mut self, idx: u32) -> Option<&mut u32> {
        match &mut self.slots[idx as usize] {
            Slot::Used { refs, .. } => Some(refs),
            Slot::Free => None,
        }
    }

    fn chain_next(&self, handle: ObjectHandle) -> Option<ObjectHandle> {
        match self.get(handle) {
            Object::Reference { inner, .. } => Some(*inner),
            _ => None,
        }
    }

    fn is_bugged(&mut self, handle: ObjectHandle) -> bool {
        let refs = self.refs_mut(handle.0).expect("live chain link");
        if *refs == 0 {
            *refs = BUGGED_REFCOUNT;
        }
        *refs == BUGGED_REFCOUNT
    }

    fn make_chain_bugged(&mut self, head: ObjectHandle) {
        match self.policy {
            RefcountPolicy::Panic => panic!("object refcount bug at {head:?}"),
            RefcountPolicy::Leak => {
                warn!(?head, "object refcount bug, pinning chain as leaked");
            }
        }

        let mut cur = Some(head);
        while let Some(handle) = cur {
            cur = self.chain_next(handle);
            if let Some(refs) = self.refs_mut(handle.0) {
                *refs = BUGGED_REFCOUNT;
            }
        }
    }

    /// Take a strong reference on `handle` and every reference-chain link
    /// below it.
    pub fn ref_(&mut self, handle: ObjectHandle) {
        let mut cur = Some(handle);
        while let Some(h) = cur {
            if self.is_bugged(h) {
                self.make_chain_bugged(handle);
                return;
            }
            *self.refs_mut(h.0).expect("live chain link") += 1;
            cur = self.chain_next(h);
        }
    }

    /// Drop a strong reference on `handle` and every reference-chain link
    /// below it, freeing links whose count reaches zero.
    ///
    /// A link whose count is observed *below* its parent's proves the chain
    /// was mismanaged; the whole chain is handled per [`RefcountPolicy`]
    /// instead of risking a double free.
    pub fn unref(&mut self, handle: ObjectHandle) {
        let mut parent_refs = self.refcount(handle);
        let mut cur = Some(handle);

        while let Some(h) = cur {
            if self.is_bugged(h) {
                self.make_chain_bugged(handle);
                return;
            }
            let refs = self.refs_mut(h.0).expect("live chain link");
            if *refs < parent_refs {
                self.make_chain_bugged(handle);
                return;
            }
            parent_refs = *refs;
            *refs -= 1;
            cur = self.chain_next(h);
        }

        if self.refcount(handle) == 0 {
            self.free_chain(handle);
        }
    }

    fn free_chain(&mut self, head: ObjectHandle) {
        let mut cur = Some(head);
        while let Some(handle) = cur {
            cur = self.chain_next(handle);
            if self.refcount(handle) == 0 {
                self.free_slot(handle);
            }
        }
    }

    /// Release the slot. Children of non-reference objects lose one strong
    /// reference each; a reference's inner link was already decremented by
    /// the chain walk in [`unref`](Self::unref).
    fn free_slot(&mut self, handle: ObjectHandle) {
        let object = match std::mem::replace(&mut self.slots[handle.0 as usize], Slot::Free) {
            Slot::Used { object, .. } => object,
            Slot::Free => return,
        };
        self.free.push(handle.0);

        if let Object::FieldUnit(field) = &object {
            self.dropped_node_refs.extend(field.node_children());
        }
        for child in children_of(&object) {
            self.unref(child);
        }
    }

    /// Replace the value at `handle`, releasing the old value's children.
    pub fn replace(&mut self, handle: ObjectHandle, object: Object) {
        let old = std::mem::replace(self.get_mut(handle), object);
        if let Object::Reference { inner, .. } = old {
            self.unref(inner);
            return;
        }
        if let Object::FieldUnit(field) = &old {
            self.dropped_node_refs.extend(field.node_children());
        }
        for child in children_of(&old) {
            self.unref(child);
        }
    }

    /// Strip reference wrappers until a non-reference object is reached.
    pub fn unwind(&self, mut handle: ObjectHandle) -> ObjectHandle {
        while let Object::Reference { inner, .. } = self.get(handle) {
            handle = *inner;
        }
        handle
    }

    /// Interpreter-internal flattening: strip one level per link unless the
    /// link is a `RefOf` reference.
    pub fn deref_internal(&self, mut handle: ObjectHandle) -> ObjectHandle {
        loop {
            match self.get(handle) {
                Object::Reference { kind, inner } if *kind != RefKind::RefOf => handle = *inner,
                _ => return handle,
            }
        }
    }

    /// Operand-read flattening: a `Named` reference (or one whose inner is
    /// not itself a reference) dereferences one level, anything else unwinds
    /// to the bottom of the chain.
    pub fn deref_implicit(&self, handle: ObjectHandle) -> ObjectHandle {
        match self.get(handle) {
            Object::Reference { kind, inner } => {
                if *kind != RefKind::RefOf {
                    if *kind == RefKind::Named
                        || !matches!(self.get(*inner), Object::Reference { .. })
                    {
                        return *inner;
                    }
                    return self.unwind(*inner);
                }
                self.unwind(handle)
            }
            _ => handle,
        }
    }

    /// Deep-clone the value at `src` into a fresh [`Object`]. Data payloads
    /// are duplicated; identity-bearing payloads (methods, mutexes, events,
    /// regions, field units) share their underlying entity, and a reference
    /// clone shares its chain.
    pub fn clone_deep(&mut self, src: ObjectHandle) -> Object {
        match self.get(src).clone() {
            Object::Package(elements) => {
                let copies = elements
                    .iter()
                    .map(|&e| {
                        let value = self.clone_deep(e);
                        self.alloc(value)
                    })
                    .collect();
                Object::Package(copies)
            }
            Object::Reference { kind, inner } => {
                self.ref_(inner);
                Object::Reference { kind, inner }
            }
            other => {
                for child in children_of(&other) {
                    self.ref_(child);
                }
                other
            }
        }
    }

    /// Shallow-clone the value at `src`: the variant is copied, children are
    /// shared.
    pub fn clone_shallow(&mut self, src: ObjectHandle) -> Object {
        let object = self.get(src).clone();
        if let Object::Reference { inner, .. } = &object {
            self.ref_(*inner);
            return object;
        }
        for child in children_of(&object) {
            self.ref_(child);
        }
        object
    }

    /// Overwrite `dst` with a deep copy of `src`.
    pub fn assign_deep(&mut self, dst: ObjectHandle, src: ObjectHandle) {
        let value = self.clone_deep(src);
        self.replace(dst, value);
    }

    /// Overwrite `dst` with a shallow copy of `src`.
    pub fn assign_shallow(&mut self, dst: ObjectHandle, src: ObjectHandle) {
        let value = self.clone_shallow(src);
        self.replace(dst, value);
    }

    /// The raw storage bytes of a data object, as seen by implicit casts:
    /// integers expose their revision-sized little-endian bytes, strings and
    /// buffers their contents. References have no storage.
    pub fn storage_bytes(&self, handle: ObjectHandle, int_bytes: usize) -> Result<Vec<u8>> {
        match self.get(handle) {
            Object::Integer(v) => Ok(v.to_le_bytes()[..int_bytes].to_vec()),
            Object::String(bytes) | Object::Buffer(bytes) => Ok(bytes.clone()),
            Object::Reference { .. } => Err(AmlError::InvalidArgument),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Store `src` into `dst` preserving `dst`'s type and storage size:
    /// source bytes are truncated or zero-padded to fit. This is what the
    /// specification calls an implicit cast; in substance it is a buffer
    /// copy, matching the NT interpreter.
    pub fn assign_implicit_cast(
        &mut self,
        dst: ObjectHandle,
        src: ObjectHandle,
        int_bytes: usize,
    ) -> Result<()> {
        let src_bytes = self.storage_bytes(src, int_bytes)?;

        match self.get_mut(dst) {
            Object::Integer(v) => {
                let mut raw = [0u8; 8];
                let n = src_bytes.len().min(int_bytes);
                raw[..n].copy_from_slice(&src_bytes[..n]);
                *v = u64::from_le_bytes(raw);
            }
            Object::String(bytes) | Object::Buffer(bytes) => {
                let n = src_bytes.len().min(bytes.len());
                bytes[..n].copy_from_slice(&src_bytes[..n]);
                bytes[n..].fill(0);
            }
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        }

        Ok(())
    }

    /// Mark everything reachable from `roots`, then free every unreachable
    /// slot — including reference cycles that plain counting cannot
    /// reclaim. Survivors referenced by dead objects lose the dead owners'
    /// shares. Returns the number of slots freed.
    ///
    /// Runs when a table is unloaded; a torn-down interpreter reclaims the
    /// whole arena wholesale instead.
    pub fn sweep_unreachable(&mut self, roots: &[ObjectHandle]) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut stack: Vec<u32> = roots.iter().map(|h| h.0).collect();

        while let Some(idx) = stack.pop() {
            if marked[idx as usize] {
                continue;
            }
            let Slot::Used { object, .. } = &self.slots[idx as usize] else {
                continue;
            };
            marked[idx as usize] = true;

            if let Object::Reference { inner, .. } = object {
                stack.push(inner.0);
            }
            for child in children_of(object) {
                stack.push(child.0);
            }
        }

        let mut freed = 0;
        let mut survivor_shares: Vec<ObjectHandle> = Vec::new();

        for idx in 0..self.slots.len() {
            if marked[idx] {
                continue;
            }
            let Slot::Used { object, .. } = std::mem::replace(&mut self.slots[idx], Slot::Free)
            else {
                continue;
            };
            self.free.push(idx as u32);
            freed += 1;

            if let Object::FieldUnit(field) = &object {
                self.dropped_node_refs.extend(field.node_children());
            }
            if let Object::Reference { inner, .. } = &object {
                if marked[inner.0 as usize] {
                    survivor_shares.push(*inner);
                }
            }
            for child in children_of(&object) {
                if marked[child.0 as usize] {
                    survivor_shares.push(child);
                }
            }
        }

        for child in survivor_shares {
            self.unref(child);
        }

        if freed > 0 {
            debug!(freed, "swept unreachable objects");
        }
        freed
    }

    /// Number of live (non-free, non-leaked) slots. Diagnostic.
    pub fn live_objects(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Used { refs, .. } if *refs != BUGGED_REFCOUNT))
            .count()
    }
}

/// Child handles owned by `object`, excluding the inner link of a reference
/// (chains are managed by the chain walks, not by slot release).
fn children_of(object: &Object) -> Vec<ObjectHandle> {
    match object {
        Object::Package(elements) => elements.clone(),
        Object::BufferIndex { buffer, .. } => vec![*buffer],
        Object::BufferField(field) => vec![field.buffer],
        Object::FieldUnit(field) => field.object_children(),
        _ => Vec::new(),
    }
}

/// An owned, interpreter-independent rendition of a data object: what
/// [`eval`](crate::interpreter::Interpreter::eval) consumes and produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The method ran but produced nothing usable.
    Uninitialized,
    /// Integer value.
    Integer(u64),
    /// String value.
    String(String),
    /// Buffer value.
    Buffer(Vec<u8>),
    /// Package of nested values.
    Package(Vec<Value>),
}

impl Value {
    /// The object type this value externalizes.
    pub fn type_of(&self) -> ObjectType {
        match self {
            Value::Uninitialized => ObjectType::Uninitialized,
            Value::Integer(_) => ObjectType::Integer,
            Value::String(_) => ObjectType::String,
            Value::Buffer(_) => ObjectType::Buffer,
            Value::Package(_) => ObjectType::Package,
        }
    }

    /// Build an object tree for this value inside `store`.
    pub fn import(&self, store: &mut ObjectStore) -> ObjectHandle {
        let object = match self {
            Value::Uninitialized => Object::Uninitialized,
            Value::Integer(v) => Object::Integer(*v),
            Value::String(s) => Object::String(s.as_bytes().to_vec()),
            Value::Buffer(b) => Object::Buffer(b.clone()),
            Value::Package(elements) => {
                let handles = elements.iter().map(|e| e.import(store)).collect();
                Object::Package(handles)
            }
        };
        store.alloc(object)
    }

    /// Externalize the data object at `handle`.
    pub fn export(store: &ObjectStore, handle: ObjectHandle) -> Result<Value> {
        let handle = store.unwind(handle);
        match store.get(handle) {
            Object::Uninitialized => Ok(Value::Uninitialized),
            Object::Integer(v) => Ok(Value::Integer(*v)),
            Object::String(bytes) => Ok(Value::String(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            Object::Buffer(bytes) => Ok(Value::Buffer(bytes.clone())),
            Object::Package(elements) => elements
                .iter()
                .map(|&e| Value::export(store, e))
                .collect::<Result<Vec<_>>>()
                .map(Value::Package),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ObjectStore {
        ObjectStore::new(RefcountPolicy::Panic)
    }

    #[test]
    fn unref_then_ref_is_identity() {
        let mut s = store();
        let obj = s.alloc(Object::Integer(7));
        s.ref_(obj);

        let before = s.refcount(obj);
        s.unref(obj);
        s.ref_(obj);
        assert_eq!(s.refcount(obj), before);
    }

    #[test]
    fn chain_ref_reaches_every_link() {
        let mut s = store();
        let bottom = s.alloc(Object::Integer(1));
        let mid = s.alloc(Object::Reference {
            kind: RefKind::Local,
            inner: bottom,
        });
        let top = s.alloc(Object::Reference {
            kind: RefKind::RefOf,
            inner: mid,
        });

        s.ref_(top);
        assert_eq!(s.refcount(top), 2);
        assert_eq!(s.refcount(mid), 2);
        assert_eq!(s.refcount(bottom), 2);

        s.unref(top);
        assert_eq!(s.refcount(bottom), 1);
    }

    #[test]
    fn explicit_deref_unwinds_fully() {
        let mut s = store();
        let bottom = s.alloc(Object::Integer(42));
        let r1 = s.alloc(Object::Reference {
            kind: RefKind::Local,
            inner: bottom,
        });
        let r0 = s.alloc(Object::Reference {
            kind: RefKind::RefOf,
            inner: r1,
        });

        assert_eq!(s.unwind(r0), bottom);
    }

    #[test]
    fn implicit_deref_of_named_stops_one_level() {
        let mut s = store();
        let bottom = s.alloc(Object::Integer(42));
        let r1 = s.alloc(Object::Reference {
            kind: RefKind::RefOf,
            inner: bottom,
        });
        let named = s.alloc(Object::Reference {
            kind: RefKind::Named,
            inner: r1,
        });

        // Named: one level only, even though the inner is a reference.
        assert_eq!(s.deref_implicit(named), r1);

        // Local pointing at a reference: unwinds to the bottom.
        let local = s.alloc(Object::Reference {
            kind: RefKind::Local,
            inner: r1,
        });
        assert_eq!(s.deref_implicit(local), bottom);

        // Local pointing at a plain object: one level.
        let local2 = s.alloc(Object::Reference {
            kind: RefKind::Local,
            inner: bottom,
        });
        assert_eq!(s.deref_implicit(local2), bottom);
    }

    #[test]
    fn deep_assign_detaches_storage() {
        let mut s = store();
        let src = s.alloc(Object::Buffer(vec![1, 2, 3, 4]));
        let dst = s.alloc(Object::Uninitialized);

        s.assign_deep(dst, src);
        if let Object::Buffer(bytes) = s.get_mut(src) {
            bytes[0] = 0xAA;
        }
        assert!(matches!(s.get(dst), Object::Buffer(b) if b == &[1, 2, 3, 4]));
    }

    #[test]
    fn implicit_cast_preserves_type_and_size() {
        let mut s = store();
        let dst = s.alloc(Object::Buffer(vec![0xFF; 6]));
        let src = s.alloc(Object::Integer(0x1122));

        s.assign_implicit_cast(dst, src, 8).unwrap();
        assert!(
            matches!(s.get(dst), Object::Buffer(b) if b == &[0x22, 0x11, 0, 0, 0, 0]),
            "source truncated/zero-padded into existing storage"
        );

        let int_dst = s.alloc(Object::Integer(0));
        let str_src = s.alloc(Object::String(b"AB".to_vec()));
        s.assign_implicit_cast(int_dst, str_src, 8).unwrap();
        assert!(matches!(s.get(int_dst), Object::Integer(0x4241)));
    }

    #[test]
    fn package_slots_freed_recursively() {
        let mut s = store();
        let a = s.alloc(Object::Integer(1));
        let b = s.alloc(Object::Integer(2));
        let pkg = s.alloc(Object::Package(vec![a, b]));

        assert_eq!(s.live_objects(), 3);
        s.unref(pkg);
        assert_eq!(s.live_objects(), 0);
    }

    #[test]
    #[should_panic(expected = "refcount bug")]
    fn panic_policy_fires_on_overrelease() {
        let mut s = store();
        let obj = s.alloc(Object::Integer(1));
        s.unref(obj);
        s.unref(obj);
    }

    #[test]
    fn sweep_reclaims_reference_cycles() {
        let mut s = store();

        // A package holding a RefOf back to itself: counting alone can
        // never free this.
        let pkg = s.alloc(Object::Package(Vec::new()));
        let cycle = s.alloc(Object::Reference {
            kind: RefKind::RefOf,
            inner: pkg,
        });
        s.ref_(pkg);
        match s.get_mut(pkg) {
            Object::Package(elements) => elements.push(cycle),
            _ => unreachable!(),
        }

        s.unref(pkg);
        assert_eq!(s.live_objects(), 2, "the cycle keeps itself alive");

        assert_eq!(s.sweep_unreachable(&[]), 2);
        assert_eq!(s.live_objects(), 0);
    }

    #[test]
    fn sweep_keeps_reachable_objects_and_fixes_counts() {
        let mut s = store();
        let child = s.alloc(Object::Integer(5));
        let root = s.alloc(Object::Package(vec![child]));

        let stray = s.alloc(Object::Reference {
            kind: RefKind::RefOf,
            inner: child,
        });
        s.ref_(child);
        let _ = stray;

        assert_eq!(s.refcount(child), 2);
        assert_eq!(s.sweep_unreachable(&[root]), 1);

        // The stray reference is gone and its share with it.
        assert_eq!(s.refcount(child), 1);
        assert!(matches!(s.get(child), Object::Integer(5)));

        s.unref(root);
        assert_eq!(s.live_objects(), 0);
    }

    #[test]
    fn value_round_trip() {
        let mut s = store();
        let value = Value::Package(vec![
            Value::Integer(5),
            Value::String("hi".into()),
            Value::Buffer(vec![9, 9]),
        ]);

        let handle = value.import(&mut s);
        assert_eq!(Value::export(&s, handle).unwrap(), value);
    }
}
