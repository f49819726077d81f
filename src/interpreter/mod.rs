//! The AML interpreter: method evaluation entry points and the state shared
//! by every evaluation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::consts::{DEFAULT_LOOP_TIMEOUT_MS, DEFAULT_MAX_CALL_DEPTH, TIMEOUT_INFINITE};
use crate::error::{AmlError, Result, TypeMask};
use crate::host::{Host, WorkQueue};
use crate::namespace::{Namespace, NodeHandle, Predefined};
use crate::object::{
    Method, Object, ObjectHandle, ObjectStore, ObjectType, RefcountPolicy, Value,
};
use crate::opregion::{AddressSpace, RegionDispatch, RegionHandler};
use crate::sync::SyncState;
use crate::table::{TableRegistry, HEADER_SIZE};

mod alu;
mod create;
mod exec;
mod field_io;
mod flow;
mod frame;

pub(crate) use exec::Ctx;
pub(crate) use frame::{Frame, MethodRef};

/// Tunables of an interpreter instance.
#[derive(Debug, Clone)]
pub struct Params {
    /// Maximum number of nested method invocations.
    pub max_call_depth: u32,
    /// Wall-clock budget of each `While` loop entry, in milliseconds.
    pub loop_timeout_ms: u64,
    /// What to do when object reference counting goes provably wrong.
    pub refcount_policy: RefcountPolicy,
    /// Physical address of the FACS global-lock word, when the platform has
    /// one.
    pub facs_global_lock: Option<u64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            loop_timeout_ms: DEFAULT_LOOP_TIMEOUT_MS,
            refcount_policy: RefcountPolicy::default(),
            facs_global_lock: None,
        }
    }
}

impl Params {
    /// Override the `While` loop budget.
    pub fn with_loop_timeout_ms(mut self, ms: u64) -> Self {
        self.loop_timeout_ms = ms;
        self
    }

    /// Override the call-stack depth bound.
    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Override the refcount-mismanagement policy.
    pub fn with_refcount_policy(mut self, policy: RefcountPolicy) -> Self {
        self.refcount_policy = policy;
        self
    }

    /// Provide the FACS global-lock word address.
    pub fn with_facs_global_lock(mut self, address: u64) -> Self {
        self.facs_global_lock = Some(address);
        self
    }
}

/// Operating-system name reported through `_OS_`.
const OS_NAME: &str = "Microsoft Windows NT";

/// Interface strings `_OSI` answers affirmatively.
const OSI_SUPPORTED: &[&str] = &[
    "Windows 2000",
    "Windows 2001",
    "Windows 2001 SP1",
    "Windows 2001.1",
    "Windows 2006",
    "Windows 2009",
    "Windows 2012",
    "Windows 2013",
    "Windows 2015",
    "Windows 2016",
    "Windows 2017",
    "Windows 2018",
    "Windows 2019",
    "Windows 2020",
    "Windows 2021",
    "Windows 2022",
    "Module Device",
    "Processor Device",
    "3.0 Thermal Model",
    "Extended Address Space Descriptor",
];

fn osi_method(store: &mut ObjectStore, args: &[ObjectHandle]) -> Result<Object> {
    let [query] = args else {
        return Err(AmlError::InvalidArgument);
    };

    let handle = store.unwind(*query);
    let name = match store.get(handle) {
        Object::String(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
    };

    let supported = OSI_SUPPORTED.contains(&name.as_str());
    info!(interface = %name, supported, "_OSI query");
    Ok(Object::Integer(if supported { u64::MAX } else { 0 }))
}

/// Receives `Notify` values for a device, deferred through the host's
/// notification work queue.
pub trait NotifyHandler: Send + Sync {
    /// Called from the notification queue with the notified node's absolute
    /// path and the notification value.
    fn notify(&self, path: &str, value: u64);
}

/// The AML interpreter.
///
/// One instance owns the namespace, the object arena, the installed tables
/// and the address-space handler registry. A single instance executes one
/// method call tree at a time; threads sharing an instance serialize through
/// the embedder (the `&mut` receiver) and, within AML, through AML mutexes.
pub struct Interpreter {
    pub(crate) host: Box<dyn Host>,
    pub(crate) params: Params,
    pub(crate) objects: ObjectStore,
    pub(crate) ns: Namespace,
    pub(crate) sync: SyncState,
    pub(crate) regions: RegionDispatch,
    tables: TableRegistry,
    notify_handlers: Vec<(NodeHandle, Arc<dyn NotifyHandler>)>,
    /// 32-bit integer mode, latched from the DSDT revision.
    rev1: bool,
    width_latched: bool,
}

impl Interpreter {
    /// Build an interpreter around the given host.
    pub fn new(host: Box<dyn Host>, params: Params) -> Self {
        let mut objects = ObjectStore::new(params.refcount_policy);
        let mut ns = Namespace::new(&mut objects);
        let sync = SyncState::new(params.facs_global_lock);

        let os = objects.alloc(Object::String(OS_NAME.as_bytes().to_vec()));
        ns.set_object(ns.predefined(Predefined::Os), os, &mut objects);

        let rev = objects.alloc(Object::Integer(crate::consts::INTERPRETER_REVISION));
        ns.set_object(ns.predefined(Predefined::Rev), rev, &mut objects);

        let gl = objects.alloc(Object::Mutex(sync.global_lock_mutex()));
        ns.set_object(ns.predefined(Predefined::Gl), gl, &mut objects);

        let osi = objects.alloc(Object::Method(Method {
            image: Arc::from(Vec::new().into_boxed_slice()),
            start: 0,
            len: 0,
            args: 1,
            serialized: false,
            sync_level: 0,
            mutex: None,
            native: Some(osi_method),
        }));
        ns.set_object(ns.predefined(Predefined::Osi), osi, &mut objects);

        Self {
            host,
            params,
            objects,
            ns,
            sync,
            regions: RegionDispatch::with_defaults(),
            tables: TableRegistry::default(),
            notify_handlers: Vec::new(),
            rev1: false,
            width_latched: false,
        }
    }

    /// The namespace, for embedder-side walks.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Install (or replace) the handler for an address space.
    pub fn install_region_handler(&mut self, space: AddressSpace, handler: Box<dyn RegionHandler>) {
        self.regions.install(space, handler);
    }

    /// Register a `Notify` handler on a device, thermal zone, processor, or
    /// the root (which receives every notification).
    pub fn install_notify_handler(
        &mut self,
        node: NodeHandle,
        handler: Arc<dyn NotifyHandler>,
    ) -> Result<()> {
        if node != self.ns.root() {
            match self.objects.get(self.ns.object(node)) {
                Object::Device | Object::ThermalZone | Object::Processor { .. } => {}
                other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
            }
        }
        self.notify_handlers.push((node, handler));
        Ok(())
    }

    /// Deliver a `Notify` to the handlers registered for `node` and for the
    /// root, through the host's notification work queue. Fails with
    /// [`AmlError::NoHandler`] when nobody is listening.
    pub(crate) fn dispatch_notification(&mut self, node: NodeHandle, value: u64) -> Result<()> {
        let root = self.ns.root();
        let recipients: Vec<Arc<dyn NotifyHandler>> = self
            .notify_handlers
            .iter()
            .filter(|(n, _)| *n == node || *n == root)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let path = self.ns.absolute_path(node);
        if recipients.is_empty() {
            warn!(node = %path, value, "Notify with no handler installed");
            return Err(AmlError::NoHandler);
        }

        info!(node = %path, value = format_args!("{value:#X}"), "AML Notify");
        for handler in recipients {
            let path = path.clone();
            self.host.schedule_work(
                WorkQueue::Notification,
                Box::new(move || handler.notify(&path, value)),
            )?;
        }
        Ok(())
    }

    /// Whether integers are truncated to 32 bits (DSDT revision < 2).
    pub fn is_rev1(&self) -> bool {
        self.rev1
    }

    pub(crate) fn int_bytes(&self) -> usize {
        if self.rev1 {
            4
        } else {
            8
        }
    }

    pub(crate) fn int_bits(&self) -> u32 {
        self.int_bytes() as u32 * 8
    }

    pub(crate) fn ones(&self) -> u64 {
        if self.rev1 {
            0xFFFF_FFFF
        } else {
            u64::MAX
        }
    }

    pub(crate) fn truncate(&self, value: u64) -> u64 {
        if self.rev1 {
            value & 0xFFFF_FFFF
        } else {
            value
        }
    }

    /// Validate and install a definition block, then execute its AML at the
    /// root scope. The first DSDT latches the interpreter's integer width.
    /// Returns the table's registry index, usable with
    /// [`unload_table`](Self::unload_table).
    pub fn load_table(&mut self, data: &[u8]) -> Result<usize> {
        let index = self.tables.install(data)?;
        let table = self.tables.get(index).expect("just installed");

        if !self.width_latched && &table.header.signature == b"DSDT" {
            self.rev1 = table.header.revision < 2;
            self.width_latched = true;
            if self.rev1 {
                info!("DSDT revision < 2, using 32-bit integers");
            }
        }

        let method = MethodRef {
            image: Arc::clone(&table.image),
            start: HEADER_SIZE as u32,
            len: table.header.length - HEADER_SIZE as u32,
            node: self.ns.root(),
        };

        // Nodes created while the table loads belong to it.
        self.ns.set_default_owner(Some(index as u32));
        let result = self.execute(method, &[], false, 0);
        self.ns.set_default_owner(None);

        self.drain_dropped_node_refs();
        result.map(|ret| {
            if let Some(ret) = ret {
                self.objects.unref(ret);
            }
            index
        })
    }

    /// Unload the definition block at `index`: its namespace nodes are
    /// uninstalled (dangling where objects still point at them), attached
    /// regions are detached, and a mark phase sweeps every object only the
    /// table kept alive, reference cycles included.
    pub fn unload_table(&mut self, index: usize) -> Result<()> {
        let table = self.tables.uninstall(index)?;

        let mut owned: Vec<(usize, NodeHandle)> = self
            .ns
            .live_nodes()
            .into_iter()
            .filter(|&node| {
                self.ns.owner(node) == Some(index as u32) && !self.ns.is_dangling(node)
            })
            .map(|node| (self.ns.depth(node), node))
            .collect();
        // Children go before their parents.
        owned.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, node) in owned {
            self.uninstall_node(node)?;
        }

        let freed = self.sweep_objects();
        info!(
            signature = %String::from_utf8_lossy(&table.header.signature),
            index,
            freed,
            "unloaded definition block"
        );
        Ok(())
    }

    /// Mark from the namespace roots and free every unreachable object.
    fn sweep_objects(&mut self) -> usize {
        let roots: Vec<ObjectHandle> = self
            .ns
            .live_nodes()
            .into_iter()
            .map(|node| self.ns.object(node))
            .collect();
        let freed = self.objects.sweep_unreachable(&roots);
        self.drain_dropped_node_refs();
        freed
    }

    /// Evaluate the object at `path`, relative to the root.
    ///
    /// A method is invoked with `args`; anything else is read (field units
    /// are read out of their region). Returns `None` when a method returns
    /// nothing.
    pub fn eval(&mut self, path: &str, args: &[Value]) -> Result<Option<Value>> {
        self.eval_at(None, path, args)
    }

    /// Evaluate `path` relative to `parent` (or the root when `None`).
    pub fn eval_at(
        &mut self,
        parent: Option<NodeHandle>,
        path: &str,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let start = parent.unwrap_or_else(|| self.ns.root());
        let node = self.ns.find_path(start, path)?;
        let object = self.ns.object(node);

        let ret = match self.objects.get(object).clone() {
            Object::Method(method) => {
                if method.args as usize != args.len() {
                    return Err(AmlError::InvalidArgument);
                }

                let arg_handles: Vec<ObjectHandle> =
                    args.iter().map(|v| v.import(&mut self.objects)).collect();

                let result = if let Some(native) = method.native {
                    let value = native(&mut self.objects, &arg_handles)?;
                    Ok(Some(self.objects.alloc(value)))
                } else {
                    let method_ref = MethodRef {
                        image: Arc::clone(&method.image),
                        start: method.start,
                        len: method.len,
                        node,
                    };
                    self.execute(
                        method_ref,
                        &arg_handles,
                        method.serialized,
                        method.sync_level,
                    )
                };

                for handle in arg_handles {
                    self.objects.unref(handle);
                }

                result?
            }
            _ => {
                let owned = self.resolve_value_owned(object)?;
                Some(owned)
            }
        };

        let value = match ret {
            None => None,
            Some(handle) => {
                let resolved = self.resolve_value_owned(handle)?;
                let value = Value::export(&self.objects, resolved);
                self.objects.unref(resolved);
                self.objects.unref(handle);
                Some(value?)
            }
        };

        self.drain_dropped_node_refs();
        Ok(value)
    }

    /// Evaluate `path` and require the result type to match `mask`.
    pub fn eval_typed(&mut self, path: &str, args: &[Value], mask: TypeMask) -> Result<Value> {
        let value = self.eval(path, args)?.ok_or(AmlError::TypeMismatch {
            got: ObjectType::Uninitialized,
            expected: mask,
        })?;

        if !mask.accepts(value.type_of()) {
            return Err(AmlError::TypeMismatch {
                got: value.type_of(),
                expected: mask,
            });
        }
        Ok(value)
    }

    /// Evaluate `path` to an integer.
    pub fn eval_integer(&mut self, path: &str, args: &[Value]) -> Result<u64> {
        match self.eval_typed(path, args, TypeMask::INTEGER)? {
            Value::Integer(value) => Ok(value),
            _ => unreachable!("mask restricted the type"),
        }
    }

    /// Remove `node` from the namespace; dangles it if objects still point
    /// there. Detaches an operation region first.
    pub fn uninstall_node(&mut self, node: NodeHandle) -> Result<()> {
        let object = self.ns.object(node);
        if let Object::OpRegion(region) = self.objects.get(object) {
            let mut region = region.clone();
            self.regions.detach(self.host.as_ref(), &mut region)?;
            *self.objects.get_mut(object) = Object::OpRegion(region);
        }

        self.ns.uninstall(node, &mut self.objects);
        self.drain_dropped_node_refs();
        Ok(())
    }

    pub(crate) fn drain_dropped_node_refs(&mut self) {
        loop {
            let dropped = self.objects.take_dropped_node_refs();
            if dropped.is_empty() {
                return;
            }
            for node in dropped {
                self.ns.unref_node(node, &mut self.objects);
            }
        }
    }

    /// Run a method to completion on this thread. `arg_handles` are
    /// borrowed; the frame takes its own references.
    pub(crate) fn execute(
        &mut self,
        method: MethodRef,
        arg_handles: &[ObjectHandle],
        serialized: bool,
        sync_level: u8,
    ) -> Result<Option<ObjectHandle>> {
        let ret_slot = self.objects.alloc(Object::Uninitialized);
        let mut ctx = Ctx::new(ret_slot);

        let mut frame = Frame::new(method);
        for (slot, &handle) in frame.args.iter_mut().zip(arg_handles) {
            self.objects.ref_(handle);
            *slot = Some(handle);
        }

        if serialized {
            let mutex = self.serialization_mutex(&frame, sync_level)?;
            match self.sync.acquire(self.host.as_ref(), mutex, TIMEOUT_INFINITE) {
                Ok(_) => frame.method_mutex = Some(mutex),
                Err(err) => {
                    self.cleanup_frame(frame);
                    self.objects.unref(ret_slot);
                    return Err(err);
                }
            }
        }

        ctx.frames.push(frame);
        let result = self.run(&mut ctx);

        while let Some(frame) = ctx.frames.pop() {
            self.cleanup_frame(frame);
        }

        match result {
            Ok(()) => {
                let ret = ctx.ret;
                if self.objects.type_of(ret) == ObjectType::Uninitialized {
                    self.objects.unref(ret);
                    Ok(None)
                } else {
                    Ok(Some(ret))
                }
            }
            Err(err) => {
                warn!(error = %err, "method evaluation aborted");
                self.sync.release_all_held(self.host.as_ref());
                self.objects.unref(ctx.ret);
                Err(err)
            }
        }
    }

    /// The per-method serialization mutex, created on first entry.
    fn serialization_mutex(
        &mut self,
        frame: &Frame,
        sync_level: u8,
    ) -> Result<crate::sync::MutexId> {
        let object = self.ns.object(frame.method.node);
        let existing = match self.objects.get(object) {
            Object::Method(method) => Some(method.mutex),
            _ => None,
        };

        match existing {
            Some(Some(mutex)) => Ok(mutex),
            Some(None) => {
                let mutex = self.sync.create_mutex(sync_level);
                if let Object::Method(method) = self.objects.get_mut(object) {
                    method.mutex = Some(mutex);
                }
                Ok(mutex)
            }
            // A pseudo-method (table load) has no backing method object.
            None => Ok(self.sync.create_mutex(sync_level)),
        }
    }

    /// Release everything a frame owns.
    pub(crate) fn cleanup_frame(&mut self, mut frame: Frame) {
        while let Some(op) = frame.pending.pop() {
            self.cleanup_op_items(op.items);
        }
        for slot in frame.args.iter_mut().chain(frame.locals.iter_mut()) {
            if let Some(handle) = slot.take() {
                self.objects.unref(handle);
            }
        }
        while let Some(mutex) = frame.held_mutexes.pop() {
            let _ = self.sync.release(self.host.as_ref(), mutex);
        }
        if let Some(mutex) = frame.method_mutex.take() {
            let _ = self.sync.release(self.host.as_ref(), mutex);
        }
    }

    pub(crate) fn cleanup_op_items(&mut self, items: Vec<frame::Item>) {
        for item in items {
            if let frame::Item::Object(handle) = item {
                self.objects.unref(handle);
            }
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // Let scheduled notification work finish while the namespace is
        // still alive.
        self.host.drain_work();

        // Detach every attached region so space handlers can drop mappings.
        for node in self.ns.live_nodes() {
            let object = self.ns.object(node);
            if let Object::OpRegion(region) = self.objects.get(object) {
                if region.attached {
                    let mut region = region.clone();
                    let _ = self.regions.detach(self.host.as_ref(), &mut region);
                    *self.objects.get_mut(object) = Object::OpRegion(region);
                }
            }
        }
    }
}
