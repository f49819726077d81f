//! The ACPI namespace: a tree of four-character names, each owning at most
//! one object.
//!
//! Nodes live in an arena and link to parent, first child and siblings by
//! handle. Uninstalling a node that is still referenced by an object marks it
//! dangling instead of freeing it, so later accesses can fail gracefully.

use bitflags::bitflags;
use itertools::Itertools;
use tracing::warn;

use crate::error::{AmlError, Result};
use crate::object::{Object, ObjectHandle, ObjectStore};

/// A four-character namespace segment, packed into 32 bits.
///
/// Characters are drawn from `[A-Z_0-9]` with a non-digit lead; short names
/// are padded with `_` on encode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameSeg([u8; 4]);

impl NameSeg {
    /// Build from raw bytes, validating the AML character set.
    pub fn new(bytes: [u8; 4]) -> Result<Self> {
        if !bytes[0].is_ascii_uppercase() && bytes[0] != b'_' {
            return Err(AmlError::BadBytecode);
        }
        for &b in &bytes[1..] {
            if !b.is_ascii_uppercase() && !b.is_ascii_digit() && b != b'_' {
                return Err(AmlError::BadBytecode);
            }
        }
        Ok(Self(bytes))
    }

    /// Build from text, padding to four characters with `_`.
    pub fn from_str(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(AmlError::InvalidArgument);
        }
        let mut seg = [b'_'; 4];
        seg[..bytes.len()].copy_from_slice(bytes);
        Self::new(seg)
    }

    /// The packed 32-bit id.
    pub fn id(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// The raw characters.
    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Display for NameSeg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &b in &self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NameSeg({self})")
    }
}

/// Stable index of a node inside the [`Namespace`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct NodeFlags: u8 {
        /// The node shares its object with the alias target.
        const ALIAS = 1 << 0;
        /// Uninstalled while still referenced; accesses must fail.
        const DANGLING = 1 << 1;
    }
}

struct Node {
    name: NameSeg,
    flags: NodeFlags,
    object: ObjectHandle,
    parent: Option<NodeHandle>,
    first_child: Option<NodeHandle>,
    prev: Option<NodeHandle>,
    next: Option<NodeHandle>,
    /// Strong references held by objects (field units, methods).
    refs: u32,
    /// Index of the definition block that created the node, when one did.
    owner: Option<u32>,
}

/// The nine predefined top-level scopes plus the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Predefined {
    Root = 0,
    Gpe,
    Pr,
    Sb,
    Si,
    Tz,
    Gl,
    Os,
    Osi,
    Rev,
}

const PREDEFINED_NAMES: [&[u8; 4]; 10] = [
    b"\\___", b"_GPE", b"_PR_", b"_SB_", b"_SI_", b"_TZ_", b"_GL_", b"_OS_", b"_OSI", b"_REV",
];

/// The namespace tree.
pub struct Namespace {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    predefined: [NodeHandle; 10],
    /// Owner stamped onto freshly allocated nodes (the table being loaded).
    default_owner: Option<u32>,
}

impl Namespace {
    /// A namespace holding the root and the predefined scopes, every node
    /// owning a fresh `Uninitialized` object. The interpreter fills in the
    /// predefined objects (`_OS_`, `_REV`, `_GL_`, `_OSI`) before loading
    /// tables.
    pub fn new(store: &mut ObjectStore) -> Self {
        let mut ns = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            predefined: [NodeHandle(0); 10],
            default_owner: None,
        };

        for (i, name) in PREDEFINED_NAMES.iter().enumerate() {
            // The root's pseudo-name is not a valid AML segment; store it raw.
            let seg = NameSeg(**name);
            let node = ns.alloc_raw(seg, store);
            ns.predefined[i] = node;
        }

        let root = ns.predefined[Predefined::Root as usize];
        let children: Vec<NodeHandle> = ns.predefined[1..].to_vec();
        for child in children {
            ns.install(root, child);
        }

        ns
    }

    fn alloc_raw(&mut self, name: NameSeg, store: &mut ObjectStore) -> NodeHandle {
        let object = store.alloc(Object::Uninitialized);
        let node = Node {
            name,
            flags: NodeFlags::empty(),
            object,
            parent: None,
            first_child: None,
            prev: None,
            next: None,
            refs: 0,
            owner: self.default_owner,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = Some(node);
                NodeHandle(idx)
            }
            None => {
                self.nodes.push(Some(node));
                NodeHandle((self.nodes.len() - 1) as u32)
            }
        }
    }

    /// Allocate an unlinked node named `name`, owning an `Uninitialized`
    /// object. The parent is remembered but the node is only made visible by
    /// a later [`install`](Self::install).
    pub fn alloc(
        &mut self,
        name: NameSeg,
        parent: NodeHandle,
        store: &mut ObjectStore,
    ) -> NodeHandle {
        let handle = self.alloc_raw(name, store);
        self.node_mut(handle).parent = Some(parent);
        handle
    }

    fn node(&self, handle: NodeHandle) -> &Node {
        self.nodes[handle.0 as usize]
            .as_ref()
            .expect("stale namespace handle")
    }

    fn node_mut(&mut self, handle: NodeHandle) -> &mut Node {
        self.nodes[handle.0 as usize]
            .as_mut()
            .expect("stale namespace handle")
    }

    /// The root node.
    pub fn root(&self) -> NodeHandle {
        self.predefined[Predefined::Root as usize]
    }

    /// One of the predefined nodes.
    pub fn predefined(&self, which: Predefined) -> NodeHandle {
        self.predefined[which as usize]
    }

    /// The node's name.
    pub fn name(&self, handle: NodeHandle) -> NameSeg {
        self.node(handle).name
    }

    /// The node's parent, if it has one.
    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.node(handle).parent
    }

    /// Index of the definition block that created this node, if any.
    pub fn owner(&self, handle: NodeHandle) -> Option<u32> {
        self.node(handle).owner
    }

    /// Set the owner stamped onto nodes allocated from here on.
    pub fn set_default_owner(&mut self, owner: Option<u32>) {
        self.default_owner = owner;
    }

    /// Find the node owning `object`, if any.
    pub fn owner_of(&self, object: ObjectHandle) -> Option<NodeHandle> {
        (0..self.nodes.len() as u32)
            .map(NodeHandle)
            .find(|&h| matches!(&self.nodes[h.0 as usize], Some(node) if node.object == object))
    }

    /// The object owned by this node.
    pub fn object(&self, handle: NodeHandle) -> ObjectHandle {
        self.node(handle).object
    }

    /// Whether the node was uninstalled while still referenced.
    pub fn is_dangling(&self, handle: NodeHandle) -> bool {
        self.node(handle).flags.contains(NodeFlags::DANGLING)
    }

    /// Mark a node as an alias of another name.
    pub fn mark_alias(&mut self, handle: NodeHandle) {
        self.node_mut(handle).flags |= NodeFlags::ALIAS;
    }

    /// Replace the node's owned object, dropping one reference to the old
    /// one.
    pub fn set_object(&mut self, handle: NodeHandle, object: ObjectHandle, store: &mut ObjectStore) {
        let old = std::mem::replace(&mut self.node_mut(handle).object, object);
        store.unref(old);
    }

    /// Take a strong node reference (an object now points here).
    pub fn ref_node(&mut self, handle: NodeHandle) {
        self.node_mut(handle).refs += 1;
    }

    /// Drop a strong node reference; frees the slot if the node was dangling
    /// and this was the last reference.
    pub fn unref_node(&mut self, handle: NodeHandle, store: &mut ObjectStore) {
        let node = self.node_mut(handle);
        node.refs = node.refs.saturating_sub(1);
        if node.refs == 0 && node.flags.contains(NodeFlags::DANGLING) {
            self.release(handle, store);
        }
    }

    /// Link `node` as the first child of `parent`.
    pub fn install(&mut self, parent: NodeHandle, node: NodeHandle) {
        let prev_first = self.node(parent).first_child;
        {
            let n = self.node_mut(node);
            n.parent = Some(parent);
            n.next = prev_first;
            n.prev = None;
        }
        if let Some(prev) = prev_first {
            self.node_mut(prev).prev = Some(node);
        }
        self.node_mut(parent).first_child = Some(node);
    }

    /// Unlink `node` from the tree. If objects still reference it, the node
    /// is marked dangling and kept; otherwise it is freed along with one
    /// reference to its object.
    pub fn uninstall(&mut self, node: NodeHandle, store: &mut ObjectStore) {
        if let Some(child) = self.node(node).first_child {
            warn!(
                node = %self.name(node),
                child = %self.name(child),
                "uninstalling a namespace node with live children"
            );
        }

        let (parent, prev, next) = {
            let n = self.node(node);
            (n.parent, n.prev, n.next)
        };
        if let Some(parent) = parent {
            if self.node(parent).first_child == Some(node) {
                self.node_mut(parent).first_child = next;
            }
        }
        if let Some(prev) = prev {
            self.node_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.node_mut(next).prev = prev;
        }

        let n = self.node_mut(node);
        n.parent = None;
        n.prev = None;
        n.next = None;

        if n.refs > 0 {
            n.flags |= NodeFlags::DANGLING;
        } else {
            self.release(node, store);
        }
    }

    fn release(&mut self, node: NodeHandle, store: &mut ObjectStore) {
        let object = self.node(node).object;
        store.unref(object);
        self.nodes[node.0 as usize] = None;
        self.free.push(node.0);
    }

    /// Find a direct child of `parent` by name.
    pub fn find_child(&self, parent: NodeHandle, name: NameSeg) -> Option<NodeHandle> {
        let mut cur = self.node(parent).first_child;
        while let Some(handle) = cur {
            let node = self.node(handle);
            if node.name.id() == name.id() {
                return Some(handle);
            }
            cur = node.next;
        }
        None
    }

    /// Number of edges between the node and the root.
    pub fn depth(&self, handle: NodeHandle) -> usize {
        let mut depth = 0;
        let mut cur = self.node(handle).parent;
        while let Some(handle) = cur {
            depth += 1;
            cur = self.node(handle).parent;
        }
        depth
    }

    /// Absolute text path of the node, e.g. `\_SB_.PCI0.SBRG`.
    pub fn absolute_path(&self, handle: NodeHandle) -> String {
        if handle == self.root() {
            return "\\".into();
        }

        let mut segments = Vec::new();
        let mut cur = Some(handle);
        while let Some(h) = cur {
            if h == self.root() {
                break;
            }
            segments.push(self.node(h).name.to_string());
            cur = self.node(h).parent;
        }

        format!("\\{}", segments.iter().rev().join("."))
    }

    /// Resolve a text path like `\_SB.PCI0._STA` or `^^FOO.BAR` starting at
    /// `start`. Segments shorter than four characters are padded with `_`.
    /// A single-segment relative path searches each ancestor scope upward,
    /// matching AML relative-name semantics.
    pub fn find_path(&self, start: NodeHandle, path: &str) -> Result<NodeHandle> {
        let mut rest = path;
        let mut cur = start;

        if let Some(stripped) = rest.strip_prefix('\\') {
            cur = self.root();
            rest = stripped;
        } else {
            while let Some(stripped) = rest.strip_prefix('^') {
                cur = self.parent(cur).ok_or(AmlError::InvalidArgument)?;
                rest = stripped;
            }
        }

        if rest.is_empty() {
            return Ok(cur);
        }

        let segments: Vec<NameSeg> = rest
            .split('.')
            .map(NameSeg::from_str)
            .collect::<Result<_>>()?;

        if segments.len() == 1 && path == rest {
            // Unanchored single segment: walk ancestors upward.
            let name = segments[0];
            let mut scope = Some(cur);
            while let Some(s) = scope {
                if let Some(found) = self.find_child(s, name) {
                    return Ok(found);
                }
                scope = self.parent(s);
            }
            return Err(AmlError::UndefinedReference);
        }

        for seg in segments {
            cur = self
                .find_child(cur, seg)
                .ok_or(AmlError::UndefinedReference)?;
        }
        Ok(cur)
    }

    /// Visit `parent`'s subtree depth-first. The callback steers the walk.
    pub fn for_each_depth_first<F>(&self, parent: NodeHandle, mut callback: F)
    where
        F: FnMut(NodeHandle) -> IterDecision,
    {
        let mut stack = vec![self.node(parent).first_child];
        while let Some(top) = stack.last_mut() {
            let Some(handle) = *top else {
                stack.pop();
                continue;
            };
            *top = self.node(handle).next;

            match callback(handle) {
                IterDecision::Break => return,
                IterDecision::NextPeer => {}
                IterDecision::Continue => stack.push(self.node(handle).first_child),
            }
        }
    }

    /// Every live node handle, root included. Used by teardown sweeps.
    pub fn live_nodes(&self) -> Vec<NodeHandle> {
        (0..self.nodes.len() as u32)
            .filter(|&i| self.nodes[i as usize].is_some())
            .map(NodeHandle)
            .collect()
    }
}

/// Steering decision of a depth-first namespace walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterDecision {
    /// Descend into this node's children.
    Continue,
    /// Skip the children, continue with the next peer.
    NextPeer,
    /// Stop the walk.
    Break,
}
