//! Call frames, pending-operation contexts and code blocks: the execution
//! state of one method invocation.

use std::sync::Arc;

use crate::consts::{METHOD_ARG_COUNT, METHOD_LOCAL_COUNT};
use crate::error::{AmlError, Result};
use crate::namespace::NodeHandle;
use crate::object::ObjectHandle;
use crate::opcode::OpSpec;
use crate::stream::PkgLength;
use crate::sync::MutexId;

/// An element of an operation context's item stack.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Item {
    /// Placeholder awaiting a sub-expression result.
    Empty,
    /// An object produced by a parse step or a child expression.
    Object(ObjectHandle),
    /// A resolved or freshly allocated namespace node.
    Node(NodeHandle),
    /// A decoded package length.
    Pkg(PkgLength),
    /// Up to eight literal bytes from the code stream.
    Imm(u64),
}

impl Item {
    pub(crate) fn object(&self) -> Result<ObjectHandle> {
        match self {
            Item::Object(handle) => Ok(*handle),
            _ => Err(AmlError::BadBytecode),
        }
    }

    pub(crate) fn node(&self) -> Result<NodeHandle> {
        match self {
            Item::Node(handle) => Ok(*handle),
            _ => Err(AmlError::BadBytecode),
        }
    }

    pub(crate) fn pkg(&self) -> Result<PkgLength> {
        match self {
            Item::Pkg(pkg) => Ok(*pkg),
            _ => Err(AmlError::BadBytecode),
        }
    }

    pub(crate) fn imm(&self) -> Result<u64> {
        match self {
            Item::Imm(value) => Ok(*value),
            _ => Err(AmlError::BadBytecode),
        }
    }
}

/// A single opcode being interpreted.
#[derive(Debug)]
pub(crate) struct OpCtx {
    /// The opcode's static description.
    pub spec: &'static OpSpec,
    /// Program counter into `spec.decode`.
    pub pc: usize,
    /// Waiting for a child expression to produce an item.
    pub preempted: bool,
    /// Index of the item whose package length bounds this op's body; the
    /// cursor jumps there when the program ends.
    pub tracked_pkg: Option<usize>,
    /// The item stack.
    pub items: Vec<Item>,
}

impl OpCtx {
    pub(crate) fn new(spec: &'static OpSpec) -> Self {
        Self {
            spec,
            pc: 0,
            preempted: false,
            tracked_pkg: None,
            items: Vec::new(),
        }
    }

    pub(crate) fn item(&self, index: usize) -> Result<&Item> {
        self.items.get(index).ok_or(AmlError::BadBytecode)
    }
}

/// Flavor of a code block on the block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    Else,
    While,
    Scope,
}

/// A structured region of the method body the cursor is currently inside.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CodeBlock {
    pub kind: BlockKind,
    /// Offset the block restarts at (the opcode byte for `While`).
    pub begin: u32,
    /// Offset one past the body.
    pub end: u32,
    /// Lexical scope node, for `Scope`-like blocks.
    pub node: Option<NodeHandle>,
}

/// Location and extent of a method body inside its table image.
#[derive(Debug, Clone)]
pub(crate) struct MethodRef {
    pub image: Arc<[u8]>,
    pub start: u32,
    pub len: u32,
    /// The method's namespace node; the base lexical scope.
    pub node: NodeHandle,
}

impl MethodRef {
    pub(crate) fn code(&self) -> &[u8] {
        &self.image[self.start as usize..(self.start + self.len) as usize]
    }
}

/// Per-`While` wall-clock budget, keyed by the loop opcode's offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WhileEntry {
    pub begin: u32,
    pub deadline_ticks: u64,
}

/// One active method invocation.
pub(crate) struct Frame {
    pub method: MethodRef,
    pub args: [Option<ObjectHandle>; METHOD_ARG_COUNT],
    pub locals: [Option<ObjectHandle>; METHOD_LOCAL_COUNT],
    /// Stack of pending operation contexts.
    pub pending: Vec<OpCtx>,
    /// Stack of structured code blocks.
    pub blocks: Vec<CodeBlock>,
    /// Innermost lexical scope.
    pub cur_scope: NodeHandle,
    /// Cursor into the method body.
    pub code_offset: u32,
    /// Active `While` budgets.
    pub whiles: Vec<WhileEntry>,
    /// AML mutexes acquired by this frame, released on frame teardown.
    pub held_mutexes: Vec<MutexId>,
    /// Serialization mutex taken on entry to a serialized method.
    pub method_mutex: Option<MutexId>,
}

impl Frame {
    /// A frame positioned at the start of `method`, with the base scope
    /// block covering the whole body.
    pub(crate) fn new(method: MethodRef) -> Self {
        let base = CodeBlock {
            kind: BlockKind::Scope,
            begin: 0,
            end: method.len,
            node: Some(method.node),
        };
        let cur_scope = method.node;
        Self {
            method,
            args: Default::default(),
            locals: Default::default(),
            pending: Vec::new(),
            blocks: vec![base],
            cur_scope,
            code_offset: 0,
            whiles: Vec::new(),
            held_mutexes: Vec::new(),
            method_mutex: None,
        }
    }

    pub(crate) fn has_code(&self) -> bool {
        self.code_offset < self.method.len
    }

    /// The op one below the innermost: the one awaiting its result.
    pub(crate) fn prev_op(&self) -> Option<&OpCtx> {
        self.pending.len().checked_sub(2).map(|i| &self.pending[i])
    }

    /// Recompute the lexical scope from the innermost `Scope`-type block.
    pub(crate) fn update_scope(&mut self) {
        self.cur_scope = self
            .blocks
            .iter()
            .rev()
            .find(|b| b.kind == BlockKind::Scope)
            .and_then(|b| b.node)
            .unwrap_or(self.method.node);
    }
}
