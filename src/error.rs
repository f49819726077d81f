//! Runtime interpreter error implementation.

use bitflags::bitflags;
use thiserror::Error;

use crate::object::ObjectType;

/// Interpreter runtime error variants.
///
/// Any error raised while bytecode is executing aborts the current method:
/// the main loop short-circuits, every stacked frame is released (locals,
/// arguments and pending-op items dropped, references unreferenced) and the
/// error propagates to the external caller. The method produces no value on
/// that path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmlError {
    /// The host allocator refused a bytecode-sized allocation.
    #[error("out of memory")]
    OutOfMemory,
    /// The code cursor moved past the end of the method body.
    #[error("AML code offset out of bounds")]
    OutOfBounds,
    /// Malformed encoding, invalid name string, or an illegal opcode.
    #[error("bad AML bytecode")]
    BadBytecode,
    /// An operand had a runtime type the opcode cannot accept.
    #[error("incompatible object type {0:?}")]
    IncompatibleObjectType(ObjectType),
    /// A named lookup failed where the name was required to exist.
    #[error("AML referenced an undefined object")]
    UndefinedReference,
    /// A create-mode name resolution collided with an existing node.
    #[error("named object already exists")]
    ObjectAlreadyExists,
    /// An `Index`-style access fell outside the object it indexes.
    #[error("out of bounds AML index")]
    IndexOutOfBounds,
    /// Attempted to acquire a mutex with a sync level below one already held.
    #[error("AML attempted an out-of-order mutex acquisition")]
    SyncLevelTooHigh,
    /// A `While` loop exceeded its per-entry wall-clock budget.
    #[error("hanging AML while loop")]
    LoopTimeout,
    /// The configured maximum call-stack depth was reached.
    #[error("reached maximum AML call stack depth")]
    CallStackDepthLimit,
    /// Region I/O or an event wait exhausted its retries.
    #[error("timed out waiting for hardware response")]
    HardwareTimeout,
    /// An `Acquire`/`Wait` with a finite timeout expired.
    #[error("wait timed out")]
    Timeout,
    /// `eval_typed` produced an object outside the requested mask.
    #[error("object type mismatch: got {got:?}, expected {expected:?}")]
    TypeMismatch {
        /// Type the evaluation actually produced.
        got: ObjectType,
        /// Mask the caller would have accepted.
        expected: TypeMask,
    },
    /// The host memory-map primitive returned nothing for a physical range.
    #[error("failed to map memory")]
    MappingFailed,
    /// A table image failed header validation.
    #[error("bad table checksum")]
    BadChecksum,
    /// A table image is shorter than its header claims.
    #[error("invalid table length")]
    InvalidTableLength,
    /// The table signature is not one the interpreter consumes.
    #[error("invalid table signature")]
    InvalidSignature,
    /// A caller-supplied argument was unusable (wrong count, bad path, ...).
    #[error("invalid argument")]
    InvalidArgument,
    /// The construct is recognized but not implemented.
    #[error("unimplemented AML construct")]
    Unimplemented,
    /// `AddressSpace` access with no registered handler.
    #[error("no handler registered for this address space")]
    NoHandler,
}

bitflags! {
    /// Object-type acceptance mask for [`eval_typed`].
    ///
    /// [`eval_typed`]: crate::interpreter::Interpreter::eval_typed
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u32 {
        const INTEGER = 1 << ObjectType::Integer as u32;
        const STRING = 1 << ObjectType::String as u32;
        const BUFFER = 1 << ObjectType::Buffer as u32;
        const PACKAGE = 1 << ObjectType::Package as u32;
    }
}

impl TypeMask {
    /// Whether `ty` satisfies this mask.
    pub fn accepts(&self, ty: ObjectType) -> bool {
        (ty as u32) < 32 && self.bits() & (1 << ty as u32) != 0
    }
}

/// Shorthand used throughout the crate.
pub type Result<T, E = AmlError> = core::result::Result<T, E>;
