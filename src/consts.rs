//! Interpreter parameters and AML encoding constants.

/// Maximum number of nested method invocations before the interpreter aborts
/// with [`crate::error::AmlError::CallStackDepthLimit`].
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Wall-clock budget of a single `While` loop, per entry, in milliseconds.
pub const DEFAULT_LOOP_TIMEOUT_MS: u64 = 30_000;

/// Recursive acquisitions of one AML mutex by the owning thread are bounded
/// to this depth.
pub const MAX_MUTEX_DEPTH: u16 = u16::MAX;

/// Argument slots of a call frame (`Arg0`..`Arg6`).
pub const METHOD_ARG_COUNT: usize = 7;

/// Local slots of a call frame (`Local0`..`Local7`).
pub const METHOD_LOCAL_COUNT: usize = 8;

/// `Acquire`/`Wait` timeout operand value meaning "block forever".
pub const TIMEOUT_INFINITE: u16 = 0xFFFF;

/// Extended-opcode prefix byte.
pub const EXT_PREFIX: u8 = 0x5B;

/// `DualNamePrefix` byte of a name string.
pub const DUAL_NAME_PREFIX: u8 = 0x2E;

/// `MultiNamePrefix` byte of a name string.
pub const MULTI_NAME_PREFIX: u8 = 0x2F;

/// `NullName` byte of a name string.
pub const NULL_NAME: u8 = 0x00;

/// Largest value a package length can encode (28 significant bits).
pub const MAX_PKG_LENGTH: u32 = (1 << 28) - 1;

/// Value reported by the `Revision` opcode.
pub const INTERPRETER_REVISION: u64 = 2;

/// Monotonic host ticks per millisecond (ticks are 100 ns).
pub const TICKS_PER_MS: u64 = 10_000;
