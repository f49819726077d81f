//! The host-interface contract the interpreter calls into.
//!
//! Everything with a physical-world side effect goes through [`Host`]: raw
//! memory and port I/O backing the default operation-region handlers, time
//! sources for `Sleep`/`Stall`/`Timer` and loop timeouts, thread identity for
//! mutex ownership, and the FACS word used by the global-lock protocol.

use crate::error::Result;

/// Access width of a single host I/O operation, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum AccessWidth {
    /// 1 byte.
    Byte = 1,
    /// 2 bytes.
    Word = 2,
    /// 4 bytes.
    Dword = 4,
    /// 8 bytes.
    Qword = 8,
}

impl AccessWidth {
    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Width in bits.
    pub const fn bits(self) -> u32 {
        (self as u32) * 8
    }
}

/// Queue class of a deferred work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkQueue {
    /// General-purpose-event handlers executing AML.
    GpeExecution,
    /// Notifications delivered to registered device handlers.
    Notification,
}

/// A deferred work item handed to [`Host::schedule_work`].
pub type WorkItem = Box<dyn FnOnce() + Send>;

/// A request the firmware expects the OS to service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareRequest {
    /// AML executed a `BreakPoint` opcode.
    Breakpoint,
    /// AML executed a `Fatal` opcode.
    Fatal {
        /// OEM-defined fatal type.
        kind: u8,
        /// OEM-defined fatal code.
        code: u32,
        /// Evaluated fatal argument.
        arg: u64,
    },
}

/// Primitives the embedding kernel provides.
///
/// Implementations must be safe to call from any thread that enters the
/// interpreter. All reads and writes happen at exactly the stated width; the
/// interpreter never asks the host to split or coalesce accesses.
pub trait Host {
    /// Read from physical memory at the exact given width.
    fn mem_read(&self, address: u64, width: AccessWidth) -> Result<u64>;

    /// Write to physical memory at the exact given width.
    fn mem_write(&self, address: u64, width: AccessWidth, value: u64) -> Result<()>;

    /// Read from an I/O port at the exact given width.
    fn io_read(&self, port: u64, width: AccessWidth) -> Result<u64>;

    /// Write to an I/O port at the exact given width.
    fn io_write(&self, port: u64, width: AccessWidth, value: u64) -> Result<()>;

    /// Busy-wait for the given number of microseconds.
    fn stall(&self, usec: u64);

    /// Yield the current thread for at least the given number of milliseconds.
    fn sleep(&self, msec: u64);

    /// Monotonic clock in 100 ns units.
    fn ticks(&self) -> u64;

    /// Identifier of the calling thread. Never zero.
    fn thread_id(&self) -> u64;

    /// Atomic compare-exchange on a 32-bit word in physical memory, used for
    /// the FACS global-lock field. Returns the value observed before the
    /// exchange; the store happened iff it equals `expected`.
    fn mem_cmpxchg(&self, address: u64, expected: u32, new: u32) -> Result<u32>;

    /// Block until firmware signals a global-lock release, or the timeout
    /// (milliseconds) expires. Returns whether the event fired.
    fn wait_for_global_lock_event(&self, timeout_ms: u16) -> bool;

    /// Notify firmware that the OS released the global lock while the pending
    /// bit was set (the embedder writes the `GBL_RLS` register).
    fn signal_global_lock_release(&self);

    /// Queue `work` for deferred execution on the given queue class. A host
    /// may run it inline.
    fn schedule_work(&self, queue: WorkQueue, work: WorkItem) -> Result<()>;

    /// Block until every previously scheduled work item has run to
    /// completion.
    fn drain_work(&self);

    /// Service a firmware request (`BreakPoint`, `Fatal`).
    fn firmware_request(&self, request: FirmwareRequest) -> Result<()>;
}
