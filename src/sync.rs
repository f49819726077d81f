//! AML synchronization objects and the FACS global-lock protocol.
//!
//! AML mutexes are recursive, owner-tracked state machines with a sync level
//! used to detect out-of-order acquisition; events are counting semaphores.
//! Blocking paths go through host sleep so opcode timeouts hold even though
//! a single interpreter instance runs one method tree at a time.

use tracing::{trace, warn};

use crate::consts::{MAX_MUTEX_DEPTH, TIMEOUT_INFINITE};
use crate::error::{AmlError, Result};
use crate::host::Host;

/// Identifier of an AML mutex within the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexId(pub(crate) u32);

/// Identifier of an AML event within the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(pub(crate) u32);

#[derive(Debug)]
struct AmlMutex {
    owner: Option<u64>,
    depth: u16,
    sync_level: u8,
    is_global: bool,
}

#[derive(Debug, Default)]
struct AmlEvent {
    count: u32,
}

/// Outcome of a mutex acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The mutex is now held (possibly recursively).
    Yes,
    /// The opcode timeout expired first.
    TimedOut,
}

/// All mutexes, events and the held-stack of the executing thread.
pub struct SyncState {
    mutexes: Vec<AmlMutex>,
    events: Vec<AmlEvent>,
    /// Stack of (mutex, sync level) held by the current method tree, used
    /// for sync-level ordering checks.
    held: Vec<(MutexId, u8)>,
    global_lock: GlobalLock,
}

impl SyncState {
    /// Fresh state; mutex 0 is the global-lock mutex backing `_GL_`.
    pub fn new(facs_global_lock: Option<u64>) -> Self {
        let mut state = Self {
            mutexes: Vec::new(),
            events: Vec::new(),
            held: Vec::new(),
            global_lock: GlobalLock {
                word_address: facs_global_lock,
            },
        };
        let global = state.create_mutex(0);
        state.mutexes[global.0 as usize].is_global = true;
        state
    }

    /// The mutex backing `_GL_` and `Lock`-rule fields.
    pub fn global_lock_mutex(&self) -> MutexId {
        MutexId(0)
    }

    /// Create a mutex with the given sync level.
    pub fn create_mutex(&mut self, sync_level: u8) -> MutexId {
        self.mutexes.push(AmlMutex {
            owner: None,
            depth: 0,
            sync_level,
            is_global: false,
        });
        MutexId((self.mutexes.len() - 1) as u32)
    }

    /// Create an event with a zero count.
    pub fn create_event(&mut self) -> EventId {
        self.events.push(AmlEvent::default());
        EventId((self.events.len() - 1) as u32)
    }

    /// Sync level of `mutex`.
    pub fn sync_level(&self, mutex: MutexId) -> u8 {
        self.mutexes[mutex.0 as usize].sync_level
    }

    /// Highest sync level currently held (0 when none).
    pub fn current_sync_level(&self) -> u8 {
        self.held.last().map(|(_, level)| *level).unwrap_or(0)
    }

    /// Whether the calling thread owns `mutex`.
    pub fn owns(&self, host: &dyn Host, mutex: MutexId) -> bool {
        self.mutexes[mutex.0 as usize].owner == Some(host.thread_id())
    }

    /// Acquire `mutex` for the calling thread, honoring the sync-level
    /// invariant: a thread may only acquire a mutex whose level is at least
    /// the highest level it already holds.
    ///
    /// `timeout_ms` of [`TIMEOUT_INFINITE`] blocks forever. Re-acquisition
    /// by the owner nests up to the depth bound instead of blocking.
    pub fn acquire(&mut self, host: &dyn Host, mutex: MutexId, timeout_ms: u16) -> Result<Acquired> {
        let this = host.thread_id();
        let level = self.sync_level(mutex);

        if self.mutexes[mutex.0 as usize].owner == Some(this) {
            let m = &mut self.mutexes[mutex.0 as usize];
            if m.depth == MAX_MUTEX_DEPTH {
                warn!("mutex recursion bound reached");
                return Ok(Acquired::TimedOut);
            }
            m.depth += 1;
            return Ok(Acquired::Yes);
        }

        if level < self.current_sync_level() {
            return Err(AmlError::SyncLevelTooHigh);
        }

        let mut waited = 0u64;
        loop {
            let m = &mut self.mutexes[mutex.0 as usize];
            if m.owner.is_none() {
                m.owner = Some(this);
                m.depth = 1;
                break;
            }
            if timeout_ms != TIMEOUT_INFINITE && waited >= timeout_ms as u64 {
                return Ok(Acquired::TimedOut);
            }
            host.sleep(1);
            waited += 1;
        }

        if self.mutexes[mutex.0 as usize].is_global {
            if let Err(err) = self.global_lock.acquire(host) {
                let m = &mut self.mutexes[mutex.0 as usize];
                m.owner = None;
                m.depth = 0;
                return Err(err);
            }
        }

        self.held.push((mutex, level));
        Ok(Acquired::Yes)
    }

    /// Release one acquisition of `mutex` by the calling thread.
    pub fn release(&mut self, host: &dyn Host, mutex: MutexId) -> Result<()> {
        if !self.owns(host, mutex) {
            return Err(AmlError::InvalidArgument);
        }

        let m = &mut self.mutexes[mutex.0 as usize];
        m.depth -= 1;
        if m.depth > 0 {
            return Ok(());
        }

        let is_global = m.is_global;
        m.owner = None;
        if let Some(pos) = self.held.iter().rposition(|(id, _)| *id == mutex) {
            self.held.remove(pos);
        }
        if is_global {
            self.global_lock.release(host);
        }
        Ok(())
    }

    /// Release everything the current thread still holds, innermost first.
    /// Used when a method tree unwinds.
    pub fn release_all_held(&mut self, host: &dyn Host) {
        while let Some((mutex, _)) = self.held.last().copied() {
            let m = &mut self.mutexes[mutex.0 as usize];
            m.depth = 1;
            if self.release(host, mutex).is_err() {
                self.held.pop();
            }
        }
    }

    /// Signal `event`, incrementing its count.
    pub fn signal(&mut self, event: EventId) {
        self.events[event.0 as usize].count += 1;
    }

    /// Reset `event`'s count to zero.
    pub fn reset(&mut self, event: EventId) {
        self.events[event.0 as usize].count = 0;
    }

    /// Wait for `event` up to `timeout_ms` ([`TIMEOUT_INFINITE`] = forever).
    /// Returns whether the wait was satisfied.
    pub fn wait(&mut self, host: &dyn Host, event: EventId, timeout_ms: u16) -> bool {
        let mut waited = 0u64;
        loop {
            let e = &mut self.events[event.0 as usize];
            if e.count > 0 {
                e.count -= 1;
                return true;
            }
            if timeout_ms != TIMEOUT_INFINITE && waited >= timeout_ms as u64 {
                return false;
            }
            host.sleep(1);
            waited += 1;
        }
    }
}

const GLOBAL_LOCK_PENDING: u32 = 1 << 0;
const GLOBAL_LOCK_OWNED: u32 = 1 << 1;
const GLOBAL_LOCK_MASK: u32 = 0b11;

/// The firmware-coordinated global lock living in the FACS.
struct GlobalLock {
    word_address: Option<u64>,
}

impl GlobalLock {
    /// Try to take the lock word once. Returns whether we now own it; if
    /// not, the pending bit has been set so firmware will signal a release.
    fn try_acquire(&self, host: &dyn Host, address: u64) -> Result<bool> {
        loop {
            let value = host.mem_read(address, crate::host::AccessWidth::Dword)? as u32;
            let was_owned = value & GLOBAL_LOCK_OWNED != 0;

            let mut new_value = (value & !GLOBAL_LOCK_MASK) | GLOBAL_LOCK_OWNED;
            if was_owned {
                new_value |= GLOBAL_LOCK_PENDING;
            }

            if host.mem_cmpxchg(address, value, new_value)? == value {
                return Ok(!was_owned);
            }
        }
    }

    /// Acquire the lock from firmware, waiting on the firmware-signalled
    /// release event while it is owned. No-op without a FACS.
    fn acquire(&self, host: &dyn Host) -> Result<()> {
        let Some(address) = self.word_address else {
            return Ok(());
        };

        let mut spins: u32 = 0;
        loop {
            spins += 1;
            if self.try_acquire(host, address)? {
                trace!(spins, "global lock acquired from firmware");
                return Ok(());
            }
            if spins == 0xFFFF {
                warn!(spins, "unable to acquire the global lock from firmware");
                return Err(AmlError::HardwareTimeout);
            }

            trace!("global lock owned by firmware, waiting for release");
            host.wait_for_global_lock_event(0xFFFF);
        }
    }

    /// Hand the lock back; notifies firmware if the pending bit was set.
    fn release(&self, host: &dyn Host) {
        let Some(address) = self.word_address else {
            return;
        };

        let pending = loop {
            let Ok(value) = host.mem_read(address, crate::host::AccessWidth::Dword) else {
                return;
            };
            let new_value = (value as u32) & !GLOBAL_LOCK_MASK;
            match host.mem_cmpxchg(address, value as u32, new_value) {
                Ok(seen) if seen == value as u32 => break value as u32 & GLOBAL_LOCK_PENDING != 0,
                Ok(_) => continue,
                Err(_) => return,
            }
        };

        if pending {
            trace!("notifying firmware of global lock release");
            host.signal_global_lock_release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AccessWidth, FirmwareRequest};

    struct FakeHost;

    impl Host for FakeHost {
        fn mem_read(&self, _: u64, _: AccessWidth) -> Result<u64> {
            Ok(0)
        }
        fn mem_write(&self, _: u64, _: AccessWidth, _: u64) -> Result<()> {
            Ok(())
        }
        fn io_read(&self, _: u64, _: AccessWidth) -> Result<u64> {
            Ok(0)
        }
        fn io_write(&self, _: u64, _: AccessWidth, _: u64) -> Result<()> {
            Ok(())
        }
        fn stall(&self, _: u64) {}
        fn sleep(&self, _: u64) {}
        fn ticks(&self) -> u64 {
            0
        }
        fn thread_id(&self) -> u64 {
            1
        }
        fn mem_cmpxchg(&self, _: u64, expected: u32, _: u32) -> Result<u32> {
            Ok(expected)
        }
        fn wait_for_global_lock_event(&self, _: u16) -> bool {
            true
        }
        fn signal_global_lock_release(&self) {}
        fn schedule_work(&self, _: crate::host::WorkQueue, work: crate::host::WorkItem) -> Result<()> {
            work();
            Ok(())
        }
        fn drain_work(&self) {}
        fn firmware_request(&self, _: FirmwareRequest) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn recursive_acquire_nests() {
        let mut sync = SyncState::new(None);
        let m = sync.create_mutex(0);

        assert_eq!(sync.acquire(&FakeHost, m, 0).unwrap(), Acquired::Yes);
        assert_eq!(sync.acquire(&FakeHost, m, 0).unwrap(), Acquired::Yes);
        sync.release(&FakeHost, m).unwrap();
        assert!(sync.owns(&FakeHost, m));
        sync.release(&FakeHost, m).unwrap();
        assert!(!sync.owns(&FakeHost, m));
    }

    #[test]
    fn sync_level_ordering_enforced() {
        let mut sync = SyncState::new(None);
        let high = sync.create_mutex(5);
        let low = sync.create_mutex(2);

        sync.acquire(&FakeHost, high, 0).unwrap();
        assert_eq!(
            sync.acquire(&FakeHost, low, 0),
            Err(AmlError::SyncLevelTooHigh)
        );

        let equal = sync.create_mutex(5);
        assert_eq!(sync.acquire(&FakeHost, equal, 0).unwrap(), Acquired::Yes);
    }

    #[test]
    fn event_wait_consumes_signals() {
        let mut sync = SyncState::new(None);
        let e = sync.create_event();

        assert!(!sync.wait(&FakeHost, e, 0));
        sync.signal(e);
        sync.signal(e);
        assert!(sync.wait(&FakeHost, e, 0));
        assert!(sync.wait(&FakeHost, e, 0));
        assert!(!sync.wait(&FakeHost, e, 0));
    }

    #[test]
    fn release_all_held_drains() {
        let mut sync = SyncState::new(None);
        let a = sync.create_mutex(1);
        let b = sync.create_mutex(2);
        sync.acquire(&FakeHost, a, 0).unwrap();
        sync.acquire(&FakeHost, b, 0).unwrap();

        sync.release_all_held(&FakeHost);
        assert!(!sync.owns(&FakeHost, a));
        assert!(!sync.owns(&FakeHost, b));
        assert_eq!(sync.current_sync_level(), 0);
    }
}
