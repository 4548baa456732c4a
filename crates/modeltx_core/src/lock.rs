//! Domain lock.
//!
//! A reentrant, thread-aware lock with shared and exclusive modes. Waiters
//! are served in FIFO order: a shared request never overtakes an exclusive
//! request queued before it, so writers cannot starve.
//!
//! Beyond plain acquire/release the lock supports:
//! - **yield**: a holder temporarily steps aside for queued waiters and then
//!   reacquires at its original depth and mode
//! - **transfer**: the hold is handed to another thread without passing
//!   through the queue
//! - **interrupt**: a waiting thread is woken and its acquire fails

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Lock failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The waiting thread was interrupted.
    #[error("interrupted while waiting")]
    Interrupted,

    /// The timeout elapsed before the lock became available.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long the thread waited.
        waited: Duration,
    },

    /// The calling thread does not hold the lock.
    #[error("lock is not held by the calling thread")]
    NotHeld,

    /// A shared holder asked for exclusive access.
    #[error("cannot upgrade a shared hold to exclusive")]
    UpgradeDenied,
}

/// Access mode of a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Many holders may coexist.
    Shared,
    /// A single holder, domain-wide.
    Exclusive,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    thread: ThreadId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockState {
    /// Exclusive holder and its reentrancy depth.
    exclusive: Option<(ThreadId, usize)>,
    /// Shared holders and their reentrancy depths.
    shared: HashMap<ThreadId, usize>,
    /// FIFO wait queue.
    queue: VecDeque<Waiter>,
    /// Threads with a pending interrupt.
    interrupted: HashSet<ThreadId>,
    next_ticket: u64,
}

impl LockState {
    fn held_mode(&self, thread: ThreadId) -> Option<LockMode> {
        match self.exclusive {
            Some((owner, _)) if owner == thread => Some(LockMode::Exclusive),
            _ if self.shared.contains_key(&thread) => Some(LockMode::Shared),
            _ => None,
        }
    }

    fn depth(&self, thread: ThreadId) -> usize {
        match self.exclusive {
            Some((owner, depth)) if owner == thread => depth,
            _ => self.shared.get(&thread).copied().unwrap_or(0),
        }
    }

    fn enqueue(&mut self, thread: ThreadId, mode: LockMode) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.queue.push_back(Waiter {
            ticket,
            thread,
            mode,
        });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.queue.retain(|w| w.ticket != ticket);
    }

    fn can_grant(&self, ticket: u64, mode: LockMode) -> bool {
        if self.exclusive.is_some() {
            return false;
        }
        match mode {
            LockMode::Exclusive => {
                self.shared.is_empty() && self.queue.front().map(|w| w.ticket) == Some(ticket)
            }
            LockMode::Shared => self
                .queue
                .iter()
                .take_while(|w| w.ticket != ticket)
                .all(|w| w.mode == LockMode::Shared),
        }
    }

    fn grant(&mut self, thread: ThreadId, mode: LockMode, depth: usize) {
        match mode {
            LockMode::Exclusive => self.exclusive = Some((thread, depth)),
            LockMode::Shared => *self.shared.entry(thread).or_insert(0) += depth,
        }
    }

    fn reenter(&mut self, thread: ThreadId, depth: usize) {
        match self.exclusive.as_mut() {
            Some((owner, held)) if *owner == thread => *held += depth,
            _ => *self.shared.entry(thread).or_insert(0) += depth,
        }
    }

    /// Removes the whole hold of `thread`, returning its mode and depth.
    fn take_hold(&mut self, thread: ThreadId) -> Option<(LockMode, usize)> {
        match self.exclusive {
            Some((owner, depth)) if owner == thread => {
                self.exclusive = None;
                Some((LockMode::Exclusive, depth))
            }
            _ => self
                .shared
                .remove(&thread)
                .map(|depth| (LockMode::Shared, depth)),
        }
    }
}

/// The lock guarding one editing domain.
#[derive(Debug, Default)]
pub struct DomainLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl DomainLock {
    /// Creates an unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for the calling thread.
    ///
    /// Reentrant for a thread that already holds the lock in any mode, except
    /// that a shared holder cannot ask for exclusive access. Blocks until the
    /// request is compatible with the current holders and every waiter queued
    /// ahead of it, the thread is interrupted, or `timeout` elapses.
    pub fn acquire(&self, mode: LockMode, timeout: Option<Duration>) -> LockResult<()> {
        self.acquire_for(thread::current().id(), mode, timeout, true, 1)
    }

    fn acquire_for(
        &self,
        thread: ThreadId,
        mode: LockMode,
        timeout: Option<Duration>,
        interruptible: bool,
        depth: usize,
    ) -> LockResult<()> {
        let mut state = self.state.lock();

        if let Some(held) = state.held_mode(thread) {
            if held == LockMode::Shared && mode == LockMode::Exclusive {
                return Err(LockError::UpgradeDenied);
            }
            state.reenter(thread, depth);
            return Ok(());
        }

        if interruptible && state.interrupted.remove(&thread) {
            return Err(LockError::Interrupted);
        }

        let ticket = state.enqueue(thread, mode);
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        tracing::trace!(?thread, ?mode, ticket, "queued for domain lock");

        loop {
            if state.can_grant(ticket, mode) {
                state.dequeue(ticket);
                state.grant(thread, mode, depth);
                // Shared waiters behind this one may now be compatible too.
                self.cond.notify_all();
                tracing::trace!(?thread, ?mode, ticket, "domain lock granted");
                return Ok(());
            }

            if interruptible && state.interrupted.remove(&thread) {
                state.dequeue(ticket);
                self.cond.notify_all();
                return Err(LockError::Interrupted);
            }

            match deadline {
                Some(deadline) => {
                    let timed_out = self.cond.wait_until(&mut state, deadline).timed_out();
                    if timed_out && !state.can_grant(ticket, mode) {
                        state.dequeue(ticket);
                        self.cond.notify_all();
                        return Err(LockError::Timeout {
                            waited: start.elapsed(),
                        });
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    /// Releases one level of the calling thread's hold.
    ///
    /// At depth zero the lock is relinquished and waiters are woken.
    pub fn release(&self) -> LockResult<()> {
        let thread = thread::current().id();
        let mut state = self.state.lock();

        let relinquished = match state.exclusive.as_mut() {
            Some((owner, depth)) if *owner == thread => {
                *depth -= 1;
                if *depth == 0 {
                    state.exclusive = None;
                    true
                } else {
                    false
                }
            }
            _ => match state.shared.get_mut(&thread) {
                Some(depth) => {
                    *depth -= 1;
                    if *depth == 0 {
                        state.shared.remove(&thread);
                        true
                    } else {
                        false
                    }
                }
                None => return Err(LockError::NotHeld),
            },
        };

        if relinquished {
            self.cond.notify_all();
        }
        Ok(())
    }

    /// Lets queued waiters run, then reacquires.
    ///
    /// Returns `false` without releasing anything when nobody waits.
    /// Otherwise the hold is released completely, the thread re-queues behind
    /// the current waiters and reacquires at its original depth and mode.
    /// Reacquisition ignores interrupts.
    pub fn yield_now(&self) -> LockResult<bool> {
        let thread = thread::current().id();
        let (mode, depth) = {
            let mut state = self.state.lock();
            if state.held_mode(thread).is_none() {
                return Err(LockError::NotHeld);
            }
            if state.queue.is_empty() {
                return Ok(false);
            }
            let hold = state.take_hold(thread).ok_or(LockError::NotHeld)?;
            self.cond.notify_all();
            hold
        };

        tracing::trace!(?thread, ?mode, depth, "yielding domain lock");
        self.acquire_for(thread, mode, None, false, depth)?;
        Ok(true)
    }

    /// Hands the calling thread's hold to `to`, keeping mode and depth.
    pub fn transfer(&self, to: ThreadId) -> LockResult<()> {
        let thread = thread::current().id();
        if thread == to {
            return Ok(());
        }
        let mut state = self.state.lock();
        let (mode, depth) = state.take_hold(thread).ok_or(LockError::NotHeld)?;
        state.grant(to, mode, depth);
        tracing::trace!(from = ?thread, ?to, ?mode, depth, "domain lock transferred");
        Ok(())
    }

    /// Interrupts the current or next blocking acquire of `thread`.
    pub fn interrupt(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        if state.queue.iter().any(|w| w.thread == thread) {
            tracing::trace!(?thread, "interrupting waiting thread");
        }
        state.interrupted.insert(thread);
        self.cond.notify_all();
    }

    /// Returns the mode in which `thread` holds the lock.
    pub fn held_mode(&self, thread: ThreadId) -> Option<LockMode> {
        self.state.lock().held_mode(thread)
    }

    /// Returns the reentrancy depth of `thread` (zero if not held).
    pub fn depth(&self, thread: ThreadId) -> usize {
        self.state.lock().depth(thread)
    }

    /// Returns the number of queued waiters.
    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn wait_for_queue(lock: &DomainLock, n: usize) {
        while lock.waiting() < n {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn reentrant_exclusive() {
        let lock = DomainLock::new();
        let me = thread::current().id();
        lock.acquire(LockMode::Exclusive, None).unwrap();
        lock.acquire(LockMode::Exclusive, None).unwrap();
        lock.acquire(LockMode::Shared, None).unwrap();
        assert_eq!(lock.depth(me), 3);
        assert_eq!(lock.held_mode(me), Some(LockMode::Exclusive));

        lock.release().unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert_eq!(lock.held_mode(me), None);
        assert_eq!(lock.release(), Err(LockError::NotHeld));
    }

    #[test]
    fn shared_cannot_upgrade() {
        let lock = DomainLock::new();
        lock.acquire(LockMode::Shared, None).unwrap();
        assert_eq!(
            lock.acquire(LockMode::Exclusive, None),
            Err(LockError::UpgradeDenied)
        );
        assert_eq!(lock.depth(thread::current().id()), 1);
        lock.release().unwrap();
    }

    #[test]
    fn shared_holders_coexist() {
        let lock = Arc::new(DomainLock::new());
        lock.acquire(LockMode::Shared, None).unwrap();

        let other = Arc::clone(&lock);
        thread::spawn(move || {
            other
                .acquire(LockMode::Shared, Some(Duration::from_secs(5)))
                .unwrap();
            other.release().unwrap();
        })
        .join()
        .unwrap();

        lock.release().unwrap();
    }

    #[test]
    fn exclusive_times_out() {
        let lock = Arc::new(DomainLock::new());
        lock.acquire(LockMode::Exclusive, None).unwrap();

        let other = Arc::clone(&lock);
        let result = thread::spawn(move || {
            other.acquire(LockMode::Shared, Some(Duration::from_millis(20)))
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(LockError::Timeout { .. })));
        assert_eq!(lock.waiting(), 0);
        lock.release().unwrap();
    }

    #[test]
    fn shared_queues_behind_waiting_writer() {
        let lock = Arc::new(DomainLock::new());
        lock.acquire(LockMode::Shared, None).unwrap();

        let writer_lock = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            writer_lock.acquire(LockMode::Exclusive, None).unwrap();
            writer_lock.release().unwrap();
        });
        wait_for_queue(&lock, 1);

        let reader_lock = Arc::clone(&lock);
        let reader = thread::spawn(move || {
            reader_lock.acquire(LockMode::Shared, Some(Duration::from_millis(20)))
        })
        .join()
        .unwrap();
        assert!(matches!(reader, Err(LockError::Timeout { .. })));

        lock.release().unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn interrupt_wakes_waiter() {
        let lock = Arc::new(DomainLock::new());
        lock.acquire(LockMode::Exclusive, None).unwrap();

        let other = Arc::clone(&lock);
        let waiter = thread::spawn(move || other.acquire(LockMode::Exclusive, None));
        wait_for_queue(&lock, 1);
        lock.interrupt(waiter.thread().id());

        assert_eq!(waiter.join().unwrap(), Err(LockError::Interrupted));
        assert_eq!(lock.waiting(), 0);
        lock.release().unwrap();
    }

    #[test]
    fn pending_interrupt_fails_next_acquire() {
        let lock = DomainLock::new();
        lock.interrupt(thread::current().id());
        assert_eq!(
            lock.acquire(LockMode::Shared, None),
            Err(LockError::Interrupted)
        );
        lock.acquire(LockMode::Shared, None).unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn yield_without_waiters_is_noop() {
        let lock = DomainLock::new();
        lock.acquire(LockMode::Shared, None).unwrap();
        assert_eq!(lock.yield_now(), Ok(false));
        assert_eq!(lock.depth(thread::current().id()), 1);
        lock.release().unwrap();
        assert_eq!(lock.yield_now(), Err(LockError::NotHeld));
    }

    #[test]
    fn yield_lets_writer_in_and_restores_depth() {
        let lock = Arc::new(DomainLock::new());
        let me = thread::current().id();
        lock.acquire(LockMode::Shared, None).unwrap();
        lock.acquire(LockMode::Shared, None).unwrap();

        let writer_lock = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            writer_lock.acquire(LockMode::Exclusive, None).unwrap();
            writer_lock.release().unwrap();
            true
        });
        wait_for_queue(&lock, 1);

        assert_eq!(lock.yield_now(), Ok(true));
        assert!(writer.join().unwrap());
        assert_eq!(lock.depth(me), 2);
        assert_eq!(lock.held_mode(me), Some(LockMode::Shared));
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn transfer_moves_hold_and_back() {
        let lock = Arc::new(DomainLock::new());
        let me = thread::current().id();
        lock.acquire(LockMode::Exclusive, None).unwrap();
        lock.acquire(LockMode::Exclusive, None).unwrap();

        let other = Arc::clone(&lock);
        let helper = thread::spawn(move || {
            let id = thread::current().id();
            while other.depth(id) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            let seen = other.depth(id);
            other.transfer(me).unwrap();
            seen
        });

        lock.transfer(helper.thread().id()).unwrap();
        assert_eq!(helper.join().unwrap(), 2);
        assert_eq!(lock.depth(me), 2);
        assert_eq!(lock.held_mode(me), Some(LockMode::Exclusive));
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn transfer_requires_hold() {
        let lock = DomainLock::new();
        let helper = thread::spawn(|| ());
        let target = helper.thread().id();
        helper.join().unwrap();
        assert_eq!(lock.transfer(target), Err(LockError::NotHeld));
    }
}
