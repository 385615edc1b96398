//! Fair wait queue for idle connections.
//!
//! The queue lives inside the pool's state and is protected by the pool's
//! mutex. Blocking polls park on the queue's condition variable, which
//! releases that mutex while waiting so other threads can still check
//! connections in.
//!
//! Waiters are served strictly in arrival order: each blocked poller holds a
//! ticket, and an element is only taken by the holder of the oldest ticket. A
//! non-blocking poll only succeeds when there are more idle elements than
//! blocked waiters, so a newcomer never takes an element a waiter is owed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};

use crate::error::{PoolError, Result};

/// A FIFO-fair queue of idle elements with blocking, timeout-bounded polls.
pub struct WaitQueue<T> {
    items: VecDeque<T>,
    waiters: VecDeque<u64>,
    next_ticket: u64,
    cond: Arc<Condvar>,
}

impl<T> WaitQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            waiters: VecDeque::new(),
            next_ticket: 0,
            cond: Arc::new(Condvar::new()),
        }
    }

    /// Add an element and wake the waiters.
    pub fn add(&mut self, item: T) {
        self.items.push_back(item);
        self.signal();
    }

    /// Remove `item` if it is queued. Returns whether it was.
    pub fn remove(&mut self, item: &T) -> bool
    where
        T: PartialEq,
    {
        match self.items.iter().position(|queued| queued == item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return every queued element.
    pub fn clear(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Whether `item` is queued.
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.items.contains(item)
    }

    /// Number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of callers blocked in a poll.
    #[must_use]
    pub fn num_waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Whether any caller is blocked in a poll.
    #[must_use]
    pub fn any_waiting(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// Take an element without blocking, if doing so would not jump the line.
    pub fn try_poll(&mut self) -> Option<T> {
        if self.items.len() > self.waiters.len() {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Poll the queue living in the state behind `guard`.
    ///
    /// Without a timeout this is [`try_poll`](Self::try_poll). With one it
    /// blocks until an element is handed over or the timeout elapses.
    pub fn poll<S, P>(
        guard: &mut MutexGuard<'_, S>,
        queue: P,
        timeout: Option<Duration>,
    ) -> Result<Option<T>>
    where
        P: Fn(&mut S) -> &mut Self,
    {
        match timeout {
            None => Ok(queue(&mut **guard).try_poll()),
            Some(timeout) => Self::wait_poll(guard, queue, timeout).map(Some),
        }
    }

    /// Block for up to `timeout` until an element is handed to this caller.
    ///
    /// On timeout the caller's place in line is given up and the pool state
    /// is left as if it never waited.
    pub fn wait_poll<S, P>(guard: &mut MutexGuard<'_, S>, queue: P, timeout: Duration) -> Result<T>
    where
        P: Fn(&mut S) -> &mut Self,
    {
        if let Some(item) = queue(&mut **guard).try_poll() {
            return Ok(item);
        }

        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let (ticket, cond) = {
            let q = queue(&mut **guard);
            let ticket = q.next_ticket;
            q.next_ticket = q.next_ticket.wrapping_add(1);
            q.waiters.push_back(ticket);
            (ticket, Arc::clone(&q.cond))
        };
        tracing::trace!(ticket = ticket, waiting = queue(&mut **guard).num_waiting(), "waiting for connection");

        loop {
            let q = queue(&mut **guard);
            if q.waiters.front() == Some(&ticket) {
                if let Some(item) = q.items.pop_front() {
                    q.waiters.pop_front();
                    q.signal();
                    return Ok(item);
                }
            }

            let now = Instant::now();
            match deadline {
                Some(deadline) if now >= deadline => {
                    q.waiters.retain(|waiting| *waiting != ticket);
                    q.signal();
                    return Err(PoolError::Timeout {
                        requested: timeout,
                        elapsed: now.duration_since(start),
                    });
                }
                Some(deadline) => {
                    cond.wait_until(guard, deadline);
                }
                None => cond.wait(guard),
            }
        }
    }

    fn signal(&self) {
        if !self.waiters.is_empty() && !self.items.is_empty() {
            self.cond.notify_all();
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WaitQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("len", &self.items.len())
            .field("waiting", &self.waiters.len())
            .finish()
    }
}
