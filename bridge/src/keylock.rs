//! Per-key request serialization. Requests are ticketed in arrival order and
//! served one at a time per key, so two edits of the same record reach the
//! peer in the order the user made them.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

/// What a native request is about. Requests sharing a key never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKey {
    Page(String),
    Book(i64),
    ExtInfo(i64),
}

#[derive(Debug, Default)]
struct Queue {
    issued: u64,
    serving: u64,
}

#[derive(Default)]
pub struct KeyLocks {
    queues: Mutex<HashMap<RequestKey, Queue>>,
    freed: Condvar,
}

/// A place in line for one key. Must be redeemed with [`KeyLocks::wait_turn`].
#[derive(Debug)]
#[must_use]
pub struct Ticket {
    key: RequestKey,
    number: u64,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<RequestKey, Queue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, key: RequestKey) -> Ticket {
        let mut queues = self.queues();
        let queue = queues.entry(key.clone()).or_default();
        let number = queue.issued;
        queue.issued += 1;
        Ticket { key, number }
    }

    /// Blocks until every earlier ticket for the same key has been released.
    pub fn wait_turn(&self, ticket: Ticket) -> KeyGuard<'_> {
        let mut queues = self.queues();
        while queues
            .get(&ticket.key)
            .is_some_and(|q| q.serving != ticket.number)
        {
            queues = self.freed.wait(queues).unwrap_or_else(|e| e.into_inner());
        }
        KeyGuard {
            locks: self,
            key: ticket.key,
        }
    }

    pub fn acquire(&self, key: RequestKey) -> KeyGuard<'_> {
        let ticket = self.enqueue(key);
        self.wait_turn(ticket)
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: RequestKey,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut queues = self.locks.queues();
        if let Some(queue) = queues.get_mut(&self.key) {
            queue.serving += 1;
            if queue.serving == queue.issued {
                queues.remove(&self.key);
            }
        }
        self.locks.freed.notify_all();
    }
}
