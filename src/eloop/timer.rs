//! Deadline-ordered timer list for the engine loop.
//!
//! The loop consults [`TimerList::until_next`] to bound its wait on the
//! event register, then fires at most one due entry per iteration via
//! [`TimerList::pop_due`]. An entry is removed from the list before its
//! handler runs, so a handler may re-register the same key.

use std::time::{Duration, Instant};

/// Identity of a timer entry, used for cancellation. The owner half groups
/// entries belonging to one subsystem, the user half distinguishes entries
/// within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerKey {
    owner: u32,
    user: u32,
}

impl TimerKey {
    pub const fn new(owner: u32, user: u32) -> Self {
        Self { owner, user }
    }
}

/// One pending timer, removed from the list exactly once: either popped as
/// due or cancelled.
pub struct TimerEntry<C> {
    deadline: Instant,
    key: TimerKey,
    handler: Box<dyn FnOnce(&mut C) + Send>,
}

impl<C> TimerEntry<C> {
    pub fn key(&self) -> TimerKey {
        self.key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Consume the entry and run its handler.
    pub fn fire(self, ctx: &mut C) {
        (self.handler)(ctx);
    }
}

/// List of timer entries kept sorted by deadline ascending. Entries with
/// equal deadlines fire in registration order.
pub struct TimerList<C> {
    entries: Vec<TimerEntry<C>>,
}

impl<C> TimerList<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert an entry firing `delay` from now.
    pub fn register<F>(&mut self, delay: Duration, key: TimerKey, handler: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let position = self
            .entries
            .iter()
            .position(|entry| entry.deadline > deadline)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            TimerEntry {
                deadline,
                key,
                handler: Box::new(handler),
            },
        );
    }

    /// Remove the first entry matching `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.entries.iter().position(|entry| entry.key == key) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, key: TimerKey) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    /// Earliest deadline among pending entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.deadline)
    }

    /// Time remaining until the earliest deadline; zero if already due.
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Remove and return the earliest entry if it is due at `now`. At most
    /// one entry per call; the loop calls this once per iteration so timer
    /// work cannot starve message dispatch.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry<C>> {
        if self.entries.first()?.deadline <= now {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<C> Default for TimerList<C> {
    fn default() -> Self {
        Self::new()
    }
}
