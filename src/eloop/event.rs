//! Event flags and per-flag message queues.
//!
//! Two primitives live here:
//!
//! - [`EventGroup`] is a 32-bit flag mask with async wait/signal semantics.
//!   Waiters block until any bit of their mask is set and consume the bits
//!   they matched. This is what the command/response bridge uses for
//!   completion signaling.
//! - [`EventRegister`] is a bounded set of event slots, each pairing one bit
//!   of a wake mask with a FIFO queue of typed messages and a handler. The
//!   engine loop blocks on the register and dispatches each signaled slot's
//!   handler once per iteration.
//!
//! # Example
//!
//! ```ignore
//! let group = EventGroup::new();
//! group.signal(0b01);
//! let hit = group.wait(0b11).await; // returns 0b01, bit consumed
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Maximum number of event slots in one register.
pub const MAX_EVENT_SLOTS: usize = 16;

/// Errors from the event-loop subsystem.
#[derive(Debug, PartialEq, Eq)]
pub enum EloopError {
    /// All event slots are in use.
    RegisterFull,
    /// The slot index does not name a registered slot.
    UnknownSlot,
    /// The loop is already running for this role.
    AlreadyRunning,
}

impl std::fmt::Display for EloopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegisterFull => write!(f, "event register is full"),
            Self::UnknownSlot => write!(f, "unknown event slot"),
            Self::AlreadyRunning => write!(f, "loop already running for role"),
        }
    }
}

impl std::error::Error for EloopError {}

/// A 32-bit wait/signal flag group.
///
/// Signaling sets bits; waiting blocks until any bit of the caller's mask is
/// set, then clears and returns the matched bits. Distinct callers should
/// wait on disjoint masks, otherwise whichever waiter wakes first wins.
pub struct EventGroup {
    bits: Mutex<u32>,
    notify: Notify,
}

impl EventGroup {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set bits and wake all waiters.
    pub fn signal(&self, bits: u32) {
        *self.lock() |= bits;
        self.notify.notify_waiters();
    }

    /// Clear bits without waking anyone.
    pub fn clear(&self, bits: u32) {
        *self.lock() &= !bits;
    }

    /// Currently set bits within `mask`, without consuming them.
    pub fn peek(&self, mask: u32) -> u32 {
        *self.lock() & mask
    }

    /// Wait until any bit in `mask` is set; consume and return the matched
    /// bits.
    pub async fn wait(&self, mask: u32) -> u32 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a signal racing with the
            // check still wakes us.
            notified.as_mut().enable();
            {
                let mut bits = self.lock();
                let hit = *bits & mask;
                if hit != 0 {
                    *bits &= !hit;
                    return hit;
                }
            }
            notified.await;
        }
    }

    /// Bounded [`wait`](Self::wait). Returns `None` when the deadline passes
    /// with no matching bit.
    pub async fn wait_timeout(&self, mask: u32, dur: Duration) -> Option<u32> {
        tokio::time::timeout(dur, self.wait(mask)).await.ok()
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler invoked for a signaled slot. Receives the messages queued on that
/// slot and is expected to drain them; anything left behind is re-queued and
/// the slot stays signaled.
pub type SlotHandler<C, M> = fn(&mut C, &mut VecDeque<M>);

/// Handle naming one registered slot. Cheap to copy; required for posting.
#[derive(Debug, Clone, Copy)]
pub struct SlotHandle {
    index: usize,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bit(&self) -> u32 {
        1 << self.index
    }
}

struct Slot<C, M> {
    handler: SlotHandler<C, M>,
    queue: VecDeque<M>,
}

struct RegisterState<C, M> {
    slots: Vec<Option<Slot<C, M>>>,
    signaled: u32,
}

/// Bounded set of event slots driving a single consumer loop.
///
/// Producers [`post`](Self::post) messages from any task; the loop waits via
/// [`wait_signaled`](Self::wait_signaled) and then calls
/// [`dispatch`](Self::dispatch), which invokes each signaled slot's handler
/// exactly once for that iteration.
pub struct EventRegister<C, M> {
    state: Mutex<RegisterState<C, M>>,
    notify: Notify,
}

impl<C, M> EventRegister<C, M> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_EVENT_SLOTS);
        slots.resize_with(MAX_EVENT_SLOTS, || None);
        Self {
            state: Mutex::new(RegisterState { slots, signaled: 0 }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegisterState<C, M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next free slot for `handler`.
    pub fn register(&self, handler: SlotHandler<C, M>) -> Result<SlotHandle, EloopError> {
        let mut state = self.lock();
        for (index, slot) in state.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot {
                    handler,
                    queue: VecDeque::new(),
                });
                return Ok(SlotHandle { index });
            }
        }
        Err(EloopError::RegisterFull)
    }

    /// Enqueue a message on `handle`'s slot, mark it signaled and wake the
    /// loop. Messages are delivered to the handler in posting order.
    pub fn post(&self, handle: &SlotHandle, message: M) -> Result<(), EloopError> {
        {
            let mut state = self.lock();
            let slot = state
                .slots
                .get_mut(handle.index)
                .and_then(Option::as_mut)
                .ok_or(EloopError::UnknownSlot)?;
            slot.queue.push_back(message);
            state.signaled |= handle.bit();
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Wait until at least one slot is signaled; returns the signaled mask
    /// without clearing it.
    pub async fn wait_signaled(&self) -> u32 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.lock();
                if state.signaled != 0 {
                    return state.signaled;
                }
            }
            notified.await;
        }
    }

    /// Bounded [`wait_signaled`](Self::wait_signaled); returns 0 when the
    /// deadline passes with nothing signaled.
    pub async fn wait_signaled_timeout(&self, dur: Duration) -> u32 {
        tokio::time::timeout(dur, self.wait_signaled())
            .await
            .unwrap_or(0)
    }

    /// Invoke each signaled slot's handler once, passing it the slot's
    /// queued messages. A handler that leaves messages in the queue keeps
    /// the slot signaled for the next iteration. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&self, ctx: &mut C) -> usize {
        let mut handled = 0;
        for index in 0..MAX_EVENT_SLOTS {
            let bit = 1u32 << index;
            let (handler, mut pending) = {
                let mut state = self.lock();
                if state.signaled & bit == 0 {
                    continue;
                }
                state.signaled &= !bit;
                match state.slots[index].as_mut() {
                    Some(slot) => (slot.handler, std::mem::take(&mut slot.queue)),
                    None => continue,
                }
            };
            handler(ctx, &mut pending);
            if !pending.is_empty() {
                // Undrained messages go back ahead of anything posted while
                // the handler ran, keeping FIFO order intact.
                let mut state = self.lock();
                if let Some(slot) = state.slots[index].as_mut() {
                    while let Some(message) = pending.pop_back() {
                        slot.queue.push_front(message);
                    }
                    state.signaled |= bit;
                }
            }
            handled += 1;
        }
        handled
    }

    /// Drop all queued messages and clear all signaled bits, keeping the
    /// registered handlers. Called when the loop (re)starts so stale state
    /// from a previous run cannot leak into the new one.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.signaled = 0;
        for slot in state.slots.iter_mut().flatten() {
            slot.queue.clear();
        }
    }

    /// Number of messages currently queued on `handle`'s slot.
    pub fn queued(&self, handle: &SlotHandle) -> usize {
        self.lock()
            .slots
            .get(handle.index)
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.queue.len())
    }
}

impl<C, M> Default for EventRegister<C, M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // ==================== EventGroup Tests ====================

    #[tokio::test]
    async fn group_wait_consumes_matched_bits() {
        let group = EventGroup::new();
        group.signal(0b101);
        let hit = group.wait(0b001).await;
        assert_eq!(hit, 0b001);
        // Unmatched bit stays set.
        assert_eq!(group.peek(u32::MAX), 0b100);
    }

    #[tokio::test]
    async fn group_wakes_pending_waiter() {
        let group = Arc::new(EventGroup::new());
        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.wait(0b10).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        group.signal(0b10);
        assert_eq!(waiter.await.unwrap(), 0b10);
    }

    #[tokio::test]
    async fn group_wait_timeout_expires() {
        let group = EventGroup::new();
        let hit = group.wait_timeout(0b1, Duration::from_millis(10)).await;
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn group_clear_removes_bits() {
        let group = EventGroup::new();
        group.signal(0b11);
        group.clear(0b01);
        assert_eq!(group.peek(u32::MAX), 0b10);
    }

    // ==================== EventRegister Tests ====================

    struct TestCtx {
        seen: Vec<u32>,
    }

    fn drain_all(ctx: &mut TestCtx, queue: &mut VecDeque<u32>) {
        while let Some(message) = queue.pop_front() {
            ctx.seen.push(message);
        }
    }

    fn drain_one(ctx: &mut TestCtx, queue: &mut VecDeque<u32>) {
        if let Some(message) = queue.pop_front() {
            ctx.seen.push(message);
        }
    }

    #[test]
    fn messages_delivered_in_fifo_order() {
        let register: EventRegister<TestCtx, u32> = EventRegister::new();
        let slot = register.register(drain_all).unwrap();
        for message in [1, 2, 3] {
            register.post(&slot, message).unwrap();
        }
        let mut ctx = TestCtx { seen: Vec::new() };
        let handled = register.dispatch(&mut ctx);
        assert_eq!(handled, 1);
        assert_eq!(ctx.seen, vec![1, 2, 3]);
    }

    #[test]
    fn handler_runs_once_per_iteration() {
        let register: EventRegister<TestCtx, u32> = EventRegister::new();
        let slot = register.register(drain_one).unwrap();
        register.post(&slot, 1).unwrap();
        register.post(&slot, 2).unwrap();

        let mut ctx = TestCtx { seen: Vec::new() };
        // First iteration: one invocation, one message; the leftover keeps
        // the slot signaled.
        assert_eq!(register.dispatch(&mut ctx), 1);
        assert_eq!(ctx.seen, vec![1]);
        assert_eq!(register.queued(&slot), 1);
        // Second iteration picks up the leftover.
        assert_eq!(register.dispatch(&mut ctx), 1);
        assert_eq!(ctx.seen, vec![1, 2]);
        // Nothing signaled any more.
        assert_eq!(register.dispatch(&mut ctx), 0);
    }

    #[test]
    fn register_rejects_seventeenth_slot() {
        let register: EventRegister<TestCtx, u32> = EventRegister::new();
        for _ in 0..MAX_EVENT_SLOTS {
            register.register(drain_all).unwrap();
        }
        assert!(matches!(
            register.register(drain_all),
            Err(EloopError::RegisterFull)
        ));
    }

    #[test]
    fn reset_drops_queued_messages() {
        let register: EventRegister<TestCtx, u32> = EventRegister::new();
        let slot = register.register(drain_all).unwrap();
        register.post(&slot, 7).unwrap();
        register.reset();
        let mut ctx = TestCtx { seen: Vec::new() };
        assert_eq!(register.dispatch(&mut ctx), 0);
        assert!(ctx.seen.is_empty());
    }

    #[tokio::test]
    async fn post_wakes_waiting_loop() {
        let register: Arc<EventRegister<TestCtx, u32>> = Arc::new(EventRegister::new());
        let slot = register.register(drain_all).unwrap();
        let waiter = {
            let register = register.clone();
            tokio::spawn(async move { register.wait_signaled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        register.post(&slot, 42).unwrap();
        assert_eq!(waiter.await.unwrap(), slot.bit());
    }

    #[tokio::test]
    async fn wait_signaled_timeout_returns_zero() {
        let register: EventRegister<TestCtx, u32> = EventRegister::new();
        assert_eq!(
            register.wait_signaled_timeout(Duration::from_millis(10)).await,
            0
        );
    }
}
