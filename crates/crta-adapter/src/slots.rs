//! Per `(command, instance)` wait slots.
//!
//! A blocking send arms its slot and gets a fresh generation plus a
//! one-shot receiver.  The response path signals the oldest outstanding
//! request of the slot.  A request that timed out stays queued as
//! *abandoned* for `stale_window`, so its late response is consumed without
//! waking a newer request on the same slot.
//!
//! Responses carry no generation, so a response consumed for an abandoned
//! request may really have answered the next one (the abandoned request's
//! own response was lost).  It is held on the next live request: if that
//! request gets no response of its own before its deadline, the held one
//! answers it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crta_types::{HicCommand, MAX_INSTANCES};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What a blocked sender receives: `Ok` or the negated coprocessor code.
pub(crate) type Signal = Result<(), i32>;

struct Outstanding {
    generation: u64,
    waiter: Option<oneshot::Sender<Signal>>,
    abandoned_at: Option<Instant>,
    held: Option<Signal>,
}

#[derive(Default)]
struct SlotState {
    blocking: bool,
    next_generation: u64,
    outstanding: VecDeque<Outstanding>,
}

impl SlotState {
    fn prune_expired(&mut self, now: Instant, window: Duration) {
        self.outstanding.retain(|o| match o.abandoned_at {
            Some(at) => now.saturating_duration_since(at) <= window,
            None => true,
        });
    }
}

/// Result of routing one response to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalOutcome {
    /// The slot is in non-blocking mode; nobody waits.
    NotBlocking,
    /// A waiting sender was woken.
    Delivered { generation: u64 },
    /// The response belonged to a request that already timed out.
    Stale { generation: u64 },
    /// Blocking slot, but no request is outstanding.
    NoWaiter,
}

pub(crate) struct WaitSlots {
    slots: Vec<Mutex<SlotState>>,
}

impl WaitSlots {
    pub(crate) fn new() -> Self {
        let count = MAX_INSTANCES as usize * HicCommand::COUNT;
        Self {
            slots: (0..count).map(|_| Mutex::new(SlotState::default())).collect(),
        }
    }

    fn slot(&self, command: HicCommand, instance: u32) -> MutexGuard<'_, SlotState> {
        let index = instance as usize * HicCommand::COUNT + command.id() as usize;
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every request of `instance`.  Senders still waiting observe a
    /// closed channel.
    pub(crate) fn reset_instance(&self, instance: u32) {
        for command in HicCommand::ALL {
            let mut slot = self.slot(command, instance);
            slot.blocking = false;
            slot.outstanding.clear();
        }
    }

    /// Register a new blocking request.
    pub(crate) fn arm(
        &self,
        command: HicCommand,
        instance: u32,
        now: Instant,
        stale_window: Duration,
    ) -> (u64, oneshot::Receiver<Signal>) {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.slot(command, instance);
        slot.prune_expired(now, stale_window);
        slot.blocking = true;
        let generation = slot.next_generation;
        slot.next_generation = slot.next_generation.wrapping_add(1);
        slot.outstanding.push_back(Outstanding {
            generation,
            waiter: Some(tx),
            abandoned_at: None,
            held: None,
        });
        (generation, rx)
    }

    /// Switch the slot to fire-and-forget; outstanding requests are dropped.
    pub(crate) fn mark_non_blocking(&self, command: HicCommand, instance: u32) {
        let mut slot = self.slot(command, instance);
        slot.blocking = false;
        slot.outstanding.clear();
    }

    /// Forget a request whose frame never left (transmit failure).
    pub(crate) fn disarm(&self, command: HicCommand, instance: u32, generation: u64) {
        self.slot(command, instance)
            .outstanding
            .retain(|o| o.generation != generation);
    }

    /// Time out a request.
    ///
    /// Returns the held response if one was consumed for an older abandoned
    /// request while this one waited; the request is then complete.
    /// Otherwise the request is abandoned and `None` is returned: its
    /// response, if it still arrives, is treated as stale.
    pub(crate) fn expire(
        &self,
        command: HicCommand,
        instance: u32,
        generation: u64,
        now: Instant,
    ) -> Option<Signal> {
        let mut slot = self.slot(command, instance);
        let position = slot
            .outstanding
            .iter()
            .position(|o| o.generation == generation)?;
        if let Some(held) = slot.outstanding[position].held {
            slot.outstanding.remove(position);
            return Some(held);
        }
        let entry = &mut slot.outstanding[position];
        entry.waiter = None;
        entry.abandoned_at = Some(now);
        None
    }

    /// Route one response to the slot.
    pub(crate) fn signal(
        &self,
        command: HicCommand,
        instance: u32,
        result: Signal,
        now: Instant,
        stale_window: Duration,
    ) -> SignalOutcome {
        let mut slot = self.slot(command, instance);
        if !slot.blocking {
            return SignalOutcome::NotBlocking;
        }
        slot.prune_expired(now, stale_window);
        while let Some(entry) = slot.outstanding.pop_front() {
            match entry.waiter {
                Some(waiter) => {
                    // The receiver may have been dropped by a cancelled send.
                    let _ = waiter.send(result);
                    return SignalOutcome::Delivered {
                        generation: entry.generation,
                    };
                }
                None if entry.abandoned_at.is_some() => {
                    if let Some(live) = slot.outstanding.iter_mut().find(|o| o.waiter.is_some()) {
                        live.held = Some(result);
                    }
                    return SignalOutcome::Stale {
                        generation: entry.generation,
                    };
                }
                None => continue,
            }
        }
        SignalOutcome::NoWaiter
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self, command: HicCommand, instance: u32) -> usize {
        self.slot(command, instance).outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[tokio::test]
    async fn response_wakes_the_armed_request() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (generation, rx) = slots.arm(HicCommand::Open, 2, now, WINDOW);

        let outcome = slots.signal(HicCommand::Open, 2, Err(-1), now, WINDOW);
        assert_eq!(outcome, SignalOutcome::Delivered { generation });
        assert_eq!(rx.await.unwrap(), Err(-1));
        assert_eq!(slots.outstanding(HicCommand::Open, 2), 0);
    }

    #[test]
    fn late_response_is_consumed_as_stale() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (old, _old_rx) = slots.arm(HicCommand::Start, 0, now, WINDOW);
        assert_eq!(slots.expire(HicCommand::Start, 0, old, now), None);
        let (new, mut new_rx) = slots.arm(HicCommand::Start, 0, now, WINDOW);

        // Response to the abandoned request.
        let outcome = slots.signal(HicCommand::Start, 0, Err(-1), now, WINDOW);
        assert_eq!(outcome, SignalOutcome::Stale { generation: old });
        assert!(new_rx.try_recv().is_err());

        // Response to the live one.
        let outcome = slots.signal(HicCommand::Start, 0, Ok(()), now, WINDOW);
        assert_eq!(outcome, SignalOutcome::Delivered { generation: new });
        assert_eq!(new_rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn lost_response_is_answered_by_the_held_one() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (old, _old_rx) = slots.arm(HicCommand::Open, 3, now, WINDOW);
        assert_eq!(slots.expire(HicCommand::Open, 3, old, now), None);
        let (new, mut new_rx) = slots.arm(HicCommand::Open, 3, now, WINDOW);

        // The only response: the old request's own answer was lost.
        let outcome = slots.signal(HicCommand::Open, 3, Ok(()), now, WINDOW);
        assert_eq!(outcome, SignalOutcome::Stale { generation: old });
        assert!(new_rx.try_recv().is_err());

        assert_eq!(slots.expire(HicCommand::Open, 3, new, now), Some(Ok(())));
        assert_eq!(slots.outstanding(HicCommand::Open, 3), 0);

        // A live request that got its own answer holds nothing.
        let (newest, _rx) = slots.arm(HicCommand::Open, 3, now, WINDOW);
        assert_eq!(slots.expire(HicCommand::Open, 3, newest, now), None);
    }

    #[test]
    fn abandoned_requests_expire() {
        let slots = WaitSlots::new();
        let start = Instant::now();
        let (old, _rx) = slots.arm(HicCommand::Stop, 1, start, WINDOW);
        assert_eq!(slots.expire(HicCommand::Stop, 1, old, start), None);
        let (new, mut rx) = slots.arm(HicCommand::Stop, 1, start, WINDOW);

        let later = start + WINDOW + Duration::from_millis(1);
        let outcome = slots.signal(HicCommand::Stop, 1, Ok(()), later, WINDOW);
        assert_eq!(outcome, SignalOutcome::Delivered { generation: new });
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn disarm_removes_request() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (generation, _rx) = slots.arm(HicCommand::PutBuf, 0, now, WINDOW);
        slots.disarm(HicCommand::PutBuf, 0, generation);
        assert_eq!(
            slots.signal(HicCommand::PutBuf, 0, Ok(()), now, WINDOW),
            SignalOutcome::NoWaiter
        );
    }

    #[test]
    fn non_blocking_slot_is_not_signalled() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let _armed = slots.arm(HicCommand::Close, 0, now, WINDOW);
        slots.mark_non_blocking(HicCommand::Close, 0);
        assert_eq!(
            slots.signal(HicCommand::Close, 0, Ok(()), now, WINDOW),
            SignalOutcome::NotBlocking
        );
    }

    #[test]
    fn reset_closes_waiters() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (_, mut rx) = slots.arm(HicCommand::Open, 4, now, WINDOW);
        slots.reset_instance(4);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn generations_increase_per_slot() {
        let slots = WaitSlots::new();
        let now = Instant::now();
        let (a, _ra) = slots.arm(HicCommand::Open, 0, now, WINDOW);
        let (b, _rb) = slots.arm(HicCommand::Open, 0, now, WINDOW);
        let (c, _rc) = slots.arm(HicCommand::Open, 1, now, WINDOW);
        assert_eq!(b, a + 1);
        assert_eq!(c, 0);
    }
}
