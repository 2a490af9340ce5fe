//! The pulse scheduler: one-shot, cancellable, re-armable callbacks.
//!
//! Each peripheral owns its own `PulseScheduler<C>`, where `C` is a small
//! enum naming that peripheral's callbacks (e.g. a cassette pulse request or
//! an FDC command/motor timer). Keeping the scheduler generic per-peripheral
//! avoids the cyclic `Computer <-> peripheral <-> Clock` ownership the design
//! notes warn about — callbacks never reach across peripheral boundaries, so
//! there is nothing to own back-references to.

use crate::{Clock, Ticks};

/// The time basis a pulse request is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseBasis {
    /// Delay expressed directly in ticks.
    Ticks(u64),
    /// Delay expressed in microseconds, converted via the clock's tick rate.
    Micros(u64),
}

impl PulseBasis {
    #[must_use]
    pub const fn as_ticks(self) -> Ticks {
        match self {
            PulseBasis::Ticks(t) => Ticks::new(t),
            PulseBasis::Micros(us) => Ticks::from_micros(us, crate::TICKS_PER_SECOND),
        }
    }
}

/// A handle to a scheduled pulse request.
///
/// Combines a slot index with a generation counter so that a handle to an
/// expired or already-fired request can never alias a later request reusing
/// the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseHandle {
    slot: usize,
    generation: u64,
}

struct Slot<C> {
    fire_at: Ticks,
    callback: C,
    generation: u64,
    live: bool,
}

/// A scheduler of one-shot pulse requests for a single peripheral.
pub struct PulseScheduler<C> {
    slots: Vec<Slot<C>>,
    next_generation: u64,
}

impl<C: Copy> PulseScheduler<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_generation: 1,
        }
    }

    /// Register a new pulse request, firing `callback` once `delay` has
    /// elapsed from `clock`'s current tick count.
    pub fn schedule(&mut self, clock: &Clock, delay: PulseBasis, callback: C) -> PulseHandle {
        let fire_at = clock.tick_count() + delay.as_ticks();
        let generation = self.next_generation;
        self.next_generation += 1;

        let slot = Slot {
            fire_at,
            callback,
            generation,
            live: true,
        };

        if let Some(idx) = self.slots.iter().position(|s| !s.live) {
            self.slots[idx] = slot;
            PulseHandle {
                slot: idx,
                generation,
            }
        } else {
            self.slots.push(slot);
            PulseHandle {
                slot: self.slots.len() - 1,
                generation,
            }
        }
    }

    /// Cancel a pending request. A stale or already-fired handle is a no-op.
    pub fn expire(&mut self, handle: PulseHandle) {
        if let Some(slot) = self.slots.get_mut(handle.slot) {
            if slot.live && slot.generation == handle.generation {
                slot.live = false;
            }
        }
    }

    /// Whether the handle still refers to a pending (not yet fired, not
    /// expired) request.
    #[must_use]
    pub fn is_pending(&self, handle: PulseHandle) -> bool {
        self.slots
            .get(handle.slot)
            .is_some_and(|s| s.live && s.generation == handle.generation)
    }

    /// Whether any request is currently pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| s.live)
    }

    /// Pop every request whose `fire_at` has been reached, in registration
    /// order (ties at the same tick resolve in the order they were
    /// scheduled, per the ordering rule in the concurrency model).
    pub fn poll(&mut self, now: Ticks) -> Vec<C> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            if slot.live && slot.fire_at <= now {
                due.push(slot.callback);
                slot.live = false;
            }
        }
        due
    }
}

impl<C: Copy> Default for PulseScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Cb {
        A,
        B,
        C,
    }

    #[test]
    fn fires_in_registration_order_for_same_tick() {
        let mut clock = Clock::new();
        let mut sched = PulseScheduler::<Cb>::new();
        sched.schedule(&clock, PulseBasis::Ticks(10), Cb::A);
        sched.schedule(&clock, PulseBasis::Ticks(10), Cb::B);
        sched.schedule(&clock, PulseBasis::Ticks(10), Cb::C);

        clock.advance(Ticks::new(10));
        assert_eq!(sched.poll(clock.tick_count()), vec![Cb::A, Cb::B, Cb::C]);
    }

    #[test]
    fn expired_request_never_fires() {
        let mut clock = Clock::new();
        let mut sched = PulseScheduler::<Cb>::new();
        let handle = sched.schedule(&clock, PulseBasis::Ticks(5), Cb::A);
        sched.expire(handle);

        clock.advance(Ticks::new(100));
        assert!(sched.poll(clock.tick_count()).is_empty());
        assert!(!sched.is_pending(handle));
    }

    #[test]
    fn reschedule_is_expire_then_register() {
        let mut clock = Clock::new();
        let mut sched = PulseScheduler::<Cb>::new();
        let first = sched.schedule(&clock, PulseBasis::Ticks(5), Cb::A);
        sched.expire(first);
        let second = sched.schedule(&clock, PulseBasis::Ticks(5), Cb::B);

        clock.advance(Ticks::new(5));
        assert_eq!(sched.poll(clock.tick_count()), vec![Cb::B]);
        assert!(!sched.is_pending(first));
        assert!(!sched.is_pending(second));
    }

    #[test]
    fn micros_basis_converts_via_tick_rate() {
        let clock = Clock::new();
        let mut sched = PulseScheduler::<Cb>::new();
        let handle = sched.schedule(&clock, PulseBasis::Micros(30), Cb::A);
        assert!(sched.is_pending(handle));
    }

    #[test]
    fn not_yet_due_requests_stay_pending() {
        let mut clock = Clock::new();
        let mut sched = PulseScheduler::<Cb>::new();
        sched.schedule(&clock, PulseBasis::Ticks(1_000), Cb::A);

        clock.advance(Ticks::new(10));
        assert!(sched.poll(clock.tick_count()).is_empty());
        assert!(sched.has_pending());
    }
}
