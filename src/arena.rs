//! Arena - per-instrument object pool with generation-checked tickets.
//!
//! An arena hands out owned instances and takes them back. Instances are
//! moved out on `acquire` (into a price level, an outbound channel, ...)
//! and moved back on `release`, so an instance is always owned by exactly
//! one place. The arena itself only remembers which slots are outstanding.
//!
//! Every instance carries an [`ArenaTicket`] (slot + generation). The
//! generation is bumped on each checkout, which lets `release` tell a
//! legitimate return from a stale or duplicated one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::warn;

/// Sentinel slot for instances that do not belong to any arena.
pub const DETACHED_SLOT: u32 = u32::MAX;

/// Position of an instance inside its arena plus the checkout generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaTicket {
    pub slot: u32,
    pub generation: u32,
}

impl ArenaTicket {
    /// Ticket of an instance not yet bound to a slot.
    pub const DETACHED: Self = Self {
        slot: DETACHED_SLOT,
        generation: 0,
    };

    #[inline]
    pub const fn is_detached(self) -> bool {
        self.slot == DETACHED_SLOT
    }
}

/// A type that can live in an [`Arena`].
///
/// `reset` must reinitialize every mutable field from `fields`; a reused
/// instance must be indistinguishable from a fresh one.
pub trait Pooled: Sized {
    /// Values applied on every checkout.
    type Fields;

    /// A blank instance bound to `instrument_id`.
    fn empty(instrument_id: Arc<str>, ticket: ArenaTicket) -> Self;

    /// Overwrite all per-use state.
    fn reset(&mut self, sequence: u64, fields: Self::Fields);

    fn ticket(&self) -> ArenaTicket;

    fn set_ticket(&mut self, ticket: ArenaTicket);

    fn instrument_id(&self) -> &str;
}

/// Free and outstanding instance counts of one arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub free: usize,
    pub in_use: usize,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    generation: u32,
    in_use: bool,
}

struct ArenaState<T> {
    /// Instances ready for reuse; their slots are not in use
    free: Vec<T>,
    slots: Vec<Slot>,
    /// Slots whose instance was dropped (free list was full)
    vacant: Vec<u32>,
    in_use: usize,
    next_sequence: u64,
}

impl<T> ArenaState<T> {
    fn claim_slot(&mut self) -> u32 {
        match self.vacant.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    in_use: false,
                });
                (self.slots.len() - 1) as u32
            }
        }
    }

    #[inline]
    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}

/// Outcome of a release, computed under the lock and logged after it.
enum Released {
    Ok,
    Stale(ArenaTicket),
    Foreign(String),
}

/// Object pool for one instrument.
///
/// `acquire` and `release` run in a single critical section. The arena
/// lock is a leaf lock: callers never hold a book lock while taking it.
pub struct Arena<T: Pooled> {
    instrument_id: Arc<str>,
    kind: &'static str,
    /// Upper bound on retained free instances
    max_free: usize,
    state: Mutex<ArenaState<T>>,
}

impl<T: Pooled> Arena<T> {
    /// Create an empty arena.
    ///
    /// # Arguments
    /// * `instrument_id` - Instrument every instance is bound to
    /// * `kind` - Label used in log lines (`"order"`, `"trade"`)
    /// * `max_free` - Free instances retained; extra releases are dropped
    pub fn new(instrument_id: Arc<str>, kind: &'static str, max_free: usize) -> Self {
        Self {
            instrument_id,
            kind,
            max_free,
            state: Mutex::new(ArenaState {
                free: Vec::new(),
                slots: Vec::new(),
                vacant: Vec::new(),
                in_use: 0,
                next_sequence: 1,
            }),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, ArenaState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out an instance with `fields` applied.
    ///
    /// Reuses a free instance when one exists, otherwise constructs one.
    /// Either way the instance gets a fresh sequence number.
    ///
    /// # Complexity
    /// O(1) amortized
    pub fn acquire(&self, fields: T::Fields) -> T {
        let mut state = self.lock();
        let sequence = state.next_sequence();

        let mut item = match state.free.pop() {
            Some(mut item) => {
                let slot = item.ticket().slot;
                let entry = &mut state.slots[slot as usize];
                entry.generation = entry.generation.wrapping_add(1);
                entry.in_use = true;
                item.set_ticket(ArenaTicket {
                    slot,
                    generation: entry.generation,
                });
                item
            }
            None => {
                let slot = state.claim_slot();
                let entry = &mut state.slots[slot as usize];
                entry.generation = entry.generation.wrapping_add(1);
                entry.in_use = true;
                let ticket = ArenaTicket {
                    slot,
                    generation: entry.generation,
                };
                T::empty(self.instrument_id.clone(), ticket)
            }
        };

        state.in_use += 1;
        item.reset(sequence, fields);
        item
    }

    /// Return an instance for reuse.
    ///
    /// Releasing something that is not outstanding is a caller bug: it is
    /// logged, and the instance is still taken in as a free instance.
    /// Instances bound to another instrument are logged and dropped.
    pub fn release(&self, mut item: T) {
        let outcome = {
            let mut state = self.lock();
            let ticket = item.ticket();

            if item.instrument_id() != &*self.instrument_id {
                Released::Foreign(item.instrument_id().to_owned())
            } else {
                let outstanding = !ticket.is_detached()
                    && state
                        .slots
                        .get(ticket.slot as usize)
                        .is_some_and(|s| s.in_use && s.generation == ticket.generation);

                if outstanding {
                    state.slots[ticket.slot as usize].in_use = false;
                    state.in_use -= 1;
                    if state.free.len() < self.max_free {
                        state.free.push(item);
                    } else {
                        state.vacant.push(ticket.slot);
                    }
                    Released::Ok
                } else {
                    // Adopt under a slot of our own so counts stay exact
                    if state.free.len() < self.max_free {
                        let slot = state.claim_slot();
                        let generation = state.slots[slot as usize].generation;
                        item.set_ticket(ArenaTicket { slot, generation });
                        state.free.push(item);
                    }
                    Released::Stale(ticket)
                }
            }
        };

        match outcome {
            Released::Ok => {}
            Released::Stale(ticket) => warn!(
                instrument = %self.instrument_id,
                kind = self.kind,
                slot = ticket.slot,
                generation = ticket.generation,
                "released an instance that was not in use"
            ),
            Released::Foreign(other) => warn!(
                instrument = %self.instrument_id,
                kind = self.kind,
                owner = %other,
                "released an instance bound to another instrument; dropped"
            ),
        }
    }

    /// Free and in-use counts.
    pub fn counts(&self) -> PoolCounts {
        let state = self.lock();
        PoolCounts {
            free: state.free.len(),
            in_use: state.in_use,
        }
    }

    /// Pre-construct up to `count` free instances (bounded by `max_free`).
    ///
    /// Moves construction cost out of the hot path at startup.
    pub fn warm_up(&self, count: usize) {
        let mut state = self.lock();
        let target = count.min(self.max_free);
        while state.free.len() < target {
            let slot = state.claim_slot();
            let ticket = ArenaTicket {
                slot,
                generation: state.slots[slot as usize].generation,
            };
            state.free.push(T::empty(self.instrument_id.clone(), ticket));
        }
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }
}

impl<T: Pooled> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        f.debug_struct("Arena")
            .field("instrument", &self.instrument_id)
            .field("kind", &self.kind)
            .field("free", &counts.free)
            .field("in_use", &counts.in_use)
            .field("max_free", &self.max_free)
            .finish()
    }
}
