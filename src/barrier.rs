use crate::error::BarrierError;
use crate::shutdown::Interruptible;
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Reusable rendezvous point for a fixed number of parties.
///
/// Every party calls [`CyclicBarrier::wait`] once per round. The last party
/// to arrive releases the others, resets the arrival count and starts the
/// next generation under the same lock, so a waiter from generation `g`
/// can never be released by arrivals belonging to `g + 1`.
///
/// There is no timeout. The barrier only stays live while every party
/// arrives the same number of times; anything that makes a party leave
/// early must call [`CyclicBarrier::break_barrier`] (the pipeline does this
/// through its shutdown controller) so the remaining parties are released
/// with [`BarrierError::Broken`] instead of waiting forever.
#[derive(Debug)]
pub struct CyclicBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

/// What a successful [`CyclicBarrier::wait`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// Generation that this wait completed (first round is 0)
    pub generation: u64,
    /// True for exactly one party per generation: the one that arrived last
    pub is_leader: bool,
}

impl CyclicBarrier {
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier needs at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            released: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of completed generations
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Block until all parties of the current generation have arrived
    pub fn wait(&self) -> Result<BarrierWaitResult, BarrierError> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(BarrierError::Broken);
        }

        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            drop(state);
            self.released.notify_all();
            return Ok(BarrierWaitResult {
                generation,
                is_leader: true,
            });
        }

        // A bumped generation means our round completed, even if the barrier
        // was broken right afterwards.
        while state.generation == generation {
            if state.broken {
                return Err(BarrierError::Broken);
            }
            self.released.wait(&mut state);
        }

        Ok(BarrierWaitResult {
            generation,
            is_leader: false,
        })
    }

    /// Release every current waiter with [`BarrierError::Broken`] and make
    /// all later waits fail immediately.
    pub fn break_barrier(&self) {
        let mut state = self.state.lock();
        state.broken = true;
        state.arrived = 0;
        drop(state);
        self.released.notify_all();
    }
}

impl Interruptible for CyclicBarrier {
    fn interrupt(&self) {
        self.break_barrier();
    }
}
