//! Snowflake identifier generator.
//!
//! Layout of a generated id, most significant bit first:
//!
//! ```text
//! 0 | 41 bits: ms since EPOCH_MS | 10 bits: machine | 12 bits: sequence
//! ```
//!
//! One generator is shared process-wide. All state lives behind a single
//! mutex, so ids from one instance are unique and strictly increasing while
//! the wall clock does not move backwards. A backwards clock is reported as
//! [`ClockError::Rollback`] and no id is produced.

use crate::error::{ClockError, ConfigError};
use crate::EntityId;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: i64 = 1_704_067_200_000;
pub const MACHINE_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;
pub const MAX_MACHINE_ID: i64 = (1 << MACHINE_BITS) - 1;
pub const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = MACHINE_BITS + SEQUENCE_BITS;

// ============================================================================
// CLOCKS
// ============================================================================

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Result<i64, ClockError>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Result<i64, ClockError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ClockError::Unreadable {
                reason: e.to_string(),
            })?;
        i64::try_from(elapsed.as_millis()).map_err(|_| ClockError::Unreadable {
            reason: format!("{}ms since the Unix epoch does not fit in i64", elapsed.as_millis()),
        })
    }
}

/// A clock that only moves when told to. Useful in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Result<i64, ClockError> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> Result<i64, ClockError> {
        (**self).now_millis()
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

#[derive(Debug)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Time-ordered 64-bit id generator.
#[derive(Debug)]
pub struct IdGenerator<C: Clock = SystemClock> {
    machine_id: i64,
    clock: C,
    state: Mutex<State>,
}

impl IdGenerator<SystemClock> {
    /// Create a generator on the system clock.
    pub fn new(machine_id: i64) -> Result<Self, ConfigError> {
        Self::with_clock(machine_id, SystemClock)
    }
}

impl<C: Clock> IdGenerator<C> {
    /// Create a generator reading time from `clock`.
    ///
    /// `machine_id` must fit in [`MACHINE_BITS`].
    pub fn with_clock(machine_id: i64, clock: C) -> Result<Self, ConfigError> {
        if !(0..=MAX_MACHINE_ID).contains(&machine_id) {
            return Err(ConfigError::InvalidValue {
                field: "machine_id".to_string(),
                value: machine_id.to_string(),
                reason: format!("must be in 0..={}", MAX_MACHINE_ID),
            });
        }
        Ok(Self {
            machine_id,
            clock,
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    pub fn machine_id(&self) -> i64 {
        self.machine_id
    }

    /// Produce the next id.
    ///
    /// Blocks only when 4096 ids were already issued in the current
    /// millisecond, spinning until the clock moves on.
    pub fn next_id(&self) -> Result<EntityId, ClockError> {
        // The state is two integers and is valid after any panic.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut now = self.clock.now_millis()?;
        if now < state.last_ms {
            return Err(ClockError::Rollback {
                last_ms: state.last_ms,
                now_ms: now,
            });
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                now = self.wait_next_millis(state.last_ms)?;
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now;
        Ok(compose(now, self.machine_id, state.sequence))
    }

    fn wait_next_millis(&self, last_ms: i64) -> Result<i64, ClockError> {
        let mut now = self.clock.now_millis()?;
        while now <= last_ms {
            std::hint::spin_loop();
            now = self.clock.now_millis()?;
        }
        Ok(now)
    }
}

fn compose(now_ms: i64, machine_id: i64, sequence: i64) -> EntityId {
    ((now_ms - EPOCH_MS) << TIMESTAMP_SHIFT) | (machine_id << SEQUENCE_BITS) | sequence
}

/// Parts of an id: `(unix_ms, machine_id, sequence)`.
pub fn decompose(id: EntityId) -> (i64, i64, i64) {
    let unix_ms = (id >> TIMESTAMP_SHIFT) + EPOCH_MS;
    let machine_id = (id >> SEQUENCE_BITS) & MAX_MACHINE_ID;
    let sequence = id & SEQUENCE_MASK;
    (unix_ms, machine_id, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Returns `base` for the first `threshold` reads and `base + 1` after.
    struct SteppingClock {
        base: i64,
        threshold: usize,
        reads: AtomicUsize,
    }

    impl Clock for SteppingClock {
        fn now_millis(&self) -> Result<i64, ClockError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(if n < self.threshold {
                self.base
            } else {
                self.base + 1
            })
        }
    }

    /// Plays back a script, then keeps ticking forward one ms per read.
    struct ScriptedClock {
        script: Mutex<(VecDeque<i64>, i64)>,
    }

    impl ScriptedClock {
        fn new(script: Vec<i64>) -> Self {
            let first = script.first().copied().unwrap_or(EPOCH_MS);
            Self {
                script: Mutex::new((script.into(), first)),
            }
        }
    }

    impl Clock for ScriptedClock {
        fn now_millis(&self) -> Result<i64, ClockError> {
            let mut guard = self.script.lock().unwrap();
            let (queue, last) = &mut *guard;
            let next = queue.pop_front().unwrap_or(*last + 1);
            *last = next;
            Ok(next)
        }
    }

    /// A clock whose reading cannot be represented.
    struct BrokenClock;

    impl Clock for BrokenClock {
        fn now_millis(&self) -> Result<i64, ClockError> {
            Err(ClockError::Unreadable {
                reason: "out of range".to_string(),
            })
        }
    }

    const T0: i64 = EPOCH_MS + 1_000;

    #[test]
    fn test_system_clock_reads_after_epoch() {
        let now = SystemClock.now_millis().unwrap();
        assert!(now > EPOCH_MS);
    }

    #[test]
    fn test_unreadable_clock_yields_no_id() {
        let gen = IdGenerator::with_clock(1, BrokenClock).unwrap();
        assert!(matches!(gen.next_id(), Err(ClockError::Unreadable { .. })));
    }

    #[test]
    fn test_rejects_machine_id_out_of_range() {
        assert!(IdGenerator::new(-1).is_err());
        assert!(IdGenerator::new(1024).is_err());
        assert!(IdGenerator::new(0).is_ok());
        assert!(IdGenerator::new(MAX_MACHINE_ID).is_ok());
    }

    #[test]
    fn test_layout_matches_formula() {
        let gen = IdGenerator::with_clock(5, ManualClock::new(T0)).unwrap();
        let id = gen.next_id().unwrap();
        assert_eq!(id, ((T0 - EPOCH_MS) << 22) | (5 << 12));
        assert_eq!(decompose(id), (T0, 5, 0));
    }

    #[test]
    fn test_sequence_increments_within_millisecond() {
        let gen = IdGenerator::with_clock(1, ManualClock::new(T0)).unwrap();
        let a = gen.next_id().unwrap();
        let b = gen.next_id().unwrap();
        assert_eq!(b, a + 1);
        assert_eq!(decompose(b).2, 1);
    }

    #[test]
    fn test_sequence_resets_on_new_millisecond() {
        let clock = Arc::new(ManualClock::new(T0));
        let gen = IdGenerator::with_clock(1, clock.clone()).unwrap();
        gen.next_id().unwrap();
        gen.next_id().unwrap();
        clock.advance(1);
        let id = gen.next_id().unwrap();
        assert_eq!(decompose(id), (T0 + 1, 1, 0));
    }

    #[test]
    fn test_clock_rollback_is_refused() {
        let clock = Arc::new(ManualClock::new(T0));
        let gen = IdGenerator::with_clock(1, clock.clone()).unwrap();
        gen.next_id().unwrap();

        clock.set(T0 - 5);
        let err = gen.next_id().unwrap_err();
        assert_eq!(
            err,
            ClockError::Rollback {
                last_ms: T0,
                now_ms: T0 - 5
            }
        );
        // Still refusing until the clock catches up.
        assert!(gen.next_id().is_err());

        clock.set(T0 + 1);
        assert!(gen.next_id().is_ok());
    }

    #[test]
    fn test_sequence_overflow_waits_for_next_millisecond() {
        let per_ms = (SEQUENCE_MASK + 1) as usize;
        let clock = SteppingClock {
            base: T0,
            threshold: per_ms + 1,
            reads: AtomicUsize::new(0),
        };
        let gen = IdGenerator::with_clock(1, clock).unwrap();

        let mut ids = Vec::with_capacity(per_ms + 1);
        for _ in 0..=per_ms {
            ids.push(gen.next_id().unwrap());
        }

        let (ms, _, seq) = decompose(ids[per_ms - 1]);
        assert_eq!((ms, seq), (T0, SEQUENCE_MASK));
        let (ms, _, seq) = decompose(ids[per_ms]);
        assert_eq!((ms, seq), (T0 + 1, 0));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_concurrent_callers_never_collide() {
        let gen = Arc::new(IdGenerator::new(3).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || {
                    (0..5_000)
                        .map(|_| gen.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 40_000);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_ids_strictly_increase_on_monotonic_clock(
            steps in proptest::collection::vec(0i64..3, 1..300),
            machine in 0i64..=MAX_MACHINE_ID,
        ) {
            let mut now = T0;
            let script: Vec<i64> = steps
                .iter()
                .map(|d| {
                    now += d;
                    now
                })
                .collect();
            let gen = IdGenerator::with_clock(machine, ScriptedClock::new(script)).unwrap();

            let mut prev = None;
            for _ in 0..steps.len() {
                let id = gen.next_id().unwrap();
                prop_assert_eq!(decompose(id).1, machine);
                if let Some(p) = prev {
                    prop_assert!(id > p);
                }
                prev = Some(id);
            }
        }
    }
}
