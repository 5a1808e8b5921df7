use std::sync::Mutex;

use chrono::Utc;

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const CAMPUS_EPOCH_MS: i64 = 1_735_689_600_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// Largest worker id that fits in the worker field.
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

struct State {
    last_ms: i64,
    sequence: i64,
}

/// 64-bit time-ordered ID generator for chat messages.
///
/// Layout (MSB → LSB):
/// - Bits 63–22: Timestamp (42 bits), ms since the campus epoch
/// - Bits 21–12: Worker ID (10 bits)
/// - Bits 11–0:  Sequence (12 bits), per-ms counter
///
/// IDs handed out by one generator strictly increase, even if the wall
/// clock steps backwards: the generator keeps issuing from the last
/// observed millisecond until the clock catches up.
pub struct SnowflakeGenerator {
    worker_id: i64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Worker ids above [`MAX_WORKER_ID`] are masked into range.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id & MAX_WORKER_ID),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> i64 {
        // A poisoned lock only means another thread panicked mid-generate;
        // the counters are still usable.
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let now_ms = current_ms().max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted: borrow the next millisecond.
                state.last_ms += 1;
            }
        } else {
            state.sequence = 0;
            state.last_ms = now_ms;
        }

        ((state.last_ms - CAMPUS_EPOCH_MS) << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

fn current_ms() -> i64 {
    Utc::now().timestamp_millis()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_strictly_increase() {
        let gen = SnowflakeGenerator::new(1);
        let mut prev = 0i64;
        for _ in 0..10_000 {
            let id = gen.generate();
            assert!(id > prev, "not monotonic: {prev} >= {id}");
            prev = id;
        }
    }

    #[test]
    fn concurrent_generation_is_unique() {
        let gen = Arc::new(SnowflakeGenerator::new(3));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..2_000).map(|_| gen.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate snowflake: {id}");
            }
        }
    }

    #[test]
    fn embedded_time_matches_generation_time() {
        let gen = SnowflakeGenerator::new(0);
        let before = current_ms();
        let id = gen.generate();
        let after = current_ms();

        let extracted = (id >> (WORKER_BITS + SEQUENCE_BITS)) + CAMPUS_EPOCH_MS;
        assert!(extracted >= before && extracted <= after + 1);
    }

    #[test]
    fn worker_id_is_masked() {
        let gen = SnowflakeGenerator::new(u16::MAX);
        let id = gen.generate();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_WORKER_ID), i64::from(MAX_WORKER_ID));
    }
}
