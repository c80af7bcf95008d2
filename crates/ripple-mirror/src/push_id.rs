use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Alphabet in ASCII order so generated keys sort lexicographically by
/// generation time.
const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates 20-character push keys: 8 characters encode the millisecond
/// timestamp, 12 are random. Keys created in the same millisecond reuse the
/// previous random suffix incremented by one, so ordering holds even under
/// a burst of pushes.
pub struct PushIdGen {
    state: Mutex<GenState>,
}

struct GenState {
    last_ms: u64,
    suffix: [usize; 12],
}

impl PushIdGen {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GenState {
                last_ms: 0,
                suffix: [0; 12],
            }),
        }
    }

    pub fn next(&self) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Never step backwards if the clock does.
        let ms = now_ms.max(state.last_ms);

        if ms == state.last_ms {
            increment_suffix(&mut state.suffix);
        } else {
            state.last_ms = ms;
            let mut rng = rand::rng();
            for slot in state.suffix.iter_mut() {
                *slot = rng.random_range(0..64);
            }
        }

        let mut key = [0u8; 20];
        let mut rest = ms;
        for i in (0..8).rev() {
            key[i] = ALPHABET[(rest % 64) as usize];
            rest /= 64;
        }
        for (i, slot) in state.suffix.iter().enumerate() {
            key[8 + i] = ALPHABET[*slot];
        }

        // The key is built from ALPHABET bytes only, always valid ASCII.
        String::from_utf8_lossy(&key).into_owned()
    }
}

impl Default for PushIdGen {
    fn default() -> Self {
        Self::new()
    }
}

fn increment_suffix(suffix: &mut [usize; 12]) {
    for slot in suffix.iter_mut().rev() {
        if *slot < 63 {
            *slot += 1;
            return;
        }
        *slot = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique_and_non_decreasing() {
        let gen = PushIdGen::new();
        let keys: Vec<String> = (0..1000).map(|_| gen.next()).collect();

        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());

        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn keys_are_twenty_chars_from_the_alphabet() {
        let gen = PushIdGen::new();
        let key = gen.next();
        assert_eq!(key.len(), 20);
        assert!(key.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn same_millisecond_burst_stays_ordered() {
        let suffix_start = [63usize; 12];
        let mut suffix = suffix_start;
        increment_suffix(&mut suffix);
        assert_eq!(suffix, [0; 12], "carry wraps the whole suffix");
    }
}
