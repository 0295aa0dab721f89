use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Simple token bucket: `max` tokens refill linearly over `per`. Grounded on
/// the rate-gating idea behind messaging-platform request throttles — here
/// applied per queue rather than per chat, since the spec only asks for a
/// per-queue `max per duration` limit (§4.7), not per-recipient fairness.
pub struct TokenBucket {
    max: f64,
    refill_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn new(max: u32, per: Duration) -> Self {
        let refill_per_sec = max as f64 / per.as_secs_f64().max(0.001);
        Self {
            max: max as f64,
            refill_per_sec,
            state: Mutex::new((max as f64, Instant::now())),
        }
    }

    /// Unlimited bucket — always allows.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, Duration::from_secs(1))
    }

    /// Attempts to take one token. Returns `true` if allowed.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let (tokens, last) = &mut *state;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.max);
        *last = Instant::now();

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_blocks() {
        let bucket = TokenBucket::new(2, Duration::from_secs(60));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn unlimited_never_blocks() {
        let bucket = TokenBucket::unlimited();
        for _ in 0..1000 {
            assert!(bucket.try_acquire());
        }
    }
}
