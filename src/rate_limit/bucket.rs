use parking_lot::Mutex;
use std::time::Instant;

/// Continuous-refill token bucket state
///
/// This is the single refill primitive used by both [`TokenBucket`] and the
/// adaptive limiter. It is not synchronized; owners keep it behind a lock and
/// never hold that lock across an `.await`.
#[derive(Debug, Clone)]
pub struct BucketState {
    /// Tokens added per second
    rate: f64,
    /// Maximum number of tokens
    capacity: f64,
    /// Tokens currently available, always in `0..=capacity`
    tokens: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

impl BucketState {
    /// Create a full bucket
    pub fn new(rate: f64, capacity: f64, now: Instant) -> Self {
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Add `elapsed * rate` tokens, capped at capacity
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then take one token if available
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Replace rate and capacity
    ///
    /// Tokens accrued up to `now` are credited at the old rate first, and the
    /// balance is clamped to the new capacity.
    pub fn set_limits(&mut self, now: Instant, rate: f64, capacity: f64) {
        self.refill(now);
        self.rate = rate;
        self.capacity = capacity;
        self.tokens = self.tokens.clamp(0.0, capacity);
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Local, lock-protected token bucket
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new bucket that starts full
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState::new(rate, capacity, Instant::now())),
        }
    }

    /// Check whether one more request is admitted right now
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Admission check against an explicit clock reading
    pub fn allow_at(&self, now: Instant) -> bool {
        self.state.lock().try_take(now)
    }

    /// Tokens currently available (for monitoring)
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.tokens()
    }
}
