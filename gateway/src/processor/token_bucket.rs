//! Lock-free token bucket
//!
//! Shared by the rate-limiter processor, one bucket per tenant. Atomics
//! only; `try_acquire` is O(1) and safe from any number of worker threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Token bucket allowing `qps` acquisitions per second with a burst
/// capacity of `burst`. Tokens are scaled by 1000 internally for sub-token
/// precision without floating point.
pub(crate) struct TokenBucket {
    /// Max tokens (scaled by 1000)
    capacity: u64,
    /// Tokens added per refill interval (1000 = 1 token)
    refill_amount: u64,
    /// Nanoseconds between refills
    refill_nanos: u64,
    /// Current token count (scaled by 1000)
    tokens: AtomicU64,
    /// Last refill timestamp (nanos since `start`)
    last_refill: AtomicU64,
    /// Anchor instant for elapsed time
    start: Instant,
}

impl TokenBucket {
    /// `qps` of 0 means no refill (tokens deplete permanently); `burst` of
    /// 0 admits nothing.
    pub(crate) fn new(qps: u64, burst: u64) -> Self {
        let refill_nanos = if qps == 0 {
            u64::MAX
        } else {
            1_000_000_000 / qps
        };
        let scaled_burst = burst.saturating_mul(1000);

        Self {
            capacity: scaled_burst,
            refill_amount: 1000,
            refill_nanos,
            tokens: AtomicU64::new(scaled_burst),
            last_refill: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Try to take one token; `false` means the caller is rate limited.
    pub(crate) fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current < 1000 {
                return false;
            }
            if self
                .tokens
                .compare_exchange_weak(current, current - 1000, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Refill based on elapsed time. The CAS on `last_refill` ensures only
    /// one thread adds tokens for a given interval.
    fn refill(&self) {
        let now_nanos = self.start.elapsed().as_nanos() as u64;

        loop {
            let last = self.last_refill.load(Ordering::Acquire);
            let elapsed = now_nanos.saturating_sub(last);
            if elapsed < self.refill_nanos {
                return;
            }

            let intervals = elapsed / self.refill_nanos;
            if intervals == 0 {
                return;
            }
            let new_last = last + intervals * self.refill_nanos;

            match self.last_refill.compare_exchange_weak(
                last,
                new_last,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let tokens_to_add = intervals * self.refill_amount;
                    loop {
                        let current = self.tokens.load(Ordering::Acquire);
                        let new_tokens =
                            current.saturating_add(tokens_to_add).min(self.capacity);
                        if current == new_tokens {
                            break;
                        }
                        if self
                            .tokens
                            .compare_exchange_weak(
                                current,
                                new_tokens,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            break;
                        }
                    }
                    return;
                }
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let bucket = TokenBucket::new(0, 3); // no refill
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_zero_burst_admits_nothing() {
        let bucket = TokenBucket::new(1000, 0);
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_refill_restores_tokens() {
        let bucket = TokenBucket::new(1000, 1); // 1ms per token
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        std::thread::sleep(std::time::Duration::from_millis(3));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_concurrent_exact_drain() {
        use std::sync::Arc;
        use std::thread;

        let bucket = Arc::new(TokenBucket::new(0, 100));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let bucket = Arc::clone(&bucket);
            handles.push(thread::spawn(move || {
                let mut acquired = 0u32;
                for _ in 0..20 {
                    if bucket.try_acquire() {
                        acquired += 1;
                    }
                }
                acquired
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100, "exactly the burst is handed out");
    }
}
