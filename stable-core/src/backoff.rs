//! Bounded exponential backoff used when retrying conflicting record updates.

use std::time::Duration;

use rand::Rng;

/// A bounded exponential backoff policy.
///
/// The defaults mirror the default retry backoff of the Kubernetes Go client: 4 attempts,
/// starting at 10ms and growing by a factor of 5, with 10% jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// The total number of attempts, including the first.
    pub steps: usize,
    /// The wait before the second attempt.
    pub duration: Duration,
    /// The multiplier applied to the wait after every attempt.
    pub factor: f64,
    /// The fraction of each wait which may be randomly added to it.
    pub jitter: f64,
    /// An upper bound on any single wait, before jitter.
    pub cap: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 4,
            duration: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
            cap: None,
        }
    }
}

impl Backoff {
    /// The total number of attempts permitted by this policy.
    pub fn attempts(&self) -> usize {
        self.steps.max(1)
    }

    /// An iterator of the waits between attempts, yielding `attempts() - 1` values.
    pub fn delays(&self) -> Delays {
        Delays {
            remaining: self.attempts() - 1,
            next: self.duration,
            policy: self.clone(),
        }
    }
}

/// An iterator of backoff waits.
#[derive(Debug)]
pub struct Delays {
    remaining: usize,
    next: Duration,
    policy: Backoff,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut base = self.next;
        if let Some(cap) = self.policy.cap {
            base = base.min(cap);
        }
        if self.policy.factor > 0.0 {
            self.next = Duration::from_nanos((self.next.as_nanos() as f64 * self.policy.factor) as u64);
            if let Some(cap) = self.policy.cap {
                self.next = self.next.min(cap);
            }
        }
        if self.policy.jitter > 0.0 {
            let extra = rand::thread_rng().gen::<f64>() * self.policy.jitter;
            Some(base + base.mul_f64(extra))
        } else {
            Some(base)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_yields_three_growing_delays() {
        let delays: Vec<_> = Backoff { jitter: 0.0, ..Default::default() }.delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(10), Duration::from_millis(50), Duration::from_millis(250)],
            "unexpected delays from default policy"
        );
    }

    #[test]
    fn zero_steps_still_permits_one_attempt() {
        let policy = Backoff { steps: 0, ..Default::default() };
        assert_eq!(policy.attempts(), 1, "expected a single attempt");
        assert!(policy.delays().next().is_none(), "expected no delays for a single attempt");
    }

    #[test]
    fn delays_respect_cap_and_jitter_bounds() {
        let policy = Backoff {
            steps: 6,
            duration: Duration::from_millis(100),
            factor: 3.0,
            jitter: 0.5,
            cap: Some(Duration::from_millis(500)),
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays.len(), 5, "expected 5 delays, got {}", delays.len());
        for delay in delays {
            assert!(delay <= Duration::from_millis(750), "delay {:?} exceeds capped jitter bound", delay);
            assert!(delay >= Duration::from_millis(100), "delay {:?} is below the initial duration", delay);
        }
    }
}
