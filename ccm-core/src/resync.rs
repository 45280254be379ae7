//! Jittered resync periods for shared informers
//!
//! Every watch registered through the informer factory asks for its own
//! period, so that controllers started together do not relist in lockstep.
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::{fmt, sync::Arc, time::Duration};

/// Generates resync periods in `[min, 2 * min)`
///
/// Clones share the same random source, which is guarded by a mutex so the
/// generator can be called from any number of watch registrations at once.
#[derive(Clone)]
pub struct ResyncPeriod {
    min: Duration,
    rng: Arc<Mutex<Box<dyn RngCore + Send>>>,
}

impl ResyncPeriod {
    /// A generator seeded from the operating system
    pub fn new(min: Duration) -> Self {
        Self::with_rng(min, StdRng::from_os_rng())
    }

    /// A generator drawing from a caller supplied source
    ///
    /// Mostly useful for tests, which can pass a seeded [`StdRng`].
    pub fn with_rng(min: Duration, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            min,
            rng: Arc::new(Mutex::new(Box::new(rng))),
        }
    }

    /// The configured lower bound
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Draw the next period: `min * (1 + r)` with `r` uniform in `[0, 1)`
    pub fn draw(&self) -> Duration {
        let factor: f64 = self.rng.lock().random();
        jittered(self.min, factor)
    }

    /// The generator as a plain zero-argument function
    pub fn as_fn(&self) -> impl Fn() -> Duration + Clone + Send + Sync + 'static {
        let this = self.clone();
        move || this.draw()
    }
}

impl fmt::Debug for ResyncPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncPeriod").field("min", &self.min).finish()
    }
}

/// A generator seeded from the operating system
pub fn resync_period(min: Duration) -> ResyncPeriod {
    ResyncPeriod::new(min)
}

fn jittered(min: Duration, factor: f64) -> Duration {
    let min_nanos = u64::try_from(min.as_nanos()).unwrap_or(u64::MAX);
    if min_nanos == 0 {
        return Duration::ZERO;
    }
    // float rounding may land on (or past) the open upper bound
    let extra = ((min_nanos as f64) * factor) as u64;
    min + Duration::from_nanos(extra.min(min_nanos - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_bounds() {
        let min = Duration::from_secs(1);
        let resync = ResyncPeriod::new(min);
        for _ in 0..1000 {
            let period = resync.draw();
            assert!(period >= min, "{period:?} below {min:?}");
            assert!(period < 2 * min, "{period:?} not below {:?}", 2 * min);
        }
    }

    #[test]
    fn extreme_factors_are_clamped() {
        let min = Duration::from_secs(3600);
        assert_eq!(jittered(min, 0.0), min);
        assert!(jittered(min, 1.0 - f64::EPSILON) < 2 * min);
        assert!(jittered(min, 1.0) < 2 * min);
        assert_eq!(jittered(Duration::ZERO, 0.5), Duration::ZERO);
        assert_eq!(jittered(Duration::from_nanos(1), 0.9), Duration::from_nanos(1));
    }

    #[test]
    fn seeded_sources_are_reproducible() {
        let min = Duration::from_secs(12 * 60 * 60);
        let a = ResyncPeriod::with_rng(min, StdRng::seed_from_u64(7));
        let b = ResyncPeriod::with_rng(min, StdRng::seed_from_u64(7));
        let drawn_a: Vec<_> = (0..16).map(|_| a.draw()).collect();
        let drawn_b: Vec<_> = (0..16).map(|_| b.draw()).collect();
        assert_eq!(drawn_a, drawn_b);
        // jitter actually varies between calls
        assert!(drawn_a.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn clones_share_the_source() {
        let min = Duration::from_secs(60);
        let shared = ResyncPeriod::with_rng(min, StdRng::seed_from_u64(42));
        let reference = ResyncPeriod::with_rng(min, StdRng::seed_from_u64(42));
        let clone = shared.clone();
        let generate = shared.as_fn();

        let interleaved = [shared.draw(), clone.draw(), generate()];
        let sequential = [reference.draw(), reference.draw(), reference.draw()];
        assert_eq!(interleaved, sequential);
    }

    #[test]
    fn concurrent_callers() {
        let min = Duration::from_millis(250);
        let resync = ResyncPeriod::new(min);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generate = resync.as_fn();
                std::thread::spawn(move || (0..100).map(|_| generate()).collect::<Vec<_>>())
            })
            .collect();
        for handle in handles {
            for period in handle.join().unwrap() {
                assert!(period >= min && period < 2 * min);
            }
        }
    }
}
