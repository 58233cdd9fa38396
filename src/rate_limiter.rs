use crate::error::{StoreError, StoreResult};
use crate::store::{Query, Stores, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Source of wall-clock time in fractional seconds since the epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Last admitted request time for one client IP, shared by every
/// cooldown-protected route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub ip: String,
    pub last_used_timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Per-IP cooldown limiter backed by the `visitors` collection.
#[derive(Clone)]
pub struct CooldownLimiter {
    visitors: Table<VisitorRecord>,
    clock: Arc<dyn Clock>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CooldownLimiter {
    pub fn new(stores: &Stores, clock: Arc<dyn Clock>) -> Self {
        Self {
            visitors: stores.visitors(),
            clock,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit or reject a request from `ip` against a cooldown of
    /// `cooldown_secs`. Admission stamps the visitor with the current time.
    ///
    /// The read and the write happen under a lock held for this IP only, so
    /// two concurrent requests from one client cannot both pass on a stale
    /// timestamp.
    pub fn check_and_record(&self, ip: &str, cooldown_secs: u64) -> StoreResult<Decision> {
        if cooldown_secs == 0 {
            return Ok(Decision::Allowed);
        }

        let lock = self.key_lock(ip)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Poisoned("visitor lock"))?;

        let now = self.clock.now();
        let query = Query::eq("ip", ip);

        if let Some(visitor) = self.visitors.get(&query)? {
            let elapsed = now - visitor.last_used_timestamp;
            let cooldown = cooldown_secs as f64;
            if elapsed < 0.0 {
                // Stamp from the future: restart the window at `now`.
                tracing::warn!(
                    target: "route_gateway::rate_limiter",
                    ip = %ip,
                    elapsed,
                    "Visitor timestamp ahead of clock, re-stamping"
                );
                self.visitors.upsert(
                    &VisitorRecord {
                        ip: ip.to_string(),
                        last_used_timestamp: now,
                    },
                    &query,
                )?;
                return Ok(Decision::Limited {
                    retry_after_secs: retry_after(cooldown, 0.0),
                });
            }
            if elapsed < cooldown {
                let retry_after_secs = retry_after(cooldown, elapsed);
                tracing::debug!(
                    target: "route_gateway::rate_limiter",
                    ip = %ip,
                    elapsed,
                    retry_after_secs,
                    "Cooldown active"
                );
                return Ok(Decision::Limited { retry_after_secs });
            }
        }

        self.visitors.upsert(
            &VisitorRecord {
                ip: ip.to_string(),
                last_used_timestamp: now,
            },
            &query,
        )?;
        Ok(Decision::Allowed)
    }

    /// Delete visitors whose last admitted request is at least `ttl` old.
    /// Returns how many records were removed.
    pub fn sweep_visitors(&self, ttl: Duration) -> StoreResult<usize> {
        let ttl = ttl.as_secs_f64();
        let stale: Vec<String> = self
            .visitors
            .all()?
            .into_iter()
            .filter(|v| self.clock.now() - v.last_used_timestamp >= ttl)
            .map(|v| v.ip)
            .collect();

        let mut removed = 0;
        for ip in stale {
            let lock = self.key_lock(&ip)?;
            let _guard = lock
                .lock()
                .map_err(|_| StoreError::Poisoned("visitor lock"))?;

            let query = Query::eq("ip", ip.as_str());
            // The client may have come back since the scan.
            let still_stale = self
                .visitors
                .get(&query)?
                .is_some_and(|v| self.clock.now() - v.last_used_timestamp >= ttl);
            if still_stale {
                removed += self.visitors.remove(&query)?.len();
            }
        }

        self.prune_locks()?;
        Ok(removed)
    }

    /// Number of IPs with a live lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn key_lock(&self, ip: &str) -> StoreResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Poisoned("visitor lock table"))?;
        Ok(Arc::clone(locks.entry(ip.to_string()).or_default()))
    }

    fn prune_locks(&self) -> StoreResult<()> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Poisoned("visitor lock table"))?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(())
    }
}

/// Whole seconds the client should wait, never zero while still limited.
fn retry_after(cooldown: f64, elapsed: f64) -> u64 {
    let remaining = (cooldown - elapsed).ceil();
    (remaining as u64).max(1)
}

/// Periodically drop stale visitor records.
pub fn spawn_visitor_sweeper(
    limiter: CooldownLimiter,
    ttl: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match limiter.sweep_visitors(ttl) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(
                    target: "route_gateway::rate_limiter",
                    removed,
                    "Swept stale visitor records"
                ),
                Err(e) => tracing::warn!(
                    target: "route_gateway::rate_limiter",
                    error = %e,
                    "Visitor sweep failed"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn limiter_at(start: f64) -> (CooldownLimiter, Arc<ManualClock>, Stores) {
        let stores = Stores::in_memory();
        let clock = Arc::new(ManualClock::new(start));
        (CooldownLimiter::new(&stores, clock.clone()), clock, stores)
    }

    #[test]
    fn test_first_request_is_allowed_and_stamped() {
        let (limiter, _clock, stores) = limiter_at(1_000.0);
        assert_eq!(limiter.check_and_record("10.0.0.1", 4).unwrap(), Decision::Allowed);

        let visitor: Option<VisitorRecord> =
            stores.visitors().get(&Query::eq("ip", "10.0.0.1")).unwrap();
        assert_eq!(visitor.unwrap().last_used_timestamp, 1_000.0);
    }

    #[test]
    fn test_repeat_within_cooldown_is_limited() {
        let (limiter, clock, _) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        clock.advance(0.001);
        assert_eq!(
            limiter.check_and_record("10.0.0.1", 4).unwrap(),
            Decision::Limited { retry_after_secs: 4 }
        );

        clock.advance(1.499);
        assert_eq!(
            limiter.check_and_record("10.0.0.1", 4).unwrap(),
            Decision::Limited { retry_after_secs: 3 }
        );
    }

    #[test]
    fn test_rejection_does_not_move_the_timestamp() {
        let (limiter, clock, _) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        clock.advance(3.0);
        assert!(!limiter.check_and_record("10.0.0.1", 4).unwrap().is_allowed());

        clock.advance(1.0);
        assert!(limiter.check_and_record("10.0.0.1", 4).unwrap().is_allowed());
    }

    #[test]
    fn test_fractional_remainder_still_limits() {
        let (limiter, clock, _) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        clock.advance(3.9);
        assert_eq!(
            limiter.check_and_record("10.0.0.1", 4).unwrap(),
            Decision::Limited { retry_after_secs: 1 }
        );
    }

    #[test]
    fn test_allowed_after_cooldown_resets_timestamp() {
        let (limiter, clock, stores) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        clock.advance(4.0);
        assert!(limiter.check_and_record("10.0.0.1", 4).unwrap().is_allowed());

        let visitor: VisitorRecord = stores
            .visitors()
            .get(&Query::eq("ip", "10.0.0.1"))
            .unwrap()
            .unwrap();
        assert_eq!(visitor.last_used_timestamp, 1_004.0);
    }

    #[test]
    fn test_cooldown_is_shared_across_routes() {
        let (limiter, clock, _) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        // A different route with a shorter window reads the same stamp.
        clock.advance(1.0);
        assert!(!limiter.check_and_record("10.0.0.1", 2).unwrap().is_allowed());
        clock.advance(1.0);
        assert!(limiter.check_and_record("10.0.0.1", 2).unwrap().is_allowed());
    }

    #[test]
    fn test_other_ips_are_independent() {
        let (limiter, _clock, _) = limiter_at(1_000.0);
        assert!(limiter.check_and_record("10.0.0.1", 4).unwrap().is_allowed());
        assert!(limiter.check_and_record("10.0.0.2", 4).unwrap().is_allowed());
        assert!(!limiter.check_and_record("10.0.0.1", 4).unwrap().is_allowed());
    }

    #[test]
    fn test_zero_cooldown_never_touches_the_store() {
        let (limiter, _clock, stores) = limiter_at(1_000.0);
        assert!(limiter.check_and_record("10.0.0.1", 0).unwrap().is_allowed());
        assert!(limiter.check_and_record("10.0.0.1", 0).unwrap().is_allowed());
        assert!(stores.visitors::<VisitorRecord>().all().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_first_requests_admit_exactly_one() {
        let (limiter, _clock, stores) = limiter_at(1_000.0);
        let workers = 16;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    limiter.check_and_record("10.9.9.9", 10).unwrap()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Decision::is_allowed)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(stores.visitors::<VisitorRecord>().all().unwrap().len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_stale_visitors() {
        let (limiter, clock, stores) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 1).unwrap();
        clock.advance(50.0);
        limiter.check_and_record("10.0.0.2", 1).unwrap();
        clock.advance(20.0);

        let removed = limiter.sweep_visitors(Duration::from_secs(60)).unwrap();
        assert_eq!(removed, 1);

        let left: Vec<VisitorRecord> = stores.visitors().all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].ip, "10.0.0.2");
        assert_eq!(limiter.tracked_locks(), 0);
    }

    #[test]
    fn test_clock_stepping_back_restarts_window_at_now() {
        let (limiter, clock, stores) = limiter_at(1_000.0);
        limiter.check_and_record("10.0.0.1", 4).unwrap();

        clock.set(990.0);
        assert_eq!(
            limiter.check_and_record("10.0.0.1", 4).unwrap(),
            Decision::Limited { retry_after_secs: 4 }
        );
        let visitor: VisitorRecord = stores
            .visitors()
            .get(&Query::eq("ip", "10.0.0.1"))
            .unwrap()
            .unwrap();
        assert_eq!(visitor.last_used_timestamp, 990.0);

        clock.advance(4.0);
        assert_eq!(limiter.check_and_record("10.0.0.1", 4).unwrap(), Decision::Allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after(4.0, 0.0), 4);
        assert_eq!(retry_after(4.0, 0.2), 4);
        assert_eq!(retry_after(4.0, 2.5), 2);
        assert_eq!(retry_after(4.0, 3.999), 1);
    }
}
