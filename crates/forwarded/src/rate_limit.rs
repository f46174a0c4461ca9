//! Per-client request rate limiting, with temporary bans.
//!
//! Each client IP gets a counter of the requests seen in its current
//! one-second window.  A client which goes over the limit is banned
//! for a fixed period, and every request it makes during the ban is
//! rejected without being counted.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long a client is banned for after exceeding the limit.
pub const BAN_DURATION: Duration = Duration::from_secs(5 * 60);

/// The window requests are counted over.
pub const WINDOW: Duration = Duration::from_secs(1);

/// How often expired bans are removed.
pub const BAN_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] rate limiter mutex poisoned, cannot recover from this - aborting";

/// Invoking `clone` on a `RateLimiter` gives a new instance which
/// refers to the same underlying state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<State>>,
    /// Most requests allowed in one window.
    limit: u32,
    ban_duration: Duration,
}

#[derive(Debug, Default)]
struct State {
    counters: HashMap<IpAddr, Counter>,
    /// When each ban ends.
    bans: HashMap<IpAddr, Instant>,
}

#[derive(Debug, Copy, Clone)]
struct Counter {
    count: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            limit,
            ban_duration: BAN_DURATION,
        }
    }

    pub fn with_ban_duration(mut self, ban_duration: Duration) -> Self {
        self.ban_duration = ban_duration;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a request from `ip`, and decide whether to serve it.
    ///
    /// # Errors
    ///
    /// If `ip` is banned, or this request takes it over the limit (in
    /// which case it is now banned).
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn process_ip(&self, ip: IpAddr) -> Result<(), Rejection> {
        let now = Instant::now();
        let mut state = self.state.lock().expect(MUTEX_POISON_MESSAGE);

        if let Some(until) = state.bans.get(&ip).copied() {
            if until > now {
                return Err(Rejection::Banned {
                    remaining: until - now,
                });
            }
            state.bans.remove(&ip);
        }

        let rate = {
            let counter = state.counters.entry(ip).or_insert(Counter {
                count: 0,
                window_start: now,
                last_request: now,
            });
            if now.duration_since(counter.window_start) >= WINDOW {
                counter.count = 0;
                counter.window_start = now;
            }
            counter.count = counter.count.saturating_add(1);
            counter.last_request = now;
            counter.count
        };

        if rate > self.limit {
            state.counters.remove(&ip);
            state.bans.insert(ip, now + self.ban_duration);
            return Err(Rejection::RateExceeded { rate });
        }

        Ok(())
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .bans
            .get(&ip)
            .is_some_and(|until| *until > now)
    }

    /// Forget clients which have made no request for a whole window.
    ///
    /// Returns the number of counters removed.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn remove_idle_counters(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().expect(MUTEX_POISON_MESSAGE);
        let before = state.counters.len();
        state
            .counters
            .retain(|_, counter| now.duration_since(counter.last_request) <= WINDOW);
        before - state.counters.len()
    }

    /// Lift bans which have run out.
    ///
    /// Returns the number of bans removed.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn remove_expired_bans(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().expect(MUTEX_POISON_MESSAGE);
        let before = state.bans.len();
        state.bans.retain(|_, until| *until > now);
        before - state.bans.len()
    }
}

/// Sweep idle counters every window and expired bans every
/// `BAN_SWEEP_INTERVAL`, until `shutdown` is cancelled.
pub async fn sweep_task(limiter: RateLimiter, shutdown: CancellationToken) {
    let start = Instant::now();
    let mut counter_ticker = tokio::time::interval_at(start + WINDOW, WINDOW);
    let mut ban_ticker = tokio::time::interval_at(start + BAN_SWEEP_INTERVAL, BAN_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!("rate limiter sweep stopped");
                break;
            }
            _ = counter_ticker.tick() => {
                let idle = limiter.remove_idle_counters();
                if idle > 0 {
                    tracing::trace!(%idle, "swept rate limiter counters");
                }
            }
            _ = ban_ticker.tick() => {
                let lifted = limiter.remove_expired_bans();
                tracing::debug!(%lifted, "swept rate limiter bans");
            }
        }
    }
}

/// Why a request was refused.  The `Display` text is sent back to the
/// client.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rejection {
    /// The client is serving a ban.
    Banned { remaining: Duration },
    /// This request took the client over the limit.
    RateExceeded { rate: u32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::Banned { remaining } => {
                let seconds = remaining.as_millis().div_ceil(1000);
                write!(f, "access denied for {seconds}s")
            }
            Rejection::RateExceeded { rate } => write!(f, "exceed req/sec: {rate}"),
        }
    }
}

impl std::error::Error for Rejection {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use tokio::time::advance;

    use super::*;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const OTHER_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_limit() {
        let limiter = RateLimiter::new(5);

        for _ in 0..5 {
            assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        }
        assert_eq!(
            Err(Rejection::RateExceeded { rate: 6 }),
            limiter.process_ip(CLIENT)
        );
        assert!(limiter.is_banned(CLIENT));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_each_client_separately() {
        let limiter = RateLimiter::new(1);

        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert_eq!(Ok(()), limiter.process_ip(OTHER_CLIENT));
        assert!(limiter.process_ip(CLIENT).is_err());
        assert!(!limiter.is_banned(OTHER_CLIENT));
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_a_second() {
        let limiter = RateLimiter::new(2);

        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert_eq!(Ok(()), limiter.process_ip(CLIENT));

        advance(WINDOW).await;

        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert_eq!(
            Err(Rejection::RateExceeded { rate: 3 }),
            limiter.process_ip(CLIENT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn banned_until_ban_ends() {
        let limiter = RateLimiter::new(1);

        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert_eq!(
            Err(Rejection::RateExceeded { rate: 2 }),
            limiter.process_ip(CLIENT)
        );

        advance(Duration::from_secs(60)).await;
        assert_eq!(
            Err(Rejection::Banned {
                remaining: Duration::from_secs(240)
            }),
            limiter.process_ip(CLIENT)
        );

        advance(Duration::from_secs(240)).await;
        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
        assert!(!limiter.is_banned(CLIENT));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_ban_are_not_counted() {
        let limiter = RateLimiter::new(1).with_ban_duration(Duration::from_secs(10));

        limiter.process_ip(CLIENT).unwrap();
        limiter.process_ip(CLIENT).unwrap_err();
        for _ in 0..100 {
            limiter.process_ip(CLIENT).unwrap_err();
        }

        advance(Duration::from_secs(10)).await;
        assert_eq!(Ok(()), limiter.process_ip(CLIENT));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_remove_idle_counters_and_expired_bans() {
        let limiter = RateLimiter::new(1).with_ban_duration(Duration::from_secs(10));

        limiter.process_ip(CLIENT).unwrap();
        limiter.process_ip(CLIENT).unwrap_err();
        limiter.process_ip(OTHER_CLIENT).unwrap();

        assert_eq!(0, limiter.remove_idle_counters());
        advance(Duration::from_secs(2)).await;
        assert_eq!(1, limiter.remove_idle_counters());
        assert_eq!(0, limiter.remove_expired_bans());

        advance(Duration::from_secs(8)).await;
        assert_eq!(1, limiter.remove_expired_bans());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_lifts_bans_until_cancelled() {
        let limiter = RateLimiter::new(1).with_ban_duration(Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(sweep_task(limiter.clone(), shutdown.clone()));
        tokio::task::yield_now().await;

        limiter.process_ip(CLIENT).unwrap();
        limiter.process_ip(CLIENT).unwrap_err();
        assert_eq!(1, limiter.state.lock().unwrap().bans.len());

        advance(BAN_SWEEP_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(limiter.state.lock().unwrap().bans.is_empty());
        assert!(limiter.state.lock().unwrap().counters.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(
            "access denied for 300s",
            Rejection::Banned {
                remaining: Duration::from_millis(299_500)
            }
            .to_string()
        );
        assert_eq!(
            "exceed req/sec: 21",
            Rejection::RateExceeded { rate: 21 }.to_string()
        );
    }
}
