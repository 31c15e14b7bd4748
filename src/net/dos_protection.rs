//! Throughput and connection limits at the network edge
//!
//! All limiters use fixed windows with a full reset when the window elapses.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::net::protocol::ErrorCode;

#[derive(Debug, Clone)]
pub struct DoSConfig {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    /// Inbound frames per connection per window
    pub max_messages_per_window: u32,
    pub message_window: Duration,
    pub max_message_size: usize,
    /// Agent HTTP requests per source per window
    pub agent_http_max_per_window: u32,
    pub agent_http_window: Duration,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 8,
            max_messages_per_window: 120,
            message_window: Duration::from_secs(1),
            max_message_size: 16 * 1024,
            agent_http_max_per_window: 20,
            agent_http_window: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoSError {
    #[error("rate limit exceeded, retry in {}ms", retry_in.as_millis())]
    RateLimited { retry_in: Duration },
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("too many total connections")]
    TooManyConnections,
    #[error("too many connections from this address")]
    TooManyConnectionsFromIp,
}

impl DoSError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DoSError::MessageTooLarge(_) => ErrorCode::InvalidCommand,
            _ => ErrorCode::RateLimited,
        }
    }
}

/// One fixed window counter
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    count: u32,
    window_start: Instant,
}

impl FixedWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn check(&mut self, now: Instant, max: u32, window: Duration) -> Result<(), DoSError> {
        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= max {
            let elapsed = now.saturating_duration_since(self.window_start);
            return Err(DoSError::RateLimited {
                retry_in: window.saturating_sub(elapsed),
            });
        }
        self.count += 1;
        Ok(())
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// Per-source request throughput (agent HTTP entry point)
pub struct SourceRateLimiter {
    max_per_window: u32,
    window: Duration,
    sources: Mutex<HashMap<IpAddr, FixedWindow>>,
}

impl SourceRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, source: IpAddr, now: Instant) -> Result<(), DoSError> {
        self.sources
            .lock()
            .entry(source)
            .or_insert_with(|| FixedWindow::new(now))
            .check(now, self.max_per_window, self.window)
    }

    /// Forget sources whose window has closed
    pub fn sweep(&self, now: Instant) -> usize {
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|_, w| !w.is_stale(now, self.window));
        before - sources.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.lock().len()
    }
}

/// Inbound frame limits for one connection
#[derive(Debug)]
pub struct MessageLimiter {
    max_per_window: u32,
    window: Duration,
    max_size: usize,
    counter: FixedWindow,
    violations: u32,
}

impl MessageLimiter {
    pub fn new(config: &DoSConfig) -> Self {
        Self {
            max_per_window: config.max_messages_per_window,
            window: config.message_window,
            max_size: config.max_message_size,
            counter: FixedWindow::new(Instant::now()),
            violations: 0,
        }
    }

    pub fn check(&mut self, size: usize, now: Instant) -> Result<(), DoSError> {
        if size > self.max_size {
            self.violations += 1;
            return Err(DoSError::MessageTooLarge(size));
        }
        let result = self.counter.check(now, self.max_per_window, self.window);
        if result.is_err() {
            self.violations += 1;
        }
        result
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }
}

#[derive(Debug, Default)]
struct ConnectionCounts {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

/// Concurrent connection caps, global and per address
#[derive(Clone)]
pub struct ConnectionLimiter {
    max_total: usize,
    max_per_ip: usize,
    counts: Arc<Mutex<ConnectionCounts>>,
}

impl ConnectionLimiter {
    pub fn new(config: &DoSConfig) -> Self {
        Self {
            max_total: config.max_connections_total,
            max_per_ip: config.max_connections_per_ip,
            counts: Arc::new(Mutex::new(ConnectionCounts::default())),
        }
    }

    /// Reserve a slot; it is released when the permit drops
    pub fn acquire(&self, ip: IpAddr) -> Result<ConnectionPermit, DoSError> {
        let mut counts = self.counts.lock();
        if counts.total >= self.max_total {
            return Err(DoSError::TooManyConnections);
        }
        let from_ip = counts.per_ip.get(&ip).copied().unwrap_or(0);
        if from_ip >= self.max_per_ip {
            return Err(DoSError::TooManyConnectionsFromIp);
        }

        counts.total += 1;
        *counts.per_ip.entry(ip).or_insert(0) += 1;
        Ok(ConnectionPermit {
            ip,
            counts: self.counts.clone(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.counts.lock().total
    }

    pub fn connections_from_ip(&self, ip: IpAddr) -> usize {
        self.counts.lock().per_ip.get(&ip).copied().unwrap_or(0)
    }
}

pub struct ConnectionPermit {
    ip: IpAddr,
    counts: Arc<Mutex<ConnectionCounts>>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut counts = self.counts.lock();
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.per_ip.remove(&self.ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))
    }

    fn test_ip_2() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))
    }

    #[test]
    fn test_source_limit_and_full_reset() {
        let limiter = SourceRateLimiter::new(3, Duration::from_secs(1));
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check(test_ip(), now).is_ok());
        }
        let err = limiter
            .check(test_ip(), now + Duration::from_millis(400))
            .unwrap_err();
        assert_eq!(
            err,
            DoSError::RateLimited {
                retry_in: Duration::from_millis(600)
            }
        );
        assert_eq!(err.code(), ErrorCode::RateLimited);

        // other sources are independent
        assert!(limiter.check(test_ip_2(), now).is_ok());

        let later = now + Duration::from_secs(1);
        for _ in 0..3 {
            assert!(limiter.check(test_ip(), later).is_ok());
        }
    }

    #[test]
    fn test_source_sweep() {
        let limiter = SourceRateLimiter::new(3, Duration::from_secs(1));
        let now = Instant::now();
        limiter.check(test_ip(), now).unwrap();
        limiter.check(test_ip_2(), now + Duration::from_millis(900)).unwrap();

        assert_eq!(limiter.sweep(now + Duration::from_millis(1200)), 1);
        assert_eq!(limiter.tracked_sources(), 1);
    }

    #[test]
    fn test_message_limiter() {
        let config = DoSConfig {
            max_messages_per_window: 2,
            max_message_size: 100,
            ..Default::default()
        };
        let mut limiter = MessageLimiter::new(&config);
        let now = Instant::now();

        assert!(limiter.check(50, now).is_ok());
        assert!(matches!(
            limiter.check(200, now),
            Err(DoSError::MessageTooLarge(200))
        ));
        assert!(limiter.check(50, now).is_ok());
        assert!(matches!(
            limiter.check(50, now),
            Err(DoSError::RateLimited { .. })
        ));
        assert_eq!(limiter.violations(), 2);
        assert!(limiter.check(50, now + config.message_window).is_ok());
    }

    #[test]
    fn test_connection_permits_release_on_drop() {
        let config = DoSConfig {
            max_connections_per_ip: 2,
            ..Default::default()
        };
        let limiter = ConnectionLimiter::new(&config);

        let a = limiter.acquire(test_ip()).unwrap();
        let _b = limiter.acquire(test_ip()).unwrap();
        assert!(matches!(
            limiter.acquire(test_ip()),
            Err(DoSError::TooManyConnectionsFromIp)
        ));
        assert!(limiter.acquire(test_ip_2()).is_ok());

        drop(a);
        assert_eq!(limiter.connections_from_ip(test_ip()), 1);
        assert!(limiter.acquire(test_ip()).is_ok());
    }

    #[test]
    fn test_max_total_connections() {
        let config = DoSConfig {
            max_connections_total: 2,
            max_connections_per_ip: 10,
            ..Default::default()
        };
        let limiter = ConnectionLimiter::new(&config);

        let _a = limiter.acquire(test_ip()).unwrap();
        let _b = limiter.acquire(test_ip_2()).unwrap();
        let result = limiter.acquire(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 3)));
        assert!(matches!(result, Err(DoSError::TooManyConnections)));
        assert_eq!(limiter.connection_count(), 2);
    }
}
