//! Per-endpoint leaky-bucket throttle (spec.md §4.6), built on `governor`
//! the same way the teacher's `lib-network::handshake::rate_limiter`
//! throttles handshake attempts per IP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::RwLock;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};

use crate::constants::{THROTTLE_BURST, THROTTLE_PER_SECOND};

pub struct Throttle {
    limiters: RwLock<HashMap<SocketAddr, DefaultDirectRateLimiter>>,
    per_second: u32,
    burst: u32,
}

impl Throttle {
    pub fn new() -> Self {
        Throttle {
            limiters: RwLock::new(HashMap::new()),
            per_second: THROTTLE_PER_SECOND,
            burst: THROTTLE_BURST,
        }
    }

    pub fn with_limits(per_second: u32, burst: u32) -> Self {
        Throttle {
            limiters: RwLock::new(HashMap::new()),
            per_second,
            burst,
        }
    }

    /// `true` if a request to/from `addr` is allowed right now.
    pub fn check(&self, addr: SocketAddr) -> bool {
        let limiters = self.limiters.read().unwrap();
        if let Some(limiter) = limiters.get(&addr) {
            return limiter.check().is_ok();
        }
        drop(limiters);

        let quota = Quota::per_second(NonZeroU32::new(self.per_second).unwrap())
            .allow_burst(NonZeroU32::new(self.burst).unwrap());
        let mut limiters = self.limiters.write().unwrap();
        let limiter = limiters
            .entry(addr)
            .or_insert_with(|| GovernorRateLimiter::direct(quota));
        limiter.check().is_ok()
    }

    pub fn tracked_endpoints(&self) -> usize {
        self.limiters.read().unwrap().len()
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_burst() {
        let throttle = Throttle::with_limits(1, 5);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        for _ in 0..5 {
            assert!(throttle.check(addr));
        }
    }

    #[test]
    fn rejects_once_burst_is_exhausted() {
        let throttle = Throttle::with_limits(1, 2);
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert!(throttle.check(addr));
        assert!(throttle.check(addr));
        assert!(!throttle.check(addr));
    }

    #[test]
    fn tracks_endpoints_independently() {
        let throttle = Throttle::with_limits(1, 1);
        let a: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        assert!(throttle.check(a));
        assert!(throttle.check(b));
        assert_eq!(throttle.tracked_endpoints(), 2);
    }
}
