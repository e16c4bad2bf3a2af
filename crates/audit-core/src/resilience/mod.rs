//! Generic resilient-call primitive (spec.md §4.3): retry with full-jitter
//! exponential backoff, composed with a per-`endpoint:method` circuit
//! breaker. State-machine shape grounded on
//! `pallabcodes-c-or-c-plus-plus/build-event-loop/src/circuit_breaker.rs`'s
//! closed/open/half-open `CircuitBreaker`, converted from a single
//! synchronous instance guarded by `RwLock`/atomics into an async, keyed
//! table suitable for per-endpoint state in a worker pool.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerTable, CircuitBreakerConfig};
pub use retry::{execute, RetryConfig};
