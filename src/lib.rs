//! Ratewarden - In-process Admission Control
//!
//! This crate decides, per request, whether a keyed resource may be used
//! right now. It provides two independent limiters: a per-key sliding window
//! counter ([`ratelimit::SlidingWindowLimiter`]) and a single-instance token
//! bucket ([`ratelimit::TokenBucketLimiter`]). Both keep their state in
//! memory and are safe to share across threads.

pub mod config;
pub mod error;
pub mod ratelimit;
