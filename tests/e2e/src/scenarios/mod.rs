//! E2E scenarios, one module per concern.
//!
//! All timer-driven scenarios run on tokio's paused clock, so debounce
//! windows, TTLs and poll intervals elapse instantly and deterministically.

pub mod cache;
pub mod optimistic;
pub mod realtime;
pub mod registry;
pub mod session;
pub mod throttle;
