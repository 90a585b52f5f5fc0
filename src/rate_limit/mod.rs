//! Rate limiting module
//!
//! Two limiters guard the proxied endpoint:
//!
//! - **Token Bucket**: local, continuous refill, one lock per instance
//! - **Sliding Window**: shared by every gate instance through a counter
//!   store (Redis in production, in-memory for tests)
//!
//! # Features
//!
//! - Atomic Lua script or plain pipeline for the shared window
//! - Configurable fail-open / fail-closed policy on store errors
//! - Idempotent close
//!
//! # Example
//!
//! ```rust,no_run
//! use fluxgate::rate_limit::{
//!     FailurePolicy, InMemoryCounterStore, SlidingWindowLimiter, TokenBucket, WindowSpec,
//!     WindowStrategy,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bucket = TokenBucket::new(5.0, 10.0);
//!     assert!(bucket.allow());
//!
//!     let store = Arc::new(InMemoryCounterStore::new(WindowStrategy::Script));
//!     let window = SlidingWindowLimiter::with_store(
//!         store,
//!         10,
//!         WindowSpec::default(),
//!         "fluxgate:window:",
//!         FailurePolicy::Open,
//!     );
//!     assert!(window.allow("https://api.example.com").await);
//!
//!     // Or connect to Redis
//!     // let window = SlidingWindowLimiter::connect(&settings, 10).await?;
//! }
//! ```

pub mod bucket;
pub mod lua_scripts;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use bucket::{BucketState, TokenBucket};
pub use redis::RedisCounterStore;
pub use service::SlidingWindowLimiter;
pub use store::{CounterStore, InMemoryCounterStore};
pub use types::{FailurePolicy, WindowDecision, WindowSpec, WindowStrategy};
