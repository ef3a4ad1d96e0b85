//! Email dispatch queue for mailsched.
//!
//! This crate decides when each scheduled email is attempted:
//!
//! - **Rate limiting**: Per-sender hourly windows with shared counters
//! - **Processing**: One send attempt per due job, no duplicate sends
//! - **Fallback**: In-process timer queue when Redis is unreachable
//! - **Durable**: Redis-backed apalis workers
//! - **Dispatch**: Single facade over whichever backend is active

pub mod dispatch;
pub mod durable;
pub mod fallback;
pub mod jobs;
pub mod processor;
pub mod rate_limit;

pub use dispatch::{BackendKind, Dispatcher, Scheduler};
pub use durable::{DurableScheduler, SendEmailContext, send_email_worker};
pub use fallback::{FallbackScheduler, PendingEntry};
pub use jobs::*;
pub use processor::{JobProcessor, ProcessOutcome};
pub use rate_limit::{
    CounterStore, CounterStoreError, MemoryCounterStore, RedisCounterStore, SenderRateLimiter,
};
