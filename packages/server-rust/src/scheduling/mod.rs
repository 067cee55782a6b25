//! Scheduling primitives: job schedulers and the rate limiter.
//!
//! - [`schedule`]: `@every`, descriptor and cron expressions
//! - [`duration`]: `1h30m`-style duration strings
//! - [`scheduler`]: the `JobScheduler` contract and shared run loop
//! - [`interval`], [`cron`]: the two scheduler implementations
//! - [`rate_limiter`], [`clock`]: per-client token buckets

pub mod clock;
pub mod cron;
pub mod duration;
pub mod interval;
pub mod rate_limiter;
pub mod schedule;
pub mod scheduler;

pub use self::clock::{ManualClock, MonotonicClock, SystemClock};
pub use self::cron::CronScheduler;
pub use self::duration::{parse_duration, DurationError, HumanDuration};
pub use self::interval::IntervalScheduler;
pub use self::rate_limiter::{RateLimitConfig, TokenBucketLimiter};
pub use self::schedule::{Schedule, ScheduleKind};
pub use self::scheduler::{job_fn, JobCallback, JobScheduler, JobTick, SchedulerState};
