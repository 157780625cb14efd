//! Progress feed for generation jobs.
//!
//! Jobs publish every state transition to a [`ProgressSink`]. Sinks provided:
//! - [`BroadcastProgress`]: in-process fan-out with per-job subscriptions
//! - [`JobStatusBoard`]: latest snapshot per prompt
//! - [`RedisProgress`]: Redis Pub/Sub for out-of-process consumers
//! - [`FanoutProgress`]: composes several sinks

pub mod board;
pub mod error;
pub mod progress;
pub mod pubsub;

pub use board::JobStatusBoard;
pub use error::{QueueError, QueueResult};
pub use progress::{BroadcastProgress, FanoutProgress, NoopProgress, ProgressSink};
pub use pubsub::RedisProgress;
