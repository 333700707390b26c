//! Controller runtime: work queue, watch translation, retries and the
//! worker pool.

pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod watch;
pub mod worker;

pub use queue::WorkQueue;
pub use retry::{with_retry_if, BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
pub use shutdown::ShutdownSignal;
pub use watch::{stages_to_enqueue, StageIndex, WatchEnqueuer, WatchEvent};
pub use worker::Controller;
