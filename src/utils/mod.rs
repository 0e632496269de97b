pub mod background;
pub mod graceful_shutdown;

pub use background::{BackgroundTasks, start_rate_limit_cleanup};
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
