//! 核心层：错误分类与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::AgentError;
pub use shutdown::{
    run_with_graceful_shutdown, BackgroundTaskCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
