//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Resolve descriptor → Run start hooks in order → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → cancel lifetime token → background tasks exit,
//!     listeners drain
//! ```
//!
//! # Design Decisions
//! - Ordered startup: hooks complete before any listener binds
//! - One cancellation token drives every long-running task

pub mod shutdown;
pub mod startup;

pub use shutdown::cancel_on_signal;
pub use startup::{assemble, run_start_hooks, StartHook, StartupError};

/// Run blocking work (file reads, client construction) off the async workers.
///
/// A panic inside `f` is resumed on the caller.
pub(crate) async fn run_blocking<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}
