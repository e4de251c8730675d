//! Supervised background tasks
//!
//! Fire-and-forget work (listener dispatch, per-connection loops) runs through
//! [`spawn_supervised`] so a panic is logged instead of silently killing the task.

use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;

/// Spawn `fut` on the runtime, catching and logging any panic it raises
pub fn spawn_supervised<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            tracing::error!(
                task = name,
                panic = %panic_message(panic.as_ref()),
                backtrace = %Backtrace::force_capture(),
                "Task panicked"
            );
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
