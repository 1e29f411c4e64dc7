//! Tokio Runtime Bridge
//!
//! Processors and buffers spawn tokio tasks. Callers that dispatch from
//! inside a tokio runtime get their tasks on that runtime; callers on plain
//! threads (UI loops, tests without `#[tokio::test]`) fall back to a lazily
//! created global runtime.
//!
//! ```text
//! dispatch(action)
//!       │
//!       ▼
//! spawn_task(effect)
//!       │
//!       ├── inside tokio ──► Handle::current().spawn()
//!       └── plain thread ──► global Runtime::spawn()
//! ```

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Global fallback runtime
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn fallback_handle() -> Handle {
    TOKIO_RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("console-pipeline")
                .enable_all()
                .build()
                .expect("Failed to create tokio runtime")
        })
        .handle()
        .clone()
}

/// Handle of the current runtime, or of the fallback runtime
pub fn runtime_handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| fallback_handle())
}

/// Spawn a task on the current or fallback runtime
pub fn spawn_task<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime_handle().spawn(future)
}

/// Spawn a detached task with a name (for debugging)
pub fn spawn_named<F>(name: impl Into<String>, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    tracing::trace!("Spawning task: {}", name);
    runtime_handle().spawn(async move {
        future.await;
        tracing::trace!("Task completed: {}", name);
    });
}

/// Block on a future synchronously (use sparingly, mainly for initialization)
///
/// **Warning**: panics when called from inside a tokio runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    fallback_handle().block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_spawn_without_runtime_uses_fallback() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        let handle = spawn_task(async move {
            flag_clone.store(true, Ordering::SeqCst);
        });

        block_on(handle).expect("task completes");
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_inside_runtime() {
        let value = spawn_task(async { 21 * 2 }).await.expect("task completes");
        assert_eq!(value, 42);
    }
}
