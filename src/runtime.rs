// =============================================================================
// runtime.rs - worker dispatch for constrained runtimes
// =============================================================================
//
// Some deployment targets cannot start OS threads at all. dispatch_blocking
// tries to run a closure on a fresh worker thread and, when the runtime
// refuses to start one, executes it in-line on the calling thread instead.
// The request still completes; it just blocks its own thread.
//
// The canonical unavailable-runtime signal is the spawn error itself: the
// WouldBlock kind, or a message carrying one of the known no-thread markers.
// =============================================================================

use std::io;

use tracing::warn;

/// Messages that identify a runtime refusing to start threads. Kept narrow:
/// broader marker sets match unrelated errors that merely mention threads.
pub const WORKER_UNAVAILABLE_MARKERS: &[&str] =
    &["can't start new thread", "cannot start new thread"];

/// True when a spawn failure means "this runtime cannot start worker
/// threads" rather than some other I/O problem.
pub fn is_worker_pool_unavailable(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    let message = err.to_string().trim().to_lowercase();
    if message.is_empty() {
        return false;
    }
    WORKER_UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Run a blocking task on a dedicated worker thread, falling back to in-line
/// execution when the runtime cannot start one.
///
/// The task is handed to the worker through a channel so that a failed spawn
/// still leaves it runnable on the calling thread.
pub fn dispatch_blocking<T, F>(task: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    std::thread::scope(|scope| {
        let (task_tx, task_rx) = std::sync::mpsc::channel::<F>();
        let spawned = std::thread::Builder::new()
            .name("immcad-worker".into())
            .spawn_scoped(scope, move || task_rx.recv().ok().map(|task| task()));

        match spawned {
            Ok(handle) => match task_tx.send(task) {
                Ok(()) => match handle.join() {
                    Ok(Some(value)) => value,
                    Ok(None) => unreachable!("worker exited before receiving its task"),
                    Err(panic) => std::panic::resume_unwind(panic),
                },
                // The worker died before receiving the task; we still own it.
                Err(std::sync::mpsc::SendError(task)) => task(),
            },
            Err(err) => {
                if is_worker_pool_unavailable(&err) {
                    warn!(error = %err, "worker threads unavailable; executing task in-line");
                } else {
                    warn!(error = %err, "worker spawn failed; executing task in-line");
                }
                task()
            }
        }
    })
}
