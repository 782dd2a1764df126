use anyhow::Result;

/// Tracker and debouncer share one thread: lifecycle events are handled to completion one at a
/// time and network calls only suspend their own task.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
