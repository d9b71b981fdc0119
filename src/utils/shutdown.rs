use tokio::sync::watch;

/// Resolves once the process-wide shutdown flag is raised or its sender is gone.
///
/// The borrow taken by `wait_for` is released before this returns, so the
/// future stays `Send` inside `select!` loops.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|down| *down).await;
}
