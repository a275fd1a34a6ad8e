use tokio::sync::watch;

/// Resolves once `shutdown` carries `true` or its sender is dropped.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
