use tokio::select;
use tokio_util::sync::CancellationToken;

/// Waits for either an interrupt or another module asking to stop, then cancels `cancelation` so
/// every module sees the same signal.
///
/// The browser normally stops the host by closing its stdin, which the native messaging module
/// reports through the token. Interrupts are mostly useful when running the host by hand.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}
