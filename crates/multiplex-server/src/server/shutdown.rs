//! Bounded graceful shutdown.
//!
//! `axum`'s graceful shutdown waits for every open connection to finish. A
//! client that stops halfway through its headers or body would keep the
//! process alive indefinitely, so [`serve_with_grace`] gives the drain a fixed
//! budget once the shutdown signal has fired and returns when it runs out.

use axum::{Router, serve::Listener};
use core::{fmt::Debug, future::Future, time::Duration};
use tokio::sync::oneshot;

/// How the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every connection finished within the grace period.
    Complete,
    /// The grace period ran out with connections still open.
    Abandoned,
}

/// Serves `router` until `signal` resolves, then drains open connections for
/// at most `grace`.
///
/// # Errors
///
/// Returns the listener's I/O error if serving fails before shutdown.
pub async fn serve_with_grace<L, F>(
    listener: L,
    router: Router,
    signal: F,
    grace: Duration,
) -> std::io::Result<Drain>
where
    L: Listener,
    L::Addr: Debug,
    F: Future<Output = ()> + Send + 'static,
{
    let (fired_tx, fired_rx) = oneshot::channel();
    let served = axum::serve(listener, router).with_graceful_shutdown(async move {
        signal.await;
        let _ = fired_tx.send(());
    });
    let served = core::future::IntoFuture::into_future(served);
    tokio::pin!(served);

    tokio::select! {
        res = &mut served => res.map(|()| Drain::Complete),
        Ok(()) = fired_rx => {
            tracing::info!(grace = ?grace, "Draining open connections");
            match tokio::time::timeout(grace, &mut served).await {
                Ok(res) => res.map(|()| Drain::Complete),
                Err(_) => {
                    tracing::warn!(
                        grace = ?grace,
                        "Connections still open after grace period, closing them"
                    );
                    Ok(Drain::Abandoned)
                }
            }
        }
    }
}
