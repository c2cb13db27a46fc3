//! Session release on every exit path
//!
//! Dropping an extraction future (a per-target timeout, an aborted task) skips
//! any `close().await` written after the queries. `SessionGuard` owns the
//! client and hands it to its async close function exactly once: explicitly
//! through [`SessionGuard::release`], or from `Drop` on a spawned task.

use std::future::Future;

/// Owns a client together with the async function that releases it
pub struct SessionGuard<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    inner: Option<(T, F)>,
}

impl<T, F, Fut> SessionGuard<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(client: T, close: F) -> Self {
        Self {
            inner: Some((client, close)),
        }
    }

    /// The guarded client; `None` once released
    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref().map(|(client, _)| client)
    }

    /// Release the client and wait for the close to finish
    pub async fn release(mut self) {
        if let Some((client, close)) = self.inner.take() {
            close(client).await;
        }
    }
}

impl<T, F, Fut> Drop for SessionGuard<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        let Some((client, close)) = self.inner.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("releasing session of an abandoned extraction");
                handle.spawn(close(client));
            }
            Err(_) => tracing::warn!("no runtime available to release session"),
        }
    }
}
