use crate::settings::{seconds, DendriteConfig};
use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{event, Level};

/// Lazily created pooled HTTP session shared by every call of one dendrite.
///
/// The client is internally reference counted: calls in flight keep their
/// own handle, so closing only stops new calls from reusing the pool.
#[derive(Debug)]
pub struct SessionManager {
    config: DendriteConfig,
    client: Mutex<Option<reqwest::Client>>,
    opened: AtomicUsize,
}

impl SessionManager {
    pub fn new(config: DendriteConfig) -> Self {
        SessionManager {
            config,
            client: Mutex::new(None),
            opened: AtomicUsize::new(0),
        }
    }

    /// The open session, created on first use.
    pub fn client(&self) -> Result<reqwest::Client> {
        let mut slot = self.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build()?;
        *slot = Some(client.clone());
        let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        event!(Level::TRACE, "dendrite session {} opened", opened);
        Ok(client)
    }

    /// Release the session. Returns false if there was nothing to close, so
    /// each opened session is closed exactly once.
    pub fn close(&self) -> bool {
        let closed = self.lock().take().is_some();
        if closed {
            event!(Level::TRACE, "dendrite session closed");
        }
        closed
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn build(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .pool_idle_timeout(self.config.pool_idle_timeout.map(seconds));
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(seconds(connect_timeout));
        }
        Ok(builder.build()?)
    }

    fn lock(&self) -> MutexGuard<'_, Option<reqwest::Client>> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Closes the session when dropped, also on panic or cancellation.
pub(crate) struct SessionRelease<'a>(pub(crate) &'a SessionManager);

impl Drop for SessionRelease<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_reuse_and_single_close_test() {
        let session = SessionManager::new(DendriteConfig::default());
        assert!(!session.is_open());
        assert_eq!(session.opened(), 0);

        session.client().unwrap();
        session.client().unwrap();
        assert!(session.is_open());
        assert_eq!(session.opened(), 1);

        assert!(session.close());
        assert!(!session.close());
        assert!(!session.is_open());

        session.client().unwrap();
        assert_eq!(session.opened(), 2);
    }

    #[test]
    fn release_guard_closes_test() {
        let session = SessionManager::new(DendriteConfig::default());
        session.client().unwrap();
        {
            let _release = SessionRelease(&session);
        }
        assert!(!session.is_open());
    }
}
