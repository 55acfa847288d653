//! Periodic expiry sweeps.
//!
//! Expiry is always re-checked on read, so sweeps are housekeeping: they
//! delete unused credentials past their TTL and move stale pending
//! proximity sessions to `expired`.

use crate::credentials::CredentialStore;
use crate::error::{AccessError, Result};
use crate::providers::{BeaconRegistry, CredentialRepository, KeyStore, ProximitySessionRepository};
use crate::proximity::ProximitySessionManager;
use std::sync::Arc;
use tokio::sync::watch;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Credentials deleted.
    pub credentials: u64,

    /// Sessions expired.
    pub sessions: u64,
}

/// Runs credential and session sweeps on an interval until shut down.
pub struct Sweeper<R, K, B, S> {
    credentials: Arc<CredentialStore<R, K>>,
    proximity: Arc<ProximitySessionManager<B, S>>,
    interval: std::time::Duration,
    shutdown: watch::Receiver<bool>,
}

impl<R, K, B, S> Sweeper<R, K, B, S>
where
    R: CredentialRepository,
    K: KeyStore,
    B: BeaconRegistry,
    S: ProximitySessionRepository,
{
    /// Create a sweeper.
    ///
    /// Returns the sweeper and a shutdown sender. Send `true` to stop it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::ValidationError`] if `interval` is not positive.
    pub fn new(
        credentials: Arc<CredentialStore<R, K>>,
        proximity: Arc<ProximitySessionManager<B, S>>,
        interval: chrono::Duration,
    ) -> Result<(Self, watch::Sender<bool>)> {
        let interval = interval
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                AccessError::ValidationError(format!("Sweep interval must be positive: {interval}"))
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok((
            Self {
                credentials,
                proximity,
                interval,
                shutdown: shutdown_rx,
            },
            shutdown_tx,
        ))
    }

    /// Run one pass of both sweeps.
    ///
    /// A failing sweep does not prevent the other from running; the first
    /// error is returned after both have been attempted.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let credentials = self.credentials.sweep_expired().await;
        let sessions = self.proximity.sweep_expired().await;

        Ok(SweepReport {
            credentials: credentials?,
            sessions: sessions?,
        })
    }

    /// Sweep on every tick until the shutdown signal fires.
    ///
    /// Errors from individual passes are logged and the loop continues.
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting expiry sweeper");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => tracing::debug!(
                            credentials = report.credentials,
                            sessions = report.sessions,
                            "Sweep pass complete"
                        ),
                        Err(e) => tracing::error!(error = %e, "Sweep pass failed"),
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::{CredentialConfig, KeyConfig, ProximityConfig};
    use crate::credentials::CredentialCodec;
    use crate::keys::KeyManager;
    use crate::mocks::{FixedClock, MockStore};
    use chrono::{Duration, Utc};

    fn sweeper(
        store: &MockStore,
        interval: Duration,
    ) -> Result<(Sweeper<MockStore, MockStore, MockStore, MockStore>, watch::Sender<bool>)> {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let keys = KeyManager::new(
            store.clone(),
            &KeyConfig::with_master_secret("sweeper-test-master-secret-0123456"),
            clock.clone(),
        )
        .unwrap();
        let codec = Arc::new(CredentialCodec::new(Arc::new(keys), clock.clone()));
        let credentials = Arc::new(CredentialStore::new(
            store.clone(),
            codec,
            clock.clone(),
            CredentialConfig::default(),
        ));
        let proximity = Arc::new(ProximitySessionManager::new(
            store.clone(),
            store.clone(),
            clock,
            ProximityConfig::default(),
        ));
        Sweeper::new(credentials, proximity, interval)
    }

    #[test]
    fn test_zero_interval_rejected() {
        let store = MockStore::new();
        assert!(matches!(
            sweeper(&store, Duration::zero()),
            Err(AccessError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_once_on_empty_store() {
        let store = MockStore::new();
        let (sweeper, _shutdown) = sweeper(&store, Duration::seconds(60)).unwrap();
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = MockStore::new();
        let (sweeper, shutdown) = sweeper(&store, Duration::seconds(60)).unwrap();

        let handle = tokio::spawn(sweeper.run());
        shutdown.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
