//! Key renewal scheduling: initial generation, the periodic timer, and
//! operator-triggered rotation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use sealbox_crypto::Fingerprint;

use crate::error::{ControllerError, Result};
use crate::registry::KeyRegistry;

type TriggerAck = oneshot::Sender<Result<Fingerprint>>;

/// Drives key generation for a [`KeyRegistry`].
///
/// On start it synchronously generates a key if the registry is empty or the
/// most-recent key predates the configured cutoff, so a key is always
/// available before traffic is served. Afterwards a timer fires at `period`
/// intervals measured from the most-recent key's ordering time, and
/// [`trigger_now`](Self::trigger_now) forces an immediate rotation.
///
/// A period of zero disables the timer; triggered rotation keeps working.
pub struct KeyRenewer {
    trigger_tx: mpsc::Sender<TriggerAck>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl KeyRenewer {
    /// Perform startup generation if needed, then spawn the renewal loop.
    pub async fn start(registry: Arc<KeyRegistry>) -> Result<Self> {
        let period = registry.config().period;
        let cutoff = registry.config().cutoff;

        let needs_initial_key = registry.is_empty()
            || matches!(
                (registry.most_recent_ordering_time(), cutoff),
                (Some(newest), Some(cutoff)) if newest < cutoff
            );
        if needs_initial_key {
            registry.generate_key().await?;
        }

        let (trigger_tx, mut trigger_rx) = mpsc::channel::<TriggerAck>(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                let deadline = next_deadline(&registry, period);
                let timer = async {
                    match deadline {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = timer => {
                        if let Err(err) = registry.generate_key().await {
                            tracing::error!(error = %err, "scheduled key renewal failed");
                        }
                    }
                    msg = trigger_rx.recv() => match msg {
                        Some(ack) => {
                            let result = registry.generate_key().await;
                            if let Err(err) = &result {
                                tracing::error!(error = %err, "triggered key renewal failed");
                            }
                            let _ = ack.send(result);
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(Self {
            trigger_tx,
            shutdown_tx,
            handle,
        })
    }

    /// Rotate now, regardless of the timer. Resolves once the new key is
    /// registered (or the attempt failed), so callers can rely on the
    /// registry state afterwards.
    pub async fn trigger_now(&self) -> Result<Fingerprint> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.trigger_tx
            .send(ack_tx)
            .await
            .map_err(|_| ControllerError::RenewerStopped)?;
        ack_rx.await.map_err(|_| ControllerError::RenewerStopped)?
    }

    /// Stop the renewal loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Delay until the next scheduled renewal, or `None` when disabled.
///
/// Measured from the most-recent key's ordering time, so a restart does not
/// reset the rotation cadence. A deadline already in the past (a failed
/// renewal, a clock jump) falls back to one full period from now instead of
/// spinning.
fn next_deadline(registry: &KeyRegistry, period: Duration) -> Option<Duration> {
    if period.is_zero() {
        return None;
    }
    let chrono_period = chrono::Duration::from_std(period).ok()?;
    let now = chrono::Utc::now();
    let base = registry.most_recent_ordering_time().unwrap_or(now);
    let delay = (base + chrono_period - now).to_std().unwrap_or(period);
    Some(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::thread_rng;
    use sealbox_cluster::MemoryCluster;
    use sealbox_crypto::{generate_key_pair, self_signed_certificate};

    use crate::config::KeyRenewalConfig;
    use crate::registry::KeyMaterial;

    fn registry_with(config: KeyRenewalConfig) -> Arc<KeyRegistry> {
        Arc::new(KeyRegistry::new(Arc::new(MemoryCluster::new()), config).unwrap())
    }

    fn fast_config() -> KeyRenewalConfig {
        KeyRenewalConfig {
            key_size: 1024,
            period: Duration::ZERO,
            ..Default::default()
        }
    }

    fn backdated_material(days_ago: i64) -> KeyMaterial {
        let mut rng = thread_rng();
        let private_key = generate_key_pair(&mut rng, 1024).unwrap();
        let cert =
            self_signed_certificate(&private_key, Duration::from_secs(3600), "test").unwrap();
        let fingerprint =
            Fingerprint::of_public_key(&private_key.to_public_key()).unwrap();
        KeyMaterial {
            name: format!("old-{days_ago}"),
            private_key,
            cert_chain: vec![cert],
            fingerprint,
            ordering_time: Utc::now() - chrono::Duration::days(days_ago),
        }
    }

    #[tokio::test]
    async fn empty_registry_gets_an_initial_key() {
        let registry = registry_with(fast_config());
        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();
        assert_eq!(registry.len(), 1);
        renewer.shutdown().await;
    }

    #[tokio::test]
    async fn cutoff_forces_exactly_one_renewal() {
        // Key is 2 days old, cutoff at 1 day ago: renew once.
        let mut config = fast_config();
        config.cutoff = Some(Utc::now() - chrono::Duration::days(1));
        let registry = registry_with(config);
        registry.register_key(backdated_material(2));

        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();
        assert_eq!(registry.len(), 2);
        renewer.shutdown().await;
    }

    #[tokio::test]
    async fn fresh_key_is_not_renewed_at_startup() {
        // Key is 2 days old, cutoff at 3 days ago: nothing to do.
        let mut config = fast_config();
        config.cutoff = Some(Utc::now() - chrono::Duration::days(3));
        let registry = registry_with(config);
        registry.register_key(backdated_material(2));

        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();
        assert_eq!(registry.len(), 1);
        renewer.shutdown().await;
    }

    #[tokio::test]
    async fn zero_period_still_allows_triggered_rotation() {
        let registry = registry_with(fast_config());
        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();
        assert_eq!(registry.len(), 1);

        let fp = renewer.trigger_now().await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            Fingerprint::of_public_key(&registry.latest_public_key().unwrap()).unwrap(),
            fp
        );
        renewer.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_renewal_fires() {
        let mut config = fast_config();
        config.period = Duration::from_millis(100);
        let registry = registry_with(config);

        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while registry.len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registry.len() >= 2, "timer never produced a new key");
        renewer.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_after_shutdown_reports_stopped() {
        let registry = registry_with(fast_config());
        let renewer = KeyRenewer::start(registry.clone()).await.unwrap();

        let trigger_tx = renewer.trigger_tx.clone();
        renewer.shutdown().await;

        let (ack_tx, ack_rx) = oneshot::channel();
        // The loop is gone; either the send or the ack fails.
        let stopped = trigger_tx.send(ack_tx).await.is_err() || ack_rx.await.is_err();
        assert!(stopped);
    }
}
