//! Bounded polling for destroy verification.
//!
//! A resource counts as gone once its describe call reports `NotFound`. Every
//! other directory error ends the wait immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::directory::IotRegistry;
use crate::error::{CancelReason, DirectoryError, ReconcileError, ResourceKind, Result};
use crate::types::{CertificateDescription, ThingTypeDescription};

#[derive(Clone, Debug)]
pub struct WaitConfig {
    /// Maximum number of describe calls.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// The grown delay is clamped into `0..=max_delay` for any multiplier.
    pub backoff_multiplier: f64,
    /// Overall bound, raced against each describe call and each sleep.
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(120),
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout, ..Default::default() }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = (delay.as_secs_f64() * self.backoff_multiplier)
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        Duration::try_from_secs_f64(next).unwrap_or(self.max_delay)
    }
}

fn gave_up(operation: &str, attempts: u32) -> ReconcileError {
    warn!(operation = %operation, attempts, "resource still present, giving up");
    ReconcileError::StillPresent { operation: operation.to_string(), attempts }
}

/// Calls `describe` until it reports `NotFound`.
///
/// Stops with `StillPresent` after `max_attempts` calls or once `timeout`
/// elapses, even while a describe call is still in flight. Cancelling
/// `cancel` ends the wait with `Cancelled`.
pub async fn wait_until_absent<F, Fut, T>(
    config: &WaitConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut describe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, DirectoryError>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled(CancelReason::Requested)),
            _ = tokio::time::sleep_until(deadline) => return Err(gave_up(operation, attempt)),
            r = describe() => r,
        };
        match outcome {
            Err(e) if e.is_not_found() => {
                debug!(operation = %operation, attempt, "resource is gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }

        // jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let sleep_for = Duration::try_from_secs_f64(delay.as_secs_f64() * jitter).unwrap_or(delay);
        if attempt >= config.max_attempts || Instant::now() + sleep_for > deadline {
            return Err(gave_up(operation, attempt));
        }

        debug!(operation = %operation, attempt, delay_ms = sleep_for.as_millis() as u64, "resource still present");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled(CancelReason::Requested)),
            _ = tokio::time::sleep(sleep_for) => {}
        }
        delay = config.next_delay(delay);
    }
}

pub async fn describe_certificate<R: IotRegistry + ?Sized>(registry: &R, certificate_id: &str) -> Result<CertificateDescription> {
    registry.describe_certificate(certificate_id).await.map_err(|e| {
        if e.is_not_found() {
            ReconcileError::NotFound { kind: ResourceKind::Certificate, name: certificate_id.to_string() }
        } else {
            e.into()
        }
    })
}

pub async fn describe_thing_type<R: IotRegistry + ?Sized>(registry: &R, name: &str) -> Result<ThingTypeDescription> {
    registry.describe_thing_type(name).await.map_err(|e| {
        if e.is_not_found() {
            ReconcileError::NotFound { kind: ResourceKind::ThingType, name: name.to_string() }
        } else {
            e.into()
        }
    })
}

pub async fn certificate_absent<R: IotRegistry + ?Sized>(
    registry: &R,
    certificate_id: &str,
    config: &WaitConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let op = format!("DescribeCertificate {certificate_id}");
    wait_until_absent(config, cancel, &op, || registry.describe_certificate(certificate_id)).await
}

pub async fn thing_type_absent<R: IotRegistry + ?Sized>(
    registry: &R,
    name: &str,
    config: &WaitConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let op = format!("DescribeThingType {name}");
    wait_until_absent(config, cancel, &op, || registry.describe_thing_type(name)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryErrorKind;
    use crate::memory::MemoryDirectory;
    use crate::types::CertificateStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> WaitConfig {
        WaitConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(5),
        }
    }

    fn cert(id: &str) -> CertificateDescription {
        CertificateDescription {
            certificate_id: id.into(),
            certificate_arn: format!("arn:aws:iot:us-west-2:123456789012:cert/{id}"),
            status: CertificateStatus::Inactive,
        }
    }

    #[tokio::test]
    async fn absent_resource_returns_immediately() {
        let dir = MemoryDirectory::new();
        certificate_absent(&dir, "nope", &fast(3), &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn waits_until_resource_disappears() {
        let dir = MemoryDirectory::new();
        dir.add_certificate(cert("abc"));
        dir.vanish_after("abc", 2);
        certificate_absent(&dir, "abc", &fast(5), &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let dir = MemoryDirectory::new();
        dir.add_certificate(cert("abc"));
        let err = certificate_absent(&dir, "abc", &fast(3), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::StillPresent { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn gives_up_at_timeout() {
        let cfg = WaitConfig {
            max_attempts: 1000,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 1.0,
            timeout: Duration::from_millis(50),
        };
        let calls = AtomicU32::new(0);
        let err = wait_until_absent(&cfg, &CancellationToken::new(), "DescribeThingType sensor", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DirectoryError>(()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ReconcileError::StillPresent { .. }));
        assert!(calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn other_errors_end_the_wait() {
        let err = wait_until_absent(&fast(5), &CancellationToken::new(), "DescribeThingType sensor", || async {
            Err::<(), _>(DirectoryError::new(DirectoryErrorKind::Throttled, "DescribeThingType", "slow down"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.directory_kind(), Some(DirectoryErrorKind::Throttled));
    }

    #[tokio::test]
    async fn timeout_bounds_a_stalled_describe() {
        let cfg = WaitConfig { timeout: Duration::from_millis(50), ..fast(5) };
        let cancel = CancellationToken::new();
        let wait = wait_until_absent(&cfg, &cancel, "DescribeCertificate abc", || {
            std::future::pending::<std::result::Result<(), DirectoryError>>()
        });
        let err = tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("wait must end at its own timeout")
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StillPresent { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let dir = MemoryDirectory::new();
        dir.add_certificate(cert("abc"));
        let cfg = WaitConfig {
            max_attempts: 1000,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 1.0,
            timeout: Duration::from_secs(30),
        };
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                token.cancel();
            })
        };
        let err = tokio::time::timeout(Duration::from_secs(1), certificate_absent(&dir, "abc", &cfg, &token))
            .await
            .expect("cancellation must end the wait")
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled(CancelReason::Requested)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_describe() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wait_until_absent(&fast(5), &token, "DescribeThingType sensor", || {
            std::future::pending::<std::result::Result<(), DirectoryError>>()
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let mut cfg = fast(3);
        assert_eq!(cfg.next_delay(Duration::from_millis(1)), Duration::from_millis(2));
        assert_eq!(cfg.next_delay(Duration::from_millis(4)), Duration::from_millis(5));
        cfg.backoff_multiplier = -1.0;
        assert_eq!(cfg.next_delay(Duration::from_millis(4)), Duration::ZERO);
        cfg.backoff_multiplier = f64::NAN;
        assert_eq!(cfg.next_delay(Duration::from_millis(4)), cfg.max_delay);
        cfg.backoff_multiplier = f64::INFINITY;
        assert_eq!(cfg.next_delay(Duration::from_millis(4)), cfg.max_delay);
    }

    #[tokio::test]
    async fn degenerate_multiplier_still_gives_up() {
        let dir = MemoryDirectory::new();
        dir.add_certificate(cert("abc"));
        for m in [-1.0, f64::NAN] {
            let cfg = WaitConfig { backoff_multiplier: m, ..fast(3) };
            let err = certificate_absent(&dir, "abc", &cfg, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, ReconcileError::StillPresent { attempts: 3, .. }));
        }
    }

    #[tokio::test]
    async fn describe_maps_not_found_to_typed_error() {
        let dir = MemoryDirectory::new();
        let err = describe_thing_type(&dir, "sensor").await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound { kind: ResourceKind::ThingType, .. }));

        dir.add_certificate(cert("abc"));
        let d = describe_certificate(&dir, "abc").await.unwrap();
        assert_eq!(d.status, CertificateStatus::Inactive);
    }
}
