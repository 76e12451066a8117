//! Periodic housekeeping
//!
//! Trims transient state only: spam-gate windows, HTTP rate-limit windows and
//! idle lock entries, plus an opportunistic ledger flush.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::coordinator::TransactionCoordinator;
use crate::middleware::RateLimiter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub spam_entries: usize,
    pub rate_windows: usize,
    pub idle_locks: usize,
    pub flushed: usize,
}

/// One maintenance pass
pub async fn run_once(shop: &TransactionCoordinator, limiters: &[RateLimiter]) -> MaintenanceReport {
    let mut report = MaintenanceReport {
        spam_entries: shop.spam_gate().cleanup(Utc::now()).await,
        idle_locks: shop.evict_idle_locks().await,
        ..MaintenanceReport::default()
    };
    for limiter in limiters {
        report.rate_windows += limiter.cleanup().await;
    }

    match shop.store().flush().await {
        Ok(flushed) => report.flushed = flushed,
        Err(err) => tracing::warn!(error = %err, "Maintenance flush failed, flusher will retry"),
    }

    tracing::debug!(
        spam_entries = report.spam_entries,
        rate_windows = report.rate_windows,
        idle_locks = report.idle_locks,
        flushed = report.flushed,
        "Maintenance pass complete"
    );
    report
}

/// Run `run_once` every `interval` until the runtime shuts down
pub fn spawn(
    shop: TransactionCoordinator,
    limiters: Vec<RateLimiter>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Maintenance task started");
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_once(&shop, &limiters).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::test_support::harness;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_run_once_flushes_and_evicts() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ONE).await;
        h.shop.submit_topup(user, "ZELLE", b"img", None).await.unwrap();

        let limiter = RateLimiter::per_minute(10);
        limiter.check("client").await;

        let report = run_once(&h.shop, &[limiter]).await;
        assert!(report.flushed > 0);
        assert!(report.idle_locks >= 1);
        assert!(h.shop.store().pending_writes().await.is_empty());
        assert!(h.backend.snapshot("topups").is_some());
    }
}
