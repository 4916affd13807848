//! Transient-infra retry.
//!
//! Retries deadlocks, serialization failures and connection drops with
//! exponential, jittered backoff. Business errors pass straight through —
//! only the listed SQLSTATEs and transport-level I/O are transient.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use gavel_core::constants::{DB_RETRY_ATTEMPTS, DB_RETRY_BASE_DELAY};

/// SQLSTATEs considered transient: serialization_failure, deadlock_detected,
/// sqlclient_unable_to_establish_sqlconnection, rejected_establishment,
/// connection_failure, admin_shutdown.
const TRANSIENT_SQLSTATES: [&str; 6] = ["40001", "40P01", "08001", "08004", "08006", "57P01"];

pub fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|c| TRANSIENT_SQLSTATES.contains(&c.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

/// Exponential base delay for the given retry (1-based).
fn backoff_delay(retry: u32) -> Duration {
    DB_RETRY_BASE_DELAY * 2u32.saturating_pow(retry.saturating_sub(1))
}

fn jittered(base: Duration) -> Duration {
    let half = (base.as_millis() as u64 / 2).max(1);
    base + Duration::from_millis(rand::thread_rng().gen_range(0..half))
}

/// Run `op`, retrying transient failures up to the retry budget.
pub async fn with_db_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < DB_RETRY_ATTEMPTS && is_transient(&e) => {
                let delay = jittered(backoff_delay(attempt));
                warn!(
                    op = op_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient db error; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn io_and_pool_errors_are_transient() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_transient(&io));
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn business_errors_are_not_transient() {
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::ColumnNotFound("x".into())));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(1), DB_RETRY_BASE_DELAY);
        assert_eq!(backoff_delay(2), DB_RETRY_BASE_DELAY * 2);
        assert_eq!(backoff_delay(3), DB_RETRY_BASE_DELAY * 4);
    }

    #[test]
    fn jitter_stays_within_half_base() {
        for retry in 1..=3 {
            let base = backoff_delay(retry);
            for _ in 0..50 {
                let d = jittered(base);
                assert!(d >= base);
                assert!(d < base + base / 2 + Duration::from_millis(1));
            }
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = with_db_retry("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_db_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), DB_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_db_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
