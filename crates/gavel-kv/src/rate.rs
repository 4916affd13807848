//! Fixed-window rate counter: atomic INCR with expiry set on the first
//! increment. Approximate sliding behavior is sufficient for burst
//! suppression, which is what callers contract for.

use std::time::Duration;

use gavel_core::error::GavelError;

use crate::store::KvStore;

const RATE_SCRIPT: &str = r#"
local current = redis.call("incr", KEYS[1])
if current == 1 then
    redis.call("expire", KEYS[1], ARGV[1])
end
return current
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub current: u64,
}

/// `allowed := current <= max`.
pub(crate) fn decide(current: u64, max: u64) -> RateDecision {
    RateDecision { allowed: current <= max, current }
}

impl KvStore {
    /// Count one event against `key` and decide. Errors bubble; the bid path
    /// treats them as `service_unavailable`.
    pub async fn rate(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> Result<RateDecision, GavelError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RATE_SCRIPT);
        let res: Result<u64, _> = script
            .key(key)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await;
        match res {
            Ok(current) => {
                self.mark(true);
                Ok(decide(current, max))
            }
            Err(e) => {
                self.mark(false);
                Err(GavelError::Kv(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_inclusive() {
        assert!(decide(1, 5).allowed);
        assert!(decide(5, 5).allowed);
        assert!(!decide(6, 5).allowed);
    }

    #[test]
    fn decision_reports_current() {
        assert_eq!(decide(3, 5), RateDecision { allowed: true, current: 3 });
    }
}
