//! Distributed lock with token-value compare-and-delete.
//!
//! `acquire` is a single `SET key token NX PX ttl`; `release` is a single
//! Lua round trip that deletes the key only while it still holds our token,
//! so a lock that expired and was re-acquired elsewhere cannot be misreleased.

use std::time::Duration;

use rand::RngCore;

use gavel_core::error::GavelError;

use crate::store::KvStore;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// An acquired lock: key plus the per-acquisition token that authorizes
/// release.
#[derive(Debug, Clone)]
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

/// Process-local-plus-random token. The pid prefix makes expiry races
/// diagnosable in Redis; the random half makes the token unguessable.
pub(crate) fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", std::process::id(), hex::encode(bytes))
}

impl KvStore {
    /// Try to take `key` for `ttl`. Returns the guard on acquisition, `None`
    /// on contention. Transport errors bubble.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, GavelError> {
        let token = new_token();
        let mut conn = self.conn.clone();
        let res: Result<Option<String>, _> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await;
        match res {
            Ok(Some(_)) => {
                self.mark(true);
                Ok(Some(LockGuard { key: key.to_string(), token }))
            }
            Ok(None) => {
                self.mark(true);
                Ok(None)
            }
            Err(e) => {
                self.mark(false);
                Err(GavelError::Kv(e.to_string()))
            }
        }
    }

    /// Compare-and-delete release. Returns whether the key was still ours.
    pub async fn release(&self, guard: &LockGuard) -> Result<bool, GavelError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let res: Result<i64, _> = script
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await;
        match res {
            Ok(n) => {
                self.mark(true);
                Ok(n == 1)
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
    fn tokens_are_unique_and_pid_prefixed() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        let pid = std::process::id().to_string();
        assert!(a.starts_with(&pid));
        // pid + '-' + 32 hex chars
        assert_eq!(a.len(), pid.len() + 1 + 32);
    }
}
