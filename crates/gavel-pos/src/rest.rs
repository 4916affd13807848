//! REST adapter: posts the POS contract as JSON to a configured base URL.
//! Timeout and breaker handling live in [`crate::GuardedPos`]; this adapter
//! only does transport.

use async_trait::async_trait;

use crate::{CaptureRequest, CaptureResponse, PosError, PosProvider, RefundRequest, RefundResponse};

pub struct RestPos {
    http: reqwest::Client,
    base_url: String,
}

impl RestPos {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp, PosError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .http
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| PosError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PosError::Transport(format!("pos returned {}", resp.status())));
        }
        resp.json().await.map_err(|e| PosError::Transport(e.to_string()))
    }
}

#[async_trait]
impl PosProvider for RestPos {
    async fn capture(&self, req: &CaptureRequest) -> Result<CaptureResponse, PosError> {
        self.post("capture", req).await
    }

    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse, PosError> {
        self.post("refund", req).await
    }
}
