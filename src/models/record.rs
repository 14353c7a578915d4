use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// One relayed request, emitted on the `access` log target
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub client_addr: String,
    pub method: String,
    pub uri: String,
    pub target: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: u16,
    pub content_length: Option<u64>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub error_message: Option<String>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl RequestRecord {
    pub fn success(&self) -> bool {
        self.error_message.is_none() && self.status_code < 500
    }

    /// Write the record to the access log
    pub fn emit(&self) {
        info!(
            target: "access",
            request_id = %self.request_id,
            client = %self.client_addr,
            method = %self.method,
            uri = %self.uri,
            target_url = self.target.as_deref().unwrap_or("-"),
            endpoint = self.endpoint.as_deref().unwrap_or("-"),
            status = self.status_code,
            bytes = self.content_length.map(|n| n as i64).unwrap_or(-1),
            referer = self.referer.as_deref().unwrap_or("-"),
            user_agent = self.user_agent.as_deref().unwrap_or("-"),
            error = self.error_message.as_deref().unwrap_or(""),
            elapsed_ms = self.response_time_ms,
            "{} {} {}",
            self.method,
            self.uri,
            self.status_code
        );
    }
}
