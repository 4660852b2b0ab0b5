use std::cell::RefCell;
use std::time::Duration;

use thiserror::Error;

use quotamon_core::QuotaKind;

use crate::wire::WireRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error pushing to {url}: {msg}")]
    Http { url: String, msg: String },

    #[error("Remote returned status {code} for {url}")]
    Status { url: String, code: u16 },
}

/// Transport boundary toward the remote bookkeeping service.
///
/// One call per chunk per sink key; success is an empty body with a success
/// status, nothing else is assumed of the response.
pub trait QuotaSink {
    fn push(&self, sink_key: &str, kind: QuotaKind, records: &[WireRecord])
        -> Result<(), SinkError>;
}

/// HTTP sink posting chunks to the account service REST API.
///
/// The engine processes one storage system at a time and this push is its
/// only blocking operation. Timeout and retry policy stay with the HTTP
/// layer.
pub struct HttpSink {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into(),
            token,
            client,
        }
    }

    fn sink_url(&self, sink_key: &str, kind: QuotaKind) -> String {
        let segment = match kind {
            QuotaKind::User => "user",
            QuotaKind::Fileset => "vo",
        };
        format!(
            "{}/usage/storage/{}/{}/size",
            self.base_url.trim_end_matches('/'),
            sink_key,
            segment
        )
    }
}

impl QuotaSink for HttpSink {
    fn push(
        &self,
        sink_key: &str,
        kind: QuotaKind,
        records: &[WireRecord],
    ) -> Result<(), SinkError> {
        let url = self.sink_url(sink_key, kind);

        let mut request = self.client.put(&url).json(records);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| SinkError::Http {
            url: url.clone(),
            msg: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(SinkError::Status {
                url,
                code: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/// One captured push, as seen by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub sink_key: String,
    pub kind: QuotaKind,
    pub records: Vec<WireRecord>,
}

/// Sink that records every push in memory. Test double for the dispatcher
/// and orchestration paths.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: RefCell<Vec<SinkCall>>,
    fail_with_status: Option<u16>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every push fails with the given HTTP status.
    pub fn failing(status: u16) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail_with_status: Some(status),
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn total_records(&self) -> usize {
        self.calls.borrow().iter().map(|c| c.records.len()).sum()
    }
}

impl QuotaSink for RecordingSink {
    fn push(
        &self,
        sink_key: &str,
        kind: QuotaKind,
        records: &[WireRecord],
    ) -> Result<(), SinkError> {
        if let Some(code) = self.fail_with_status {
            return Err(SinkError::Status {
                url: format!("recording://{}", sink_key),
                code,
            });
        }
        self.calls.borrow_mut().push(SinkCall {
            sink_key: sink_key.to_string(),
            kind,
            records: records.to_vec(),
        });
        Ok(())
    }
}
