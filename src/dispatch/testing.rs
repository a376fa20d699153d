//! Mock implementations for testing
//!
//! These mocks let the dispatcher run without a network or a database.

use super::traits::RecordStore;
use crate::db::{DbError, DispatchRecord};
use crate::transport::{Endpoint, ModelInfo, Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock Transport
// ============================================================================

/// Transport that returns queued responses
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    models: Vec<ModelInfo>,
    /// Record of every payload sent
    pub payloads: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            models: Vec::new(),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, id: &str) -> Self {
        self.models.push(ModelInfo {
            id: id.to_string(),
            owned_by: None,
        });
        self
    }

    pub fn queue_response(&self, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(body.to_string()));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    fn next_response(&self) -> Result<String, TransportError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::connect("No mock response queued")))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, _endpoint: &Endpoint, payload: &str) -> Result<String, TransportError> {
        self.payloads.lock().unwrap().push(payload.to_string());
        self.next_response()
    }

    async fn list_models(&self, _endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        Ok(self.models.clone())
    }
}

// ============================================================================
// Delayed Mock Transport (for cancellation testing)
// ============================================================================

/// Mock transport with configurable delay
pub struct DelayedMockTransport {
    inner: MockTransport,
    delay: Duration,
    /// Notified when a send starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockTransport::new(),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, body: &str) {
        self.inner.queue_response(body);
    }
}

#[async_trait]
impl Transport for DelayedMockTransport {
    async fn send(&self, _endpoint: &Endpoint, payload: &str) -> Result<String, TransportError> {
        self.inner.payloads.lock().unwrap().push(payload.to_string());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response()
    }

    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        self.inner.list_models(endpoint).await
    }
}

// ============================================================================
// Mock Record Store
// ============================================================================

/// In-memory record store that can be told to fail appends
pub struct MockRecordStore {
    conversations: Mutex<Vec<(String, String)>>,
    records: Mutex<Vec<DispatchRecord>>,
    /// Every append attempt: (conversation id, request, response)
    appends: Mutex<Vec<(String, String, String)>>,
    fail_appends: AtomicBool,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            appends: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn recorded_appends(&self) -> Vec<(String, String, String)> {
        self.appends.lock().unwrap().clone()
    }

    pub fn stored_records(&self) -> Vec<DispatchRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn register_conversation(&self, id: &str, title: &str) -> Result<bool, DbError> {
        let mut conversations = self.conversations.lock().unwrap();
        if conversations.iter().any(|(existing, _)| existing == id) {
            return Ok(false);
        }
        conversations.push((id.to_string(), title.to_string()));
        Ok(true)
    }

    async fn append_record(
        &self,
        conversation_id: &str,
        request_payload: &str,
        response_payload: &str,
    ) -> Result<DispatchRecord, DbError> {
        self.appends.lock().unwrap().push((
            conversation_id.to_string(),
            request_payload.to_string(),
            response_payload.to_string(),
        ));

        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("database or disk is full".to_string()),
            )));
        }

        let mut records = self.records.lock().unwrap();
        let record = DispatchRecord {
            sequence_id: i64::try_from(records.len()).unwrap() + 1,
            timestamp: Utc::now(),
            conversation_id: conversation_id.to_string(),
            request_payload: request_payload.to_string(),
            response_payload: response_payload.to_string(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn list_records(&self, conversation_id: &str) -> Result<Vec<DispatchRecord>, DbError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_drains_queue() {
        let mock = MockTransport::new();
        mock.queue_response("{}");

        let endpoint = Endpoint::default();
        assert_eq!(mock.send(&endpoint, "a").await.unwrap(), "{}");
        assert!(mock.send(&endpoint, "b").await.is_err());
        assert_eq!(mock.recorded_payloads(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mock_store_register_once() {
        let store = MockRecordStore::new();
        assert!(store.register_conversation("c", "t").await.unwrap());
        assert!(!store.register_conversation("c", "t").await.unwrap());
    }
}
