//! Storage seam for the dispatcher
//!
//! Lets the dispatcher run against mock storage in tests.

use crate::db::{Database, DbError, DispatchRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable log of dispatched exchanges
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert the conversation if absent; `true` if this call created it
    async fn register_conversation(&self, id: &str, title: &str) -> Result<bool, DbError>;

    /// Append one exchange under a conversation
    async fn append_record(
        &self,
        conversation_id: &str,
        request_payload: &str,
        response_payload: &str,
    ) -> Result<DispatchRecord, DbError>;

    /// All records of a conversation in timestamp order
    async fn list_records(&self, conversation_id: &str) -> Result<Vec<DispatchRecord>, DbError>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn register_conversation(&self, id: &str, title: &str) -> Result<bool, DbError> {
        (**self).register_conversation(id, title).await
    }

    async fn append_record(
        &self,
        conversation_id: &str,
        request_payload: &str,
        response_payload: &str,
    ) -> Result<DispatchRecord, DbError> {
        (**self)
            .append_record(conversation_id, request_payload, response_payload)
            .await
    }

    async fn list_records(&self, conversation_id: &str) -> Result<Vec<DispatchRecord>, DbError> {
        (**self).list_records(conversation_id).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

#[async_trait]
impl RecordStore for Database {
    async fn register_conversation(&self, id: &str, title: &str) -> Result<bool, DbError> {
        Database::register_conversation(self, id, title)
    }

    async fn append_record(
        &self,
        conversation_id: &str,
        request_payload: &str,
        response_payload: &str,
    ) -> Result<DispatchRecord, DbError> {
        Database::append_record(self, conversation_id, request_payload, response_payload)
    }

    async fn list_records(&self, conversation_id: &str) -> Result<Vec<DispatchRecord>, DbError> {
        Database::list_records(self, conversation_id)
    }
}
