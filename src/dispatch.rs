//! Dispatch pipeline: validate, send, persist
//!
//! One call to [`Dispatcher::dispatch`] is one user turn. Invalid payloads
//! never reach the network or the store, and a failed send is never logged.
//! When the send succeeds but the log write fails, the response is still
//! handed back inside [`DispatchError::Storage`].
//!
//! Concurrent dispatches under the same conversation are not serialized;
//! their records land in arrival order.

mod state;
pub mod traits;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub(crate) mod testing;

pub use state::{DispatchStage, DispatchState};
pub use traits::RecordStore;

use crate::db::DbError;
use crate::schema::{SchemaValidator, ValidationError};
use crate::transcript::{reconstruct, Transcript};
use crate::transport::{Endpoint, ModelInfo, Transport, TransportError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Conversation id used when a payload does not carry a usable one
pub const UNKNOWN_CONVERSATION: &str = "unknown";

/// Payload field holding the conversation id
pub const CONVERSATION_ID_FIELD: &str = "conversation_id";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),
    /// The server answered but the exchange could not be logged
    #[error("Response received but not logged: {source}")]
    Storage {
        #[source]
        source: DbError,
        response: String,
    },
}

impl DispatchError {
    /// Stage the dispatch failed in
    pub fn stage(&self) -> DispatchStage {
        match self {
            Self::Validation(_) => DispatchStage::Validating,
            Self::Transport(_) => DispatchStage::Sending,
            Self::Storage { .. } => DispatchStage::Persisting,
        }
    }

    /// Response obtained before the failure, if any
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Storage { response, .. } => Some(response),
            Self::Validation(_) | Self::Transport(_) => None,
        }
    }
}

/// Read the conversation id from a payload. Never fails: anything other
/// than a non-blank string degrades to [`UNKNOWN_CONVERSATION`].
pub fn extract_conversation_id(payload: &str) -> String {
    serde_json::from_str::<Value>(payload)
        .ok()
        .as_ref()
        .and_then(|root| root.get(CONVERSATION_ID_FIELD))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| UNKNOWN_CONVERSATION.to_string(), String::from)
}

/// Single entry point for sending a chat turn
pub struct Dispatcher<S, T> {
    validator: Arc<SchemaValidator>,
    store: S,
    transport: T,
}

impl<S: RecordStore, T: Transport> Dispatcher<S, T> {
    pub fn new(validator: Arc<SchemaValidator>, store: S, transport: T) -> Self {
        Self {
            validator,
            store,
            transport,
        }
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate, send and log one payload; returns the raw response text
    pub async fn dispatch(&self, payload: &str, endpoint: &Endpoint) -> Result<String, DispatchError> {
        self.dispatch_with_cancel(payload, endpoint, &CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), aborting the send when `cancel` fires.
    /// A cancelled dispatch is not logged.
    pub async fn dispatch_with_cancel(
        &self,
        payload: &str,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<String, DispatchError> {
        let mut state = DispatchState::Validating;

        if let Err(e) = self.validator.validate(payload) {
            state = state.fail();
            tracing::warn!(
                state = ?state,
                violations = e.violations.len(),
                error = %e,
                "Payload rejected"
            );
            return Err(e.into());
        }

        let conversation_id = extract_conversation_id(payload);
        state = state.advance();
        tracing::debug!(
            conversation_id = %conversation_id,
            endpoint = %endpoint,
            state = ?state,
            "Payload validated"
        );

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::cancelled("Dispatch cancelled by caller")),
            result = self.transport.send(endpoint, payload) => result,
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                state = state.fail();
                tracing::warn!(
                    conversation_id = %conversation_id,
                    state = ?state,
                    kind = ?e.kind,
                    error = %e,
                    "Dispatch not sent"
                );
                return Err(e.into());
            }
        };
        state = state.advance();

        match self
            .store
            .append_record(&conversation_id, payload, &response)
            .await
        {
            Ok(record) => {
                state = state.advance();
                tracing::info!(
                    conversation_id = %conversation_id,
                    sequence_id = record.sequence_id,
                    state = ?state,
                    "Dispatch complete"
                );
                Ok(response)
            }
            Err(source) => {
                state = state.fail();
                tracing::error!(
                    conversation_id = %conversation_id,
                    state = ?state,
                    error = %source,
                    "Response not logged"
                );
                Err(DispatchError::Storage { source, response })
            }
        }
    }

    /// Start a new conversation with a fresh id
    pub async fn new_conversation(&self, title: &str) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.store.register_conversation(&id, title).await?;
        tracing::info!(conversation_id = %id, title = %title, "Started conversation");
        Ok(id)
    }

    /// Rebuild a conversation's transcript from its log
    pub async fn transcript(&self, conversation_id: &str) -> Result<Transcript, DbError> {
        let records = self.store.list_records(conversation_id).await?;
        let transcript = reconstruct(&records);
        for error in &transcript.errors {
            tracing::warn!(conversation_id = %conversation_id, error = %error, "Skipped part of record");
        }
        Ok(transcript)
    }

    pub async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        self.transport.list_models(endpoint).await
    }
}

impl<S, T> Dispatcher<S, T>
where
    S: RecordStore + 'static,
    T: Transport + 'static,
{
    /// Run a dispatch as a background task
    pub fn spawn(self: &Arc<Self>, payload: String, endpoint: Endpoint) -> DispatchHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dispatcher = Arc::clone(self);

        let task = tokio::spawn(async move {
            dispatcher
                .dispatch_with_cancel(&payload, &endpoint, &token)
                .await
        });

        DispatchHandle {
            guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

/// Handle to a background dispatch. Dropping it cancels the dispatch.
pub struct DispatchHandle {
    cancel: CancellationToken,
    guard: DropGuard,
    task: JoinHandle<Result<String, DispatchError>>,
}

impl DispatchHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this dispatch, for wiring to other signals
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the dispatch to finish
    pub async fn join(self) -> Result<String, DispatchError> {
        let Self { guard, task, .. } = self;
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(_) => Err(TransportError::cancelled("Dispatch task aborted").into()),
            },
        };
        // Finished: nothing left to cancel
        guard.disarm();
        outcome
    }
}
