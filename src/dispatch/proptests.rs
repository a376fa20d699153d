//! Property-based tests for payload rejection, id extraction and transcript replay

use super::testing::{MockRecordStore, MockTransport};
use super::{extract_conversation_id, DispatchError, Dispatcher, UNKNOWN_CONVERSATION};
use crate::db::DispatchRecord;
use crate::schema::SchemaValidator;
use crate::transcript::{reconstruct, Message};
use crate::transport::Endpoint;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;

fn arb_message() -> impl Strategy<Value = Message> {
    (
        prop_oneof![Just("system"), Just("user"), Just("assistant")],
        "[a-zA-Z0-9 _.!?,]{0,40}",
    )
        .prop_map(|(role, content)| match role {
            "system" => Message::system(content),
            "user" => Message::user(content),
            _ => Message::assistant(content),
        })
}

/// Either a well-formed body or arbitrary text
fn arb_body(well_formed: impl Strategy<Value = String>) -> impl Strategy<Value = String> {
    prop_oneof![3 => well_formed, 1 => ".{0,30}"]
}

fn arb_record() -> impl Strategy<Value = DispatchRecord> {
    let request = prop::collection::vec(arb_message(), 0..4).prop_map(|messages| {
        serde_json::json!({ "model": "m", "messages": messages }).to_string()
    });
    let response = prop::collection::vec("[a-z ]{0,20}", 0..3).prop_map(|replies| {
        let choices: Vec<_> = replies
            .into_iter()
            .map(|content| {
                serde_json::json!({ "message": { "role": "assistant", "content": content } })
            })
            .collect();
        serde_json::json!({ "choices": choices }).to_string()
    });

    (1i64..10_000, arb_body(request), arb_body(response)).prop_map(
        |(sequence_id, request_payload, response_payload)| DispatchRecord {
            sequence_id,
            timestamp: Utc.timestamp_opt(1_700_000_000 + sequence_id, 0).unwrap(),
            conversation_id: "conv".to_string(),
            request_payload,
            response_payload,
        },
    )
}

/// Values of every JSON kind except the one named
fn arb_json_not(kind: &'static str) -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        Just(serde_json::json!([])),
        Just(serde_json::json!({ "k": 1 })),
    ]
    .prop_filter("kind excluded", move |v| match kind {
        "string" => !v.is_string(),
        "array" => !v.is_array(),
        _ => true,
    })
}

/// A payload with `model`, `messages` or both removed or mistyped
fn arb_broken_payload() -> impl Strategy<Value = String> {
    let base = (
        "[a-z0-9-]{1,12}",
        prop::collection::vec(arb_message(), 0..4),
    )
        .prop_map(|(model, messages)| {
            serde_json::json!({ "conversation_id": "conv", "model": model, "messages": messages })
        });

    // None drops the field, Some replaces it with a value of the wrong kind
    let model_fault = prop::option::of(arb_json_not("string"));
    let messages_fault = prop::option::of(arb_json_not("array"));
    let which = 1u8..=3;

    (base, which, model_fault, messages_fault).prop_map(
        |(mut payload, which, model_fault, messages_fault)| {
            let object = payload.as_object_mut().expect("payload is an object");
            if which & 1 != 0 {
                match model_fault {
                    Some(value) => object.insert("model".to_string(), value),
                    None => object.remove("model"),
                };
            }
            if which & 2 != 0 {
                match messages_fault {
                    Some(value) => object.insert("messages".to_string(), value),
                    None => object.remove("messages"),
                };
            }
            payload.to_string()
        },
    )
}

proptest! {
    #[test]
    fn broken_payloads_never_reach_transport_or_store(payload in arb_broken_payload()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.queue_response("{}");
        let store = Arc::new(MockRecordStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(SchemaValidator::new().unwrap()),
            store.clone(),
            transport.clone(),
        );

        let result = runtime.block_on(dispatcher.dispatch(&payload, &Endpoint::default()));

        prop_assert!(matches!(result, Err(DispatchError::Validation(_))), "{payload}");
        prop_assert_eq!(transport.call_count(), 0);
        prop_assert!(store.recorded_appends().is_empty());
    }

    #[test]
    fn extraction_never_yields_blank(payload in ".{0,60}") {
        let id = extract_conversation_id(&payload);
        prop_assert!(!id.trim().is_empty());
    }

    #[test]
    fn extraction_returns_string_ids(id in "[a-zA-Z0-9-]{1,36}") {
        let payload = serde_json::json!({ "conversation_id": id, "model": "m" }).to_string();
        prop_assert_eq!(extract_conversation_id(&payload), id);
    }

    #[test]
    fn extraction_ignores_non_string_ids(n in any::<i64>()) {
        let payload = serde_json::json!({ "conversation_id": n }).to_string();
        prop_assert_eq!(extract_conversation_id(&payload), UNKNOWN_CONVERSATION);
    }

    #[test]
    fn reconstruction_is_idempotent(records in prop::collection::vec(arb_record(), 0..6)) {
        prop_assert_eq!(reconstruct(&records), reconstruct(&records));
    }

    #[test]
    fn well_formed_records_replay_every_message(
        exchanges in prop::collection::vec((prop::collection::vec(arb_message(), 1..4), "[a-z]{1,10}"), 1..5)
    ) {
        let mut expected = Vec::new();
        let records: Vec<_> = exchanges
            .iter()
            .enumerate()
            .map(|(i, (messages, reply))| {
                expected.extend(messages.iter().cloned());
                expected.push(Message::assistant(reply.clone()));
                let sequence_id = i64::try_from(i).unwrap() + 1;
                DispatchRecord {
                    sequence_id,
                    timestamp: Utc.timestamp_opt(1_700_000_000 + sequence_id, 0).unwrap(),
                    conversation_id: "conv".to_string(),
                    request_payload: serde_json::json!({ "model": "m", "messages": messages }).to_string(),
                    response_payload: serde_json::json!({
                        "choices": [{ "message": { "role": "assistant", "content": reply } }]
                    })
                    .to_string(),
                }
            })
            .collect();

        let transcript = reconstruct(&records);
        prop_assert!(transcript.is_complete());
        prop_assert_eq!(transcript.messages, expected);
    }
}
