// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

use quill_types::{AccountId, Sequence, SequenceRangeSet};
use serde_json::Value;
use std::str::FromStr;

/// What a text frame on the upstream subscription stream amounted to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamMessage {
    /// The peer's advertised validated ranges, when present.
    pub validated_range: Option<SequenceRangeSet>,
    /// A newly validated ledger announcement, when present.
    pub validated_sequence: Option<Sequence>,
    /// A proposed-transaction payload to relay, when present.
    pub proposed: Option<Value>,
}

impl StreamMessage {
    /// Interpret one frame. Subscription acks nest their fields under
    /// `result`; stream events carry them at the top level. Unparseable
    /// pieces are skipped rather than failing the connection.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let object = value.as_object()?;
        let body = object
            .get("result")
            .and_then(Value::as_object)
            .unwrap_or(object);

        let mut message = StreamMessage::default();
        if let Some(ranges) = body.get("validated_ledgers").and_then(Value::as_str) {
            message.validated_range = SequenceRangeSet::parse(ranges).ok();
        }
        if let Some(sequence) = body.get("ledger_index").and_then(Value::as_u64) {
            message.validated_sequence = Sequence::try_from(sequence).ok();
        }
        let is_proposed = body.get("type").and_then(Value::as_str) == Some("transaction")
            && body.get("validated").and_then(Value::as_bool) != Some(true);
        if is_proposed {
            message.proposed = Some(value.clone());
        }
        Some(message)
    }

    /// Accounts named by a proposed payload, for per-account fan-out.
    /// Peers that include an `accounts_affected` array of hex ids get
    /// precise routing; payloads without it fan out to streams only.
    pub fn affected_accounts(payload: &Value) -> Vec<AccountId> {
        payload
            .get("accounts_affected")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|raw| AccountId::from_str(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The subscription request every source sends after connecting.
pub fn subscribe_command() -> String {
    serde_json::json!({
        "command": "subscribe",
        "streams": ["ledger", "transactions_proposed"],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_some};

    #[test]
    fn parses_ledger_closed_events() {
        let raw = r#"{"type":"ledgerClosed","ledger_index":32570,
                      "validated_ledgers":"32000-32570"}"#;
        let message = assert_some!(StreamMessage::parse(raw));
        assert_eq!(message.validated_sequence, Some(32570));
        let range = assert_some!(message.validated_range);
        assert!(range.contains(32000));
        assert_none!(message.proposed);
    }

    #[test]
    fn parses_subscription_ack_with_result() {
        let raw = r#"{"result":{"ledger_index":7,"validated_ledgers":"5-7"},"status":"success"}"#;
        let message = assert_some!(StreamMessage::parse(raw));
        assert_eq!(message.validated_sequence, Some(7));
        assert_some!(message.validated_range);
    }

    #[test]
    fn recognizes_proposed_transactions() {
        let raw = r#"{"type":"transaction","validated":false,
                      "transaction":{"TransactionType":"Payment"}}"#;
        let message = assert_some!(StreamMessage::parse(raw));
        assert_some!(message.proposed);

        // validated transaction events are not proposed traffic
        let validated = r#"{"type":"transaction","validated":true}"#;
        let message = assert_some!(StreamMessage::parse(validated));
        assert_none!(message.proposed);
    }

    #[test]
    fn malformed_frames_are_skipped() {
        assert_none!(StreamMessage::parse("not json"));
        assert_none!(StreamMessage::parse("[1,2,3]"));
        let empty = assert_some!(StreamMessage::parse("{}"));
        assert_eq!(empty, StreamMessage::default());
    }

    #[test]
    fn affected_accounts_prefer_the_explicit_list() {
        let with_list = serde_json::json!({
            "accounts_affected": [
                "0000000000000000000000000000000000000001",
                "not-an-account",
            ],
        });
        let accounts = StreamMessage::affected_accounts(&with_list);
        assert_eq!(accounts.len(), 1);

        let without = serde_json::json!({"transaction": {}});
        assert!(StreamMessage::affected_accounts(&without).is_empty());
    }
}
