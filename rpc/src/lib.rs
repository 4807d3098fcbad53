// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dispatch policy for the RPC surface. The method handlers themselves
//! live in the server layer; this crate owns the constant tables deciding
//! which methods are served from local history, which must be proxied to
//! an upstream consensus peer, and how failures are shaped on the wire.

use once_cell::sync::Lazy;
use quill_backend::BackendError;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Methods answered from local history.
static HANDLED_METHODS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ledger",
        "ledger_entry",
        "ledger_range",
        "ledger_data",
        "tx",
        "account_tx",
        "account_info",
        "account_channels",
        "account_lines",
        "account_currencies",
        "account_offers",
        "account_objects",
        "book_offers",
        "nft_sell_offers",
        "nft_buy_offers",
        "subscribe",
        "unsubscribe",
    ]
    .into_iter()
    .collect()
});

/// Methods that require live consensus state and are always proxied.
static FORWARDED_METHODS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "submit",
        "submit_multisigned",
        "fee",
        "path_find",
        "ripple_path_find",
        "manifest",
    ]
    .into_iter()
    .collect()
});

/// Where a request should be answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Local,
    Forward,
    Unknown,
}

/// Decide how to dispatch `method` with the given request body. Requests
/// for the in-flight ledger (`ledger_index` of `current` or `closed`)
/// can only be answered by a consensus peer.
pub fn dispatch(method: &str, request: &Value) -> Dispatch {
    if FORWARDED_METHODS.contains(method) {
        return Dispatch::Forward;
    }
    if !HANDLED_METHODS.contains(method) {
        return Dispatch::Unknown;
    }
    let ledger_index = request.get("ledger_index").and_then(Value::as_str);
    if matches!(ledger_index, Some("current") | Some("closed")) {
        return Dispatch::Forward;
    }
    Dispatch::Local
}

/// Wire shape of a failed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub error: &'static str,
    pub error_code: u32,
    pub error_message: String,
}

impl RpcError {
    pub fn unknown_command() -> Self {
        Self {
            error: "unknownCmd",
            error_code: 32,
            error_message: "Unknown method.".to_string(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            error: "notReady",
            error_code: 13,
            error_message: "Not ready to handle this request.".to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": self.error,
            "error_code": self.error_code,
            "error_message": self.error_message,
            "status": "error",
            "type": "response",
        })
    }
}

impl From<&BackendError> for RpcError {
    fn from(backend_error: &BackendError) -> Self {
        match backend_error {
            BackendError::NotFound => Self {
                error: "lgrNotFound",
                error_code: 21,
                error_message: "ledgerNotFound".to_string(),
            },
            BackendError::InvalidRequest(message) => Self {
                error: "invalidParams",
                error_code: 31,
                error_message: message.clone(),
            },
            BackendError::Timeout => Self {
                error: "tooBusy",
                error_code: 9,
                error_message: "The server is too busy to help you now.".to_string(),
            },
            BackendError::Unavailable(_) | BackendError::Fatal(_) => Self {
                error: "internal",
                error_code: 73,
                error_message: "Internal error.".to_string(),
            },
        }
    }
}

/// Attach the partial-data warning to a response body.
pub fn attach_warning(mut response: Value, warning: Option<&'static str>) -> Value {
    if let (Some(warning), Some(body)) = (warning, response.as_object_mut()) {
        body.insert("warning".to_string(), Value::String(warning.to_string()));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_methods_are_forwarded() {
        for method in ["submit", "submit_multisigned", "fee", "path_find"] {
            assert_eq!(dispatch(method, &json!({})), Dispatch::Forward);
        }
    }

    #[test]
    fn history_methods_are_local_unless_the_ledger_is_live() {
        assert_eq!(dispatch("account_tx", &json!({})), Dispatch::Local);
        assert_eq!(
            dispatch("account_info", &json!({"ledger_index": "validated"})),
            Dispatch::Local
        );
        assert_eq!(
            dispatch("account_info", &json!({"ledger_index": "current"})),
            Dispatch::Forward
        );
        assert_eq!(
            dispatch("ledger", &json!({"ledger_index": "closed"})),
            Dispatch::Forward
        );
        assert_eq!(dispatch("ledger", &json!({"ledger_index": 100})), Dispatch::Local);
    }

    #[test]
    fn unknown_methods_are_flagged() {
        assert_eq!(dispatch("server_state_zzz", &json!({})), Dispatch::Unknown);
        let shaped = RpcError::unknown_command().to_json();
        assert_eq!(shaped["status"], "error");
        assert_eq!(shaped["type"], "response");
        assert_eq!(shaped["error"], "unknownCmd");
    }

    #[test]
    fn backend_errors_map_to_wire_codes() {
        let not_found: RpcError = (&BackendError::NotFound).into();
        assert_eq!(not_found.error, "lgrNotFound");
        assert_eq!(not_found.error_code, 21);

        let invalid: RpcError =
            (&BackendError::InvalidRequest("bad marker".to_string())).into();
        assert_eq!(invalid.error, "invalidParams");
        assert_eq!(invalid.error_message, "bad marker");
    }

    #[test]
    fn warnings_attach_to_partial_results() {
        let response = json!({"ledger_index": 5});
        let with = attach_warning(response.clone(), Some("Data may be incomplete"));
        assert_eq!(with["warning"], "Data may be incomplete");
        let without = attach_warning(response, None);
        assert!(without.get("warning").is_none());
    }
}
