// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Vendored generated code for the upstream peer's gRPC surface. Kept in
//! tree so builds do not require protoc; regenerate with `tonic-build`
//! against `proto/quill/ledger/v1/ledger.proto` when the contract changes.

pub mod ledger {
    pub mod v1 {
        include!("quill.ledger.v1.rs");
    }
}
