// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn call_errors_pass_through_sync_and_session() {
    let sync: SyncError = CallError::network("offline").into();
    assert_eq!(sync.to_string(), "network error: offline");

    let session: SessionError = sync.into();
    assert_eq!(session.to_string(), "network error: offline");
}

#[test]
fn repository_error_is_prefixed() {
    let err: SyncError = RepositoryError::CorruptedData("bad cid".into()).into();
    assert_eq!(
        err.to_string(),
        "repository error: corrupted data: bad cid"
    );
}

#[test]
fn invalid_state_names_action() {
    let err = SessionError::InvalidState {
        action: "connect",
        state: "connected".into(),
    };
    assert_eq!(err.to_string(), "cannot connect while connected");
}
