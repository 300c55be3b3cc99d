use std::sync::Arc;

use crate::errors::MarketError;
use crate::local_store::{MemoryStorage, Storage, USER_KEY};
use crate::session::{Role, SessionRecord, SessionState, SessionStore};
use crate::tests::test_utils::FailingStorage;

fn store() -> (Arc<dyn Storage>, SessionStore) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    (Arc::clone(&storage), SessionStore::new(storage))
}

#[test]
fn write_then_read_returns_same_record() {
    let (_, sessions) = store();
    let record = SessionRecord::new("u-1", "ada@example.com", "Ada", "Lovelace", Role::Farmer);

    sessions.write_session(&record).unwrap();
    assert_eq!(sessions.read_session(), Some(record.clone()));
    assert_eq!(sessions.session_state(), SessionState::Authenticated(record));
}

#[test]
fn corrupted_blob_is_deleted_on_read() {
    let (storage, sessions) = store();
    storage.set(USER_KEY, "{not json").unwrap();

    assert_eq!(sessions.read_session(), None);
    assert_eq!(storage.get(USER_KEY).unwrap(), None);
}

#[test]
fn empty_id_is_rejected() {
    let (storage, sessions) = store();
    let record = SessionRecord::new("", "a@b.co", "", "", Role::Customer);

    let err = sessions.write_session(&record).unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));
    assert_eq!(storage.get(USER_KEY).unwrap(), None);
}

#[test]
fn record_without_token_still_parses() {
    let (storage, sessions) = store();
    storage
        .set(
            USER_KEY,
            r#"{"id":"legacy","role":"customer","issued_at":"2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();

    let record = sessions.read_session().unwrap();
    assert_eq!(record.id, "legacy");
    assert_eq!(record.email, "");
    assert!(record.token.is_none());
}

#[test]
fn failing_storage_degrades() {
    let sessions = SessionStore::new(Arc::new(FailingStorage));
    let record = SessionRecord::new("u-1", "a@b.co", "", "", Role::Customer);

    assert_eq!(sessions.read_session(), None);
    assert!(matches!(
        sessions.write_session(&record),
        Err(MarketError::StorageUnavailable { .. })
    ));
    sessions.clear_session();
    assert_eq!(sessions.session_state(), SessionState::Anonymous);
}

#[test]
fn clear_removes_the_record() {
    let (_, sessions) = store();
    sessions
        .write_session(&SessionRecord::new("u-1", "a@b.co", "", "", Role::Admin))
        .unwrap();
    sessions.clear_session();
    assert_eq!(sessions.read_session(), None);
}
