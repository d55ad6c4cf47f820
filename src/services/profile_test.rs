use super::*;
use crate::state::test_helpers::seed_profile;
use crate::store::{MemoryStore, to_fields};

#[tokio::test]
async fn known_profile_resolves() {
    let store = MemoryStore::new();
    seed_profile(&store, "bob", "Bob").await;

    let profile = lookup_profile(&store, "bob").await.expect("lookup");
    assert_eq!(profile.display_name, "Bob");
    assert_eq!(profile.email.as_deref(), Some("bob@example.com"));
    assert!(profile.avatar_url.is_none());
}

#[tokio::test]
async fn missing_profile_degrades_to_unknown_user() {
    let store = MemoryStore::new();
    let profile = lookup_profile(&store, "ghost").await.expect("lookup");
    assert_eq!(profile, PartnerProfile::unknown("ghost"));
    assert_eq!(profile.display_name, UNKNOWN_USER_NAME);
}

#[tokio::test]
async fn malformed_or_blank_profile_degrades() {
    let store = MemoryStore::new();
    let blank = to_fields(&serde_json::json!({"display_name": "  "})).expect("object");
    store.put(&CollectionPath::users(), "blank", blank).await.expect("put");
    let blank_with_email = to_fields(&serde_json::json!({"display_name": "", "email": "carol.d@example.com"})).expect("object");
    store.put(&CollectionPath::users(), "carol", blank_with_email).await.expect("put");
    let wrong = to_fields(&serde_json::json!({"display_name": 42})).expect("object");
    store.put(&CollectionPath::users(), "wrong", wrong).await.expect("put");

    assert_eq!(lookup_profile(&store, "blank").await.expect("lookup").display_name, UNKNOWN_USER_NAME);
    let carol = lookup_profile(&store, "carol").await.expect("lookup");
    assert_eq!(carol.display_name, "carol.d");
    assert_eq!(carol.email.as_deref(), Some("carol.d@example.com"));
    assert_eq!(lookup_profile(&store, "wrong").await.expect("lookup"), PartnerProfile::unknown("wrong"));
}

#[test]
fn display_name_falls_back_to_email_local_part() {
    assert_eq!(display_name_for(Some(" Dana "), Some("dana@example.com")), "Dana");
    assert_eq!(display_name_for(None, Some("dana@example.com")), "dana");
    assert_eq!(display_name_for(Some(""), Some("@example.com")), UNKNOWN_USER_NAME);
    assert_eq!(display_name_for(None, None), UNKNOWN_USER_NAME);
}
