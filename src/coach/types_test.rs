use super::*;
use crate::frame::ErrorCode;

// =============================================================================
// CoachError::error_code
// =============================================================================

#[test]
fn error_code_not_configured() {
    assert_eq!(CoachError::NotConfigured.error_code(), "E_COACH_NOT_CONFIGURED");
}

#[test]
fn error_code_api_response() {
    let err = CoachError::ApiResponse { status: 502, body: "bad gateway".into() };
    assert_eq!(err.error_code(), "E_COACH_RESPONSE");
}

#[test]
fn error_code_timeout() {
    assert_eq!(CoachError::Timeout(60).error_code(), "E_COACH_TIMEOUT");
}

// =============================================================================
// CoachError::retryable
// =============================================================================

#[test]
fn retryable_transport_and_server_errors() {
    assert!(CoachError::ApiRequest("conn refused".into()).retryable());
    assert!(CoachError::Timeout(5).retryable());
    assert!(CoachError::ApiResponse { status: 503, body: String::new() }.retryable());
    assert!(CoachError::ApiResponse { status: 429, body: String::new() }.retryable());
}

#[test]
fn not_retryable_client_errors() {
    assert!(!CoachError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert!(!CoachError::ApiParse("eof".into()).retryable());
    assert!(!CoachError::NotConfigured.retryable());
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[test]
fn dialogue_roles_serialize_as_self_and_other() {
    let entries = vec![
        DialogueHistoryEntry { role: DialogueRole::Own, content: "hi".into() },
        DialogueHistoryEntry { role: DialogueRole::Other, content: "hey".into() },
    ];
    let json = serde_json::to_value(&entries).unwrap();
    assert_eq!(json, serde_json::json!([
        { "role": "self", "content": "hi" },
        { "role": "other", "content": "hey" }
    ]));
}

#[test]
fn coaching_roles_serialize_as_user_and_ai() {
    let entries = vec![
        CoachingHistoryEntry { role: CoachingRole::User, content: "help".into() },
        CoachingHistoryEntry { role: CoachingRole::Ai, content: "sure".into() },
    ];
    let json = serde_json::to_value(&entries).unwrap();
    assert_eq!(json, serde_json::json!([
        { "role": "user", "content": "help" },
        { "role": "ai", "content": "sure" }
    ]));
}

#[test]
fn request_body_is_exactly_the_triple() {
    let dialogue = vec![DialogueHistoryEntry { role: DialogueRole::Other, content: "hey".into() }];
    let coaching: Vec<CoachingHistoryEntry> = Vec::new();
    let req = CoachRequest { user_input: "help me reply", dialogue_history: &dialogue, coaching_history: &coaching };

    let json = serde_json::to_value(&req).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 3);
    assert_eq!(obj["user_input"], "help me reply");
    assert_eq!(obj["dialogue_history"][0]["role"], "other");
    assert_eq!(obj["coaching_history"], serde_json::json!([]));
}
