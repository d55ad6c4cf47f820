use super::*;
use std::sync::Mutex;

/// Serializes tests that mutate the process environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// # Safety
/// Callers must hold `ENV_LOCK`.
unsafe fn clear_coach_env() {
    unsafe {
        std::env::remove_var("COACH_URL");
        std::env::remove_var("COACH_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("COACH_CONNECT_TIMEOUT_SECS");
    }
}

#[test]
fn from_env_missing_url_is_not_configured() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_coach_env() };
    assert!(matches!(CoachConfig::from_env(), Err(CoachError::NotConfigured)));
}

#[test]
fn from_env_defaults_timeouts() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_coach_env();
        std::env::set_var("COACH_URL", "https://coach.example.test/coach");
    }

    let cfg = CoachConfig::from_env().unwrap();
    assert_eq!(cfg.url, "https://coach.example.test/coach");
    assert_eq!(cfg.timeouts, CoachTimeouts::default());

    unsafe { clear_coach_env() };
}

#[test]
fn from_env_parses_timeout_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_coach_env();
        std::env::set_var("COACH_URL", "  http://localhost:8000/coach ");
        std::env::set_var("COACH_REQUEST_TIMEOUT_SECS", "15");
        std::env::set_var("COACH_CONNECT_TIMEOUT_SECS", "2");
    }

    let cfg = CoachConfig::from_env().unwrap();
    assert_eq!(cfg.url, "http://localhost:8000/coach");
    assert_eq!(cfg.timeouts, CoachTimeouts { request_secs: 15, connect_secs: 2 });

    unsafe { clear_coach_env() };
}

#[test]
fn parse_url_rejects_non_http() {
    let err = parse_url("ftp://coach").unwrap_err();
    assert!(matches!(err, CoachError::ConfigParse(msg) if msg.contains("ftp://coach")));
}

#[test]
fn parse_url_blank_is_not_configured() {
    assert!(matches!(parse_url("   "), Err(CoachError::NotConfigured)));
}
