//! Partner identity lookup over the `users` collection.
//!
//! Profiles are written by the identity provider, not by this service. A
//! missing or unreadable profile degrades to a placeholder identity rather
//! than failing the caller.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{CollectionPath, Store, StoreError};

pub const UNKNOWN_USER_NAME: &str = "Unknown User";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartnerProfile {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl PartnerProfile {
    #[must_use]
    pub fn unknown(user_id: &str) -> Self {
        Self { user_id: user_id.to_string(), display_name: UNKNOWN_USER_NAME.to_string(), email: None, avatar_url: None }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Resolve `user_id` to a display identity.
///
/// # Errors
///
/// Returns `Unavailable` if the store read fails. An absent or malformed
/// profile is not an error.
pub async fn lookup_profile(store: &dyn Store, user_id: &str) -> Result<PartnerProfile, StoreError> {
    let Some(doc) = store.get(&CollectionPath::users(), user_id).await? else {
        return Ok(PartnerProfile::unknown(user_id));
    };

    let body: ProfileBody = match doc.decode() {
        Ok(body) => body,
        Err(e) => {
            warn!(%user_id, error = %e, "profile: unreadable profile");
            return Ok(PartnerProfile::unknown(user_id));
        }
    };

    let display_name = display_name_for(body.display_name.as_deref(), body.email.as_deref());
    Ok(PartnerProfile { user_id: user_id.to_string(), display_name, email: body.email, avatar_url: body.avatar_url })
}

/// Display name, then the local part of the email, then `Unknown User`.
fn display_name_for(display_name: Option<&str>, email: Option<&str>) -> String {
    let named = display_name.map(str::trim).filter(|n| !n.is_empty());
    let from_email = || {
        email
            .and_then(|e| e.trim().split('@').next())
            .filter(|local| !local.is_empty())
    };
    named
        .or_else(from_email)
        .unwrap_or(UNKNOWN_USER_NAME)
        .to_string()
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
