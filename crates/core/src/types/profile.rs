//! User profile shape cached by the session layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::UserId;

/// Profile data returned by the authentication backend and cached locally
/// for the lifetime of the session.
///
/// Only presentation-relevant fields live here; the server remains the
/// source of truth for account state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Server-side user ID.
    pub id: UserId,
    /// Display name.
    pub nickname: String,
    /// Avatar image URL, if the user has set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Phone number on file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Loyalty points balance.
    #[serde(default)]
    pub points: i64,
    /// Stored-value balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

impl UserProfile {
    /// Minimal profile with just an ID and display name.
    #[must_use]
    pub fn new(id: UserId, nickname: impl Into<String>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            avatar_url: None,
            phone: None,
            points: 0,
            balance: None,
        }
    }
}
