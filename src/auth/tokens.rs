//! Token storage and management

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// The slot only ever holds one token, so its id never changes.
pub const SLOT_ID: u32 = 1;

/// How many displaced tokens are kept for inspection.
pub const RETIRED_HISTORY_LIMIT: usize = 5;

/// Grant that produced a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    AuthorizationCode,
    RefreshToken,
}

/// Persisted status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Revoked,
    Refreshed,
}

/// Observable lifecycle state, combining the status flag with expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    Expired,
    Revoked,
    Refreshed,
}

/// Stored access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default = "slot_id")]
    pub id: u32,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub flow_type: FlowType,
    pub user_id: Option<String>,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

fn slot_id() -> u32 {
    SLOT_ID
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        match self.status {
            TokenStatus::Revoked => TokenState::Revoked,
            TokenStatus::Refreshed => TokenState::Refreshed,
            TokenStatus::Active if self.is_expired(now) => TokenState::Expired,
            TokenStatus::Active => TokenState::Active,
        }
    }

    /// Seconds until expiry, zero once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Whether the token is within `margin` of expiring.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    /// Whether `id` (as given by a caller) names this token.
    pub fn matches_id(&self, id: &str) -> bool {
        id.trim().parse::<u32>().map_or(false, |n| n == self.id)
    }
}

/// Counts shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStatistics {
    pub total_tokens: usize,
    pub active_tokens: usize,
    pub expired_tokens: usize,
    pub revoked_tokens: usize,
}

impl TokenStatistics {
    pub fn from_slot(slot: Option<&Token>, now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        if let Some(token) = slot {
            stats.total_tokens = 1;
            match token.state(now) {
                TokenState::Active => stats.active_tokens = 1,
                TokenState::Expired => stats.expired_tokens = 1,
                TokenState::Revoked => stats.revoked_tokens = 1,
                TokenState::Refreshed => {}
            }
        }
        stats
    }
}

/// Single-slot token store.
///
/// Writing a token displaces the previous one into a short retired history;
/// the slot itself never holds more than one token.
pub trait TokenStore: Send {
    fn get(&self) -> Result<Option<Token>, StoreError>;

    /// Overwrite the slot. The displaced token, if any, is retired with
    /// `retire_as` as its status, or with its own status when `None`.
    fn replace(&mut self, token: Token, retire_as: Option<TokenStatus>) -> Result<(), StoreError>;

    /// Flag the slot's token. Returns false when the slot is empty.
    fn set_status(&mut self, status: TokenStatus) -> Result<bool, StoreError>;

    /// Record a successful use. Returns false when the slot is empty.
    fn mark_used(&mut self, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Displaced tokens, most recent first.
    fn retired(&self) -> Result<Vec<Token>, StoreError>;

    fn set(&mut self, token: Token) -> Result<(), StoreError> {
        self.replace(token, None)
    }
}

/// In-memory slot, also the working copy behind the file store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MemoryTokenStore {
    #[serde(default)]
    slot: Option<Token>,
    #[serde(default)]
    retired: Vec<Token>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the single-slot invariants on data loaded from elsewhere.
    pub(crate) fn normalize(&mut self) {
        if let Some(token) = self.slot.as_mut() {
            token.id = SLOT_ID;
        }
        self.retired.truncate(RETIRED_HISTORY_LIMIT);
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<Token>, StoreError> {
        Ok(self.slot.clone())
    }

    fn replace(&mut self, mut token: Token, retire_as: Option<TokenStatus>) -> Result<(), StoreError> {
        token.id = SLOT_ID;
        if let Some(mut previous) = self.slot.replace(token) {
            if let Some(status) = retire_as {
                previous.status = status;
            }
            self.retired.insert(0, previous);
            self.retired.truncate(RETIRED_HISTORY_LIMIT);
        }
        Ok(())
    }

    fn set_status(&mut self, status: TokenStatus) -> Result<bool, StoreError> {
        match self.slot.as_mut() {
            Some(token) => {
                token.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_used(&mut self, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.slot.as_mut() {
            Some(token) => {
                token.last_used = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn retired(&self) -> Result<Vec<Token>, StoreError> {
        Ok(self.retired.clone())
    }
}

#[cfg(test)]
pub(crate) fn sample_token(access: &str, refresh: Option<&str>) -> Token {
    let now = Utc::now();
    Token {
        id: SLOT_ID,
        client_id: "c1".into(),
        tenant_id: "t1".into(),
        access_token: access.into(),
        refresh_token: refresh.map(String::from),
        token_type: "Bearer".into(),
        expires_at: now + Duration::hours(1),
        scopes: vec!["User.Read".into()],
        flow_type: FlowType::AuthorizationCode,
        user_id: None,
        status: TokenStatus::Active,
        created_at: now,
        last_used: None,
    }
}
