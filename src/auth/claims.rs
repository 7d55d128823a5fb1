//! Account details read from the id token
//!
//! The id token is only inspected for display and for tagging the stored
//! token with an account id; its signature is not verified.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Object id of the user in the tenant
    pub oid: Option<String>,
    /// Tenant id
    pub tid: Option<String>,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a compact JWT.
    pub fn decode(id_token: &str) -> Option<Self> {
        let payload = id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Account id in `{oid}.{tid}` form.
    pub fn home_account_id(&self) -> Option<String> {
        match (&self.oid, &self.tid) {
            (Some(oid), Some(tid)) => Some(format!("{}.{}", oid, tid)),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}
