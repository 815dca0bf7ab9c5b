use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Body of the token endpoint response. Docker Hub fills both `token` and
/// `access_token`; other implementations of the protocol may send only one.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Token {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Token {
    /// The value to present as `Authorization: Bearer <value>`.
    pub fn bearer(&self) -> &str {
        if self.token.is_empty() {
            &self.access_token
        } else {
            &self.token
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer().is_empty()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match (self.issued_at, self.expires_in) {
            (Some(issued), Some(secs)) => {
                Duration::try_seconds(secs).and_then(|d| issued.checked_add_signed(d))
            }
            _ => None,
        }
    }
}
