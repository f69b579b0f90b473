//! Caller identity and bearer-token types.
//!
//! Tokens are opaque 128-bit random credentials handed to a caller once the
//! host approves its access request. The hyphenated lowercase rendering is
//! the canonical wire form.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque bearer credential identifying an approved caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(Uuid);

impl ApiToken {
    /// Mint a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a token from its wire form.
    ///
    /// Accepts the canonical hyphenated rendering; returns `None` for
    /// anything that is not a valid 128-bit identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Outcome of a caller asking for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// The caller already holds an approved token.
    Approved(ApiToken),
    /// The request is queued for manual approval by the host.
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_wire_form() {
        let token = ApiToken::generate();
        let rendered = token.to_string();
        assert_eq!(ApiToken::parse(&rendered), Some(token));
    }

    #[test]
    fn wire_form_is_hyphenated_lowercase() {
        let rendered = ApiToken::generate().to_string();
        assert_eq!(rendered.len(), 36);
        assert_eq!(rendered.matches('-').count(), 4);
        assert_eq!(rendered, rendered.to_lowercase());
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(ApiToken::parse("not-a-token"), None);
        assert_eq!(ApiToken::parse(""), None);
    }
}
