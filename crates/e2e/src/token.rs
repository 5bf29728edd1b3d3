//! Anti-forgery token extraction
//!
//! The ordering service renders its CSRF token as a hidden form input. Some
//! deployments run with CSRF protection disabled, so a missing token is a normal
//! outcome and callers simply omit the field.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::Session;

/// Form field name the ordering service uses for its token
pub const DEFAULT_TOKEN_FIELD: &str = "csrf_token";

/// A token scraped from a server-rendered page
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiForgeryToken(String);

impl AntiForgeryToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AntiForgeryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown: String = self.0.chars().take(6).collect();
        write!(f, "AntiForgeryToken({}…)", shown)
    }
}

/// Pull the value of the first `name="<field>"` input in `html`.
///
/// The value must sit inside the same tag as the anchor. An empty value is
/// treated as absent.
pub fn extract_token(html: &str, field: &str) -> Option<AntiForgeryToken> {
    let pattern = format!(r#"name="{}"[^>]*?value="([^"]*)""#, regex::escape(field));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("Token pattern for field '{}' did not compile: {}", field, e);
            return None;
        }
    };

    re.captures(html)
        .and_then(|caps| caps.get(1))
        .filter(|m| !m.as_str().is_empty())
        .map(|m| AntiForgeryToken(m.as_str().to_string()))
}

/// What a token page fetch turned up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// The page answered and carried a token
    Found { status: u16, token: AntiForgeryToken },

    /// The page answered without a usable token
    Absent { status: u16 },

    /// The page could not be fetched at all
    Unreachable { message: String },
}

impl TokenLookup {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Found { status, .. } | Self::Absent { status } => Some(*status),
            Self::Unreachable { .. } => None,
        }
    }

    pub fn into_token(self) -> Option<AntiForgeryToken> {
        match self {
            Self::Found { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// Fetch `path` with the session and report whether it carried a token
pub async fn lookup_token(session: &Session, path: &str, field: &str) -> TokenLookup {
    match session.fetch_page(path).await {
        Ok((status, body)) => {
            debug!("Token page {} returned {}", path, status);
            match extract_token(&body, field) {
                Some(token) => TokenLookup::Found { status, token },
                None => TokenLookup::Absent { status },
            }
        }
        Err(e) => {
            warn!("Error getting token from {}: {}", path, e);
            TokenLookup::Unreachable {
                message: e.to_string(),
            }
        }
    }
}

/// Fetch `path` with the session and extract the token from it.
///
/// Transport errors and pages without a token both come back as `None`.
pub async fn fetch_token(session: &Session, path: &str, field: &str) -> Option<AntiForgeryToken> {
    lookup_token(session, path, field).await.into_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"<input type="hidden" name="csrf_token" value="abc123">"#, Some("abc123") ; "plain hidden input")]
    #[test_case(r#"<input name="csrf_token" id="t" class="x" value="IjQ2.Zx-9_">"#, Some("IjQ2.Zx-9_") ; "attributes between name and value")]
    #[test_case(r#"<input name="csrf_token" value="first"><input name="csrf_token" value="second">"#, Some("first") ; "first anchor wins")]
    #[test_case(r#"<input name="csrf_token" value="">"#, None ; "empty value is absent")]
    #[test_case(r#"<input name="other" value="nope">"#, None ; "no anchor")]
    #[test_case("", None ; "empty document")]
    #[test_case("<input name=\"csrf_token\"\n value=\"split\">", Some("split") ; "value on the next line of the same tag")]
    #[test_case(r#"<input name="csrf_token" value=""><input name="q" value="x">"#, None ; "empty value does not borrow the next input")]
    #[test_case(r#"<input name="csrf_token"><input name="q" value="x">"#, None ; "anchor without value")]
    fn test_extract(html: &str, expected: Option<&str>) {
        let token = extract_token(html, DEFAULT_TOKEN_FIELD);
        assert_eq!(token.as_ref().map(|t| t.as_str()), expected);
    }

    #[test]
    fn test_extract_custom_field_is_escaped() {
        let html = r#"<input name="_csrf.token" value="dotted"><input name="_csrfXtoken" value="wrong">"#;
        let token = extract_token(html, "_csrf.token").unwrap();
        assert_eq!(token.as_str(), "dotted");

        let html = r#"<input name="_csrfXtoken" value="wrong">"#;
        assert!(extract_token(html, "_csrf.token").is_none());
    }

    #[test]
    fn test_debug_does_not_print_whole_token() {
        let token = AntiForgeryToken("supersecretvalue".to_string());
        let shown = format!("{:?}", token);
        assert!(!shown.contains("supersecretvalue"));
        assert!(shown.contains("supers"));
    }

    #[tokio::test]
    async fn test_lookup_distinguishes_unreachable_page() {
        let target = crate::config::TargetConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_ms: 500,
            ..Default::default()
        };
        let session = Session::open(&target).unwrap();

        let lookup = lookup_token(&session, "/", DEFAULT_TOKEN_FIELD).await;
        assert!(matches!(lookup, TokenLookup::Unreachable { .. }));
        assert_eq!(lookup.status(), None);
        assert!(lookup.into_token().is_none());
    }

    #[test]
    fn test_lookup_status_and_token() {
        let token = extract_token(r#"<input name="csrf_token" value="t1">"#, DEFAULT_TOKEN_FIELD).unwrap();
        let found = TokenLookup::Found { status: 200, token: token.clone() };
        assert_eq!(found.status(), Some(200));
        assert_eq!(found.into_token(), Some(token));

        let absent = TokenLookup::Absent { status: 404 };
        assert_eq!(absent.status(), Some(404));
        assert!(absent.into_token().is_none());
    }
}
