//! Harvest target

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static PROFILE_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^https?://(?:www\.)?instagram\.com/([^/?#]+)/?").ok());

/// First path segments that name site sections rather than accounts
const RESERVED_SEGMENTS: &[&str] = &[
    "p", "reel", "reels", "tv", "explore", "stories", "accounts", "direct",
];

/// Profile to harvest, as given by the user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileTarget {
    /// Public username (resolved to an id before paginating)
    Username(String),
    /// Numeric account id
    UserId(String),
}

impl ProfileTarget {
    /// Parse a username, `@handle`, numeric id or profile URL
    /// (`https://www.instagram.com/<name>/...`)
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if input.starts_with("http") {
            let name = PROFILE_URL.as_ref()?.captures(input)?.get(1)?.as_str();
            if RESERVED_SEGMENTS.contains(&name.to_lowercase().as_str()) {
                return None;
            }
            return Some(Self::Username(name.to_string()));
        }

        let input = input.trim_start_matches('@');
        if input.is_empty() {
            None
        } else if input.chars().all(|c| c.is_ascii_digit()) {
            Some(Self::UserId(input.to_string()))
        } else {
            Some(Self::Username(input.to_string()))
        }
    }

    /// Username or id, as displayed
    pub fn name(&self) -> &str {
        match self {
            Self::Username(name) | Self::UserId(name) => name,
        }
    }

    /// Profile page URL (usernames only)
    pub fn url(&self) -> Option<String> {
        match self {
            Self::Username(name) => Some(format!("https://www.instagram.com/{name}/")),
            Self::UserId(_) => None,
        }
    }
}

impl std::fmt::Display for ProfileTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Username(name) => write!(f, "@{name}"),
            Self::UserId(id) => write!(f, "#{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            ProfileTarget::parse("https://www.instagram.com/natgeo/?igsh=aTk0ZjE5"),
            Some(ProfileTarget::Username("natgeo".to_string()))
        );
        assert_eq!(
            ProfileTarget::parse("http://instagram.com/natgeo"),
            Some(ProfileTarget::Username("natgeo".to_string()))
        );
        assert_eq!(ProfileTarget::parse("https://example.com/natgeo/"), None);
    }

    #[test]
    fn test_post_and_section_urls_are_not_profiles() {
        for url in [
            "https://www.instagram.com/p/ABC123/",
            "https://www.instagram.com/reel/XyZ/",
            "https://www.instagram.com/tv/Q1/",
            "https://www.instagram.com/explore/locations/123/",
            "https://www.instagram.com/stories/natgeo/1/",
        ] {
            assert_eq!(ProfileTarget::parse(url), None, "{url}");
        }
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(
            ProfileTarget::parse("@natgeo"),
            Some(ProfileTarget::Username("natgeo".to_string()))
        );
        assert_eq!(
            ProfileTarget::parse("17841400"),
            Some(ProfileTarget::UserId("17841400".to_string()))
        );
        assert_eq!(ProfileTarget::parse("  "), None);
        assert_eq!(ProfileTarget::parse("@"), None);
    }

    #[test]
    fn test_display() {
        let target = ProfileTarget::parse("natgeo").unwrap();
        assert_eq!(target.to_string(), "@natgeo");
        assert_eq!(target.url().as_deref(), Some("https://www.instagram.com/natgeo/"));
    }
}
