//! Post model

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::EmbeddedLocation;

static HASHTAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"#(\w+)").ok());

/// Base URL for public post permalinks
pub const POST_URL_BASE: &str = "https://www.instagram.com/p/";

/// A harvested post. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Media ID, unique per profile
    pub id: String,
    /// Public identifier used in permalinks and metadata lookups
    pub shortcode: String,
    /// When the post was published (UTC)
    pub taken_at: DateTime<Utc>,
    /// Media type
    pub kind: PostKind,
    /// Direct media URL, when the listing exposes one
    pub media_url: Option<String>,
    /// Caption text
    pub caption: Option<String>,
    /// Location data embedded in the listing, possibly incomplete
    pub location: Option<EmbeddedLocation>,
}

/// Media type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    /// Single photo
    Image,
    /// Video or reel
    Video,
    /// Multi-item post
    Carousel,
    /// Anything the service reports that we do not recognise
    #[default]
    Unknown,
}

impl PostKind {
    /// Get the kind as a lowercase string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Carousel => "carousel",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the names used across the different listings
    /// (`IMAGE`, `GraphImage`, `1`, ...)
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "image" | "graphimage" | "1" => Self::Image,
            "video" | "graphvideo" | "reel" | "2" => Self::Video,
            "carousel" | "carousel_album" | "graphsidecar" | "sidecar" | "8" => Self::Carousel,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Post {
    /// Create a post with no media, caption or location
    pub fn new(id: &str, shortcode: &str, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            shortcode: shortcode.to_string(),
            taken_at,
            kind: PostKind::Unknown,
            media_url: None,
            caption: None,
            location: None,
        }
    }

    /// Attach an embedded location
    pub fn with_location(mut self, location: EmbeddedLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the media kind
    pub fn with_kind(mut self, kind: PostKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the caption
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Public permalink
    pub fn url(&self) -> String {
        format!("{POST_URL_BASE}{}/", self.shortcode)
    }

    /// Hashtags found in the caption, without the leading `#`
    pub fn hashtags(&self) -> Vec<String> {
        let (Some(caption), Some(re)) = (self.caption.as_deref(), HASHTAG.as_ref()) else {
            return Vec::new();
        };

        re.captures_iter(caption).map(|c| c[1].to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Post {
        Post::new("1", "CxYz123", Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_url() {
        assert_eq!(sample().url(), "https://www.instagram.com/p/CxYz123/");
    }

    #[test]
    fn test_hashtags() {
        let post = sample().with_caption("Sunset at the pier #travel #goldenhour\n#sea");
        assert_eq!(post.hashtags(), vec!["travel", "goldenhour", "sea"]);
        assert!(sample().hashtags().is_empty());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(PostKind::from_str("CAROUSEL_ALBUM"), PostKind::Carousel);
        assert_eq!(PostKind::from_str("GraphImage"), PostKind::Image);
        assert_eq!(PostKind::from_str("2"), PostKind::Video);
        assert_eq!(PostKind::from_str("story"), PostKind::Unknown);
    }
}
