//! Browser-automation post source
//!
//! [`BrowserSource`] adapts any driver implementing [`Browser`] to the
//! [`PostSource`] contract. Every wait is an observed condition bounded by a
//! timeout; nothing sleeps for a fixed time after an action.
//!
//! Pages are stateless: each `fetch_page` call re-opens the profile and
//! scrolls until enough post links are present, so a failed page can simply
//! be requested again. The cursor is the number of links already handed out.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::error::FetchError;
use crate::models::{EmbeddedLocation, POST_URL_BASE, Post, ProfileTarget, Session};

use super::{Page, PageItem, PostRef, PostSource, ProfileHandle};

/// Links to individual posts on a profile grid
pub const POST_LINK_SELECTOR: &str = "a[href*='/p/']";
/// Location link inside an opened post
pub const LOCATION_SELECTOR: &str = "a[href*='/explore/locations/']";
/// Publication time inside an opened post
pub const TIME_SELECTOR: &str = "time[datetime]";
/// Banner shown on private profiles
pub const PRIVATE_SELECTOR: &str = "h2._aa_u";

/// Failures reported by a browser driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    /// A wait ran out before the condition held
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The element is not on the page
    #[error("no such element: {0}")]
    NoSuchElement(String),
    /// Anything else from the driver
    #[error("driver error: {0}")]
    Driver(String),
}

/// Minimal browser automation surface
#[allow(async_fn_in_trait)]
pub trait Browser {
    /// Element handle
    type Element;

    /// Load a URL
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait until at least one element matches, or time out
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// All elements currently matching
    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Element>, BrowserError>;

    /// Click an element
    async fn click(&self, element: &Self::Element) -> Result<(), BrowserError>;

    /// Scroll the page to the bottom
    async fn scroll_to_bottom(&self) -> Result<(), BrowserError>;

    /// Attribute value of an element
    async fn attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;

    /// Visible text of an element
    async fn text(&self, element: &Self::Element) -> Result<String, BrowserError>;
}

/// Waits and limits for the browser source
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Longest wait for any single condition
    pub wait_timeout: Duration,
    /// How often conditions are re-checked
    pub poll_interval: Duration,
    /// Scrolls without new links before the grid is considered exhausted
    pub max_idle_scrolls: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            max_idle_scrolls: 3,
        }
    }
}

/// [`PostSource`] backed by a browser driver
pub struct BrowserSource<B> {
    browser: B,
    settings: BrowserSettings,
}

fn transient(err: BrowserError) -> FetchError {
    FetchError::transient(err)
}

/// Profile page failures: a missing grid means the profile is not there
fn profile_error(err: BrowserError) -> FetchError {
    match err {
        BrowserError::Timeout(_) | BrowserError::NoSuchElement(_) => FetchError::NotFound,
        BrowserError::Driver(_) => FetchError::transient(err),
    }
}

fn shortcode_from_href(href: &str) -> Option<String> {
    let rest = &href[href.find("/p/")? + 3..];
    let code = rest.split(['/', '?']).next()?;
    (!code.is_empty()).then(|| code.to_string())
}

impl<B: Browser> BrowserSource<B> {
    /// Wrap a driver
    pub const fn new(browser: B, settings: BrowserSettings) -> Self {
        Self { browser, settings }
    }

    /// Post links currently on the grid, in page order, deduplicated
    async fn post_links(&self) -> Result<Vec<PostRef>, BrowserError> {
        let mut refs: Vec<PostRef> = Vec::new();
        for link in self.browser.find_all(POST_LINK_SELECTOR).await? {
            let Some(href) = self.browser.attribute(&link, "href").await? else {
                continue;
            };
            let Some(shortcode) = shortcode_from_href(&href) else {
                continue;
            };
            if refs.iter().any(|r| r.shortcode == shortcode) {
                continue;
            }
            refs.push(PostRef {
                url: format!("{POST_URL_BASE}{shortcode}/"),
                shortcode,
            });
        }
        Ok(refs)
    }

    /// Scroll until more than `wanted` links are loaded or the grid stops growing
    async fn load_links(&self, wanted: usize) -> Result<Vec<PostRef>, BrowserError> {
        let mut links = self.post_links().await?;
        let mut idle = 0;

        while links.len() < wanted && idle < self.settings.max_idle_scrolls {
            let before = links.len();
            self.browser.scroll_to_bottom().await?;

            let deadline = Instant::now() + self.settings.wait_timeout;
            loop {
                links = self.post_links().await?;
                if links.len() > before || Instant::now() >= deadline {
                    break;
                }
                sleep(self.settings.poll_interval).await;
            }

            if links.len() > before {
                idle = 0;
            } else {
                idle += 1;
            }
        }

        Ok(links)
    }
}

impl<B: Browser> PostSource for BrowserSource<B> {
    async fn resolve_profile(
        &self,
        target: &ProfileTarget,
        _session: &Session,
    ) -> Result<ProfileHandle, FetchError> {
        let Some(url) = target.url() else {
            // The grid is only reachable by username
            return Err(FetchError::NotFound);
        };

        self.browser.navigate(&url).await.map_err(transient)?;

        let private = self
            .browser
            .find_all(PRIVATE_SELECTOR)
            .await
            .map_err(transient)?;
        if !private.is_empty() {
            return Err(FetchError::PrivateProfile);
        }

        self.browser
            .wait_for(POST_LINK_SELECTOR, self.settings.wait_timeout)
            .await
            .map_err(profile_error)?;

        Ok(ProfileHandle {
            user_id: target.name().to_string(),
            username: Some(target.name().to_string()),
        })
    }

    async fn fetch_page(
        &self,
        profile: &ProfileHandle,
        _session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let name = profile.username.as_deref().unwrap_or(&profile.user_id);

        self.browser
            .navigate(&format!("https://www.instagram.com/{name}/"))
            .await
            .map_err(transient)?;
        self.browser
            .wait_for(POST_LINK_SELECTOR, self.settings.wait_timeout)
            .await
            .map_err(profile_error)?;

        // One extra link tells us whether another page exists
        let links = self
            .load_links(offset + page_size + 1)
            .await
            .map_err(transient)?;

        let items: Vec<PageItem> = links
            .iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .map(PageItem::Deferred)
            .collect();
        let end = offset + items.len();
        let next_cursor = (links.len() > end).then(|| end.to_string());

        Ok(Page { items, next_cursor })
    }

    async fn fetch_post(&self, post: &PostRef, _session: &Session) -> Result<Post, FetchError> {
        self.browser.navigate(&post.url).await.map_err(transient)?;
        self.browser
            .wait_for(TIME_SELECTOR, self.settings.wait_timeout)
            .await
            .map_err(transient)?;

        let times = self.browser.find_all(TIME_SELECTOR).await.map_err(transient)?;
        let time = times
            .first()
            .ok_or_else(|| FetchError::transient("post has no timestamp"))?;
        let raw = self
            .browser
            .attribute(time, "datetime")
            .await
            .map_err(transient)?
            .ok_or_else(|| FetchError::transient("post has no timestamp"))?;
        let taken_at = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| FetchError::transient(format!("bad timestamp {raw:?}: {e}")))?
            .with_timezone(&Utc);

        let mut result = Post::new(&post.shortcode, &post.shortcode, taken_at);

        let locations = self
            .browser
            .find_all(LOCATION_SELECTOR)
            .await
            .map_err(transient)?;
        if let Some(link) = locations.first() {
            let name = self.browser.text(link).await.map_err(transient)?;
            result.location = Some(EmbeddedLocation::named(name.trim()));
        }

        Ok(result)
    }
}
