//! Instagram HTTP client
//!
//! Talks to two endpoint families:
//!
//! - the web endpoints (`www.instagram.com`) for login, profile info and
//!   per-post metadata (`/p/<shortcode>/?__a=1`);
//! - the media listing endpoint (`graph.instagram.com/<user>/media`), paged
//!   with `paging.cursors.after`.
//!
//! The `?__a=1` metadata query is undocumented and may change shape; it is
//! only used behind [`LocationLookup`] and [`PostSource::fetch_post`].

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{COOKIE, RETRY_AFTER, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::{AuthError, FetchError};
use crate::models::{
    EmbeddedLocation, Post, PostKind, ProfileTarget, Session, SessionToken, TokenKind,
};

use super::{
    AuthApi, Challenge, LocationLookup, LoginOutcome, Page, PageItem, PostRef, PostSource,
    ProfileHandle,
};

/// Web app id expected by the profile info endpoint
const WEB_APP_ID: &str = "936619743392459";

/// Fields requested from the media listing
const MEDIA_FIELDS: &str = "id,shortcode,caption,media_type,media_url,permalink,timestamp,location";

/// HTTP client for the Instagram endpoints
#[derive(Debug, Clone)]
pub struct InstagramClient {
    client: Client,
    web_base: String,
    graph_base: String,
}

impl InstagramClient {
    /// Create a client from the API settings
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            web_base: config.web_base_url.trim_end_matches('/').to_string(),
            graph_base: config.graph_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build web URL
    fn web_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.web_base, endpoint)
    }

    /// Attach the session token the way its kind requires
    fn authorize(
        request: reqwest::RequestBuilder,
        token: Option<&SessionToken>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(token) if token.kind == TokenKind::SessionCookie => {
                request.header(COOKIE, format!("sessionid={}", token.value))
            }
            _ => request,
        }
    }

    /// Append `access_token` for API tokens
    fn with_access_token(url: String, token: Option<&SessionToken>) -> String {
        match token {
            Some(token) if token.kind == TokenKind::AccessToken => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}access_token={}", urlencoding::encode(&token.value))
            }
            _ => url,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&SessionToken>,
        on_forbidden: FetchError,
    ) -> Result<T, FetchError> {
        let request = Self::authorize(self.client.get(url), token).header("X-IG-App-ID", WEB_APP_ID);
        let response = check_response(request.send().await?, on_forbidden).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("malformed response: {e}")))
    }

    /// Fetch the raw metadata document for a post
    async fn post_metadata(
        &self,
        shortcode: &str,
        session: &Session,
    ) -> Result<MetadataResponse, FetchError> {
        let url = self.web_url(&format!("/p/{}/?__a=1&__d=dis", urlencoding::encode(shortcode)));
        self.get_json(&url, session.token.as_ref(), FetchError::transient("access denied"))
            .await
    }
}

/// Map a non-success status to the fetch taxonomy.
///
/// 429 → `Throttled` (with `Retry-After`), 404 → `NotFound`,
/// 401/403 → `on_forbidden`, anything else → `Transient`.
pub async fn check_response(
    response: Response,
    on_forbidden: FetchError,
) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::Throttled {
            retry_after: parse_retry_after(&response),
        }),
        StatusCode::NOT_FOUND => Err(FetchError::NotFound),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(on_forbidden),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::transient(format!("HTTP {status}: {}", body.trim())))
        }
    }
}

/// Parse the `Retry-After` header as seconds
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Find the `sessionid` cookie in a login response
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let first = cookie.split(';').next()?.trim();
            let value = first.strip_prefix("sessionid=")?;
            (!value.is_empty() && value != "\"\"").then(|| value.to_string())
        })
}

/// Parse the listing's `+0000` style timestamps as well as RFC 3339
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Extract `<code>` from `https://www.instagram.com/p/<code>/`
fn shortcode_from_permalink(permalink: &str) -> Option<String> {
    let mut parts = permalink.trim_end_matches('/').rsplit('/');
    let code = parts.next()?;
    matches!(parts.next(), Some("p" | "reel" | "tv"))
        .then(|| code.to_string())
        .filter(|c| !c.is_empty())
}

impl AuthApi for InstagramClient {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let url = self.web_url("/api/v1/web/accounts/login/ajax/");
        let enc_password = format!("#PWD_INSTAGRAM_BROWSER:0:{}:{}", Utc::now().timestamp(), password);

        let params = [
            ("username", username),
            ("enc_password", enc_password.as_str()),
            ("queryParams", "{}"),
            ("optIntoOneTap", "false"),
        ];

        let response = self
            .client
            .post(&url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-IG-App-ID", WEB_APP_ID)
            .form(&params)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS || response.status().is_server_error() {
            return Err(AuthError::NetworkFailure(format!("login returned {}", response.status())));
        }

        let cookie = session_cookie(&response);
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::NetworkFailure(format!("malformed login response: {e}")))?;

        if body.two_factor_required {
            let identifier = body
                .two_factor_info
                .map(|info| info.two_factor_identifier)
                .ok_or_else(|| AuthError::NetworkFailure("two-factor info missing".to_string()))?;
            return Ok(LoginOutcome::ChallengeRequired(Challenge {
                username: username.to_string(),
                identifier,
            }));
        }

        match (body.authenticated, cookie) {
            (true, Some(cookie)) => Ok(LoginOutcome::Authenticated(SessionToken::cookie(&cookie))),
            (true, None) => Err(AuthError::NetworkFailure("session cookie missing".to_string())),
            (false, _) => Err(AuthError::InvalidCredentials),
        }
    }

    async fn two_factor_login(
        &self,
        challenge: &Challenge,
        code: &str,
    ) -> Result<SessionToken, AuthError> {
        let url = self.web_url("/api/v1/web/accounts/login/ajax/two_factor/");
        let params = [
            ("username", challenge.username.as_str()),
            ("verificationCode", code),
            ("identifier", challenge.identifier.as_str()),
            ("queryParams", "{}"),
        ];

        let response = self
            .client
            .post(&url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-IG-App-ID", WEB_APP_ID)
            .form(&params)
            .send()
            .await?;

        if response.status().is_server_error() || response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AuthError::NetworkFailure(format!(
                "two-factor login returned {}",
                response.status()
            )));
        }

        let cookie = session_cookie(&response);
        let body: LoginResponse = response.json().await.unwrap_or_default();

        match (body.authenticated, cookie) {
            (true, Some(cookie)) => Ok(SessionToken::cookie(&cookie)),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool, AuthError> {
        let request = match token.kind {
            TokenKind::SessionCookie => Self::authorize(
                self.client.get(self.web_url("/api/v1/accounts/current_user/?edit=true")),
                Some(token),
            ),
            TokenKind::AccessToken => self.client.get(Self::with_access_token(
                format!("{}/me?fields=id,username", self.graph_base),
                Some(token),
            )),
        };

        let response = request.header("X-IG-App-ID", WEB_APP_ID).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(true)
        } else if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            Ok(false)
        } else {
            Err(AuthError::NetworkFailure(format!("token check returned {status}")))
        }
    }
}

impl PostSource for InstagramClient {
    async fn resolve_profile(
        &self,
        target: &ProfileTarget,
        session: &Session,
    ) -> Result<ProfileHandle, FetchError> {
        let username = match target {
            ProfileTarget::UserId(id) => {
                return Ok(ProfileHandle {
                    user_id: id.clone(),
                    username: None,
                });
            }
            ProfileTarget::Username(name) => name,
        };

        let url = self.web_url(&format!(
            "/api/v1/users/web_profile_info/?username={}",
            urlencoding::encode(username)
        ));
        let info: ProfileInfoResponse = self
            .get_json(&url, session.token.as_ref(), FetchError::PrivateProfile)
            .await?;

        let user = info.data.and_then(|d| d.user).ok_or(FetchError::NotFound)?;
        if user.is_private && !user.followed_by_viewer {
            return Err(FetchError::PrivateProfile);
        }

        Ok(ProfileHandle {
            user_id: user.id,
            username: Some(user.username.unwrap_or_else(|| username.clone())),
        })
    }

    async fn fetch_page(
        &self,
        profile: &ProfileHandle,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let mut url = format!(
            "{}/{}/media?fields={}&limit={}",
            self.graph_base,
            urlencoding::encode(&profile.user_id),
            MEDIA_FIELDS,
            page_size
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&after={}", urlencoding::encode(cursor)));
        }
        let url = Self::with_access_token(url, session.token.as_ref());

        let media: MediaResponse = self
            .get_json(&url, session.token.as_ref(), FetchError::PrivateProfile)
            .await?;

        let next_cursor = media
            .paging
            .filter(|p| p.next.is_some())
            .and_then(|p| p.cursors)
            .and_then(|c| c.after);

        Ok(Page {
            items: media.data.into_iter().map(MediaItem::into_page_item).collect(),
            next_cursor,
        })
    }

    async fn fetch_post(&self, post: &PostRef, session: &Session) -> Result<Post, FetchError> {
        self.post_metadata(&post.shortcode, session)
            .await?
            .into_post(&post.shortcode)
            .ok_or_else(|| FetchError::transient("post metadata incomplete"))
    }
}

impl LocationLookup for InstagramClient {
    async fn lookup(
        &self,
        shortcode: &str,
        session: &Session,
    ) -> Result<Option<EmbeddedLocation>, FetchError> {
        Ok(self.post_metadata(shortcode, session).await?.location())
    }
}

// ==================== API Types ====================

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    two_factor_required: bool,
    two_factor_info: Option<TwoFactorInfo>,
}

#[derive(Debug, Deserialize)]
struct TwoFactorInfo {
    two_factor_identifier: String,
}

#[derive(Debug, Deserialize)]
struct ProfileInfoResponse {
    data: Option<ProfileInfoData>,
}

#[derive(Debug, Deserialize)]
struct ProfileInfoData {
    user: Option<ProfileInfoUser>,
}

#[derive(Debug, Deserialize)]
struct ProfileInfoUser {
    id: String,
    username: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    followed_by_viewer: bool,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    #[serde(default)]
    data: Vec<MediaItem>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    cursors: Option<Cursors>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: Option<String>,
    shortcode: Option<String>,
    caption: Option<String>,
    media_type: Option<String>,
    media_url: Option<String>,
    permalink: Option<String>,
    timestamp: Option<String>,
    location: Option<ListingLocation>,
}

/// Location object as it appears in listings and metadata documents
#[derive(Debug, Deserialize)]
struct ListingLocation {
    name: Option<String>,
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lng")]
    longitude: Option<f64>,
}

impl From<ListingLocation> for EmbeddedLocation {
    fn from(loc: ListingLocation) -> Self {
        Self {
            name: loc.name,
            latitude: loc.latitude,
            longitude: loc.longitude,
        }
    }
}

impl MediaItem {
    fn into_page_item(self) -> PageItem {
        let Some(id) = self.id else {
            return PageItem::Malformed {
                id: None,
                reason: "missing id".to_string(),
            };
        };

        let Some(shortcode) = self
            .shortcode
            .or_else(|| self.permalink.as_deref().and_then(shortcode_from_permalink))
        else {
            return PageItem::Malformed {
                id: Some(id),
                reason: "missing shortcode".to_string(),
            };
        };

        let Some(taken_at) = self.timestamp.as_deref().and_then(parse_timestamp) else {
            return PageItem::Malformed {
                id: Some(id),
                reason: "missing or invalid timestamp".to_string(),
            };
        };

        let mut post = Post::new(&id, &shortcode, taken_at)
            .with_kind(self.media_type.as_deref().map_or(PostKind::Unknown, PostKind::from_str));
        post.media_url = self.media_url;
        post.caption = self.caption;
        post.location = self.location.map(EmbeddedLocation::from);

        PageItem::Ready(post)
    }
}

/// `?__a=1` document; two shapes are seen in the wild
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    graphql: Option<GraphqlWrapper>,
    #[serde(default)]
    items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct GraphqlWrapper {
    shortcode_media: Option<ShortcodeMedia>,
}

#[derive(Debug, Deserialize)]
struct ShortcodeMedia {
    id: Option<String>,
    #[serde(rename = "__typename")]
    typename: Option<String>,
    display_url: Option<String>,
    taken_at_timestamp: Option<i64>,
    location: Option<ListingLocation>,
    edge_media_to_caption: Option<CaptionEdges>,
}

#[derive(Debug, Deserialize)]
struct CaptionEdges {
    #[serde(default)]
    edges: Vec<CaptionEdge>,
}

#[derive(Debug, Deserialize)]
struct CaptionEdge {
    node: CaptionNode,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    text: String,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    pk: Option<serde_json::Value>,
    taken_at: Option<i64>,
    media_type: Option<u8>,
    location: Option<ListingLocation>,
    caption: Option<MetadataCaption>,
}

#[derive(Debug, Deserialize)]
struct MetadataCaption {
    text: String,
}

impl MetadataResponse {
    fn location(self) -> Option<EmbeddedLocation> {
        if let Some(media) = self.graphql.and_then(|g| g.shortcode_media) {
            return media.location.map(EmbeddedLocation::from);
        }
        self.items
            .into_iter()
            .next()
            .and_then(|item| item.location)
            .map(EmbeddedLocation::from)
    }

    fn into_post(self, shortcode: &str) -> Option<Post> {
        if let Some(media) = self.graphql.and_then(|g| g.shortcode_media) {
            let taken_at = Utc.timestamp_opt(media.taken_at_timestamp?, 0).single()?;
            let mut post = Post::new(&media.id?, shortcode, taken_at).with_kind(
                media.typename.as_deref().map_or(PostKind::Unknown, PostKind::from_str),
            );
            post.media_url = media.display_url;
            post.caption = media
                .edge_media_to_caption
                .and_then(|c| c.edges.into_iter().next())
                .map(|e| e.node.text);
            post.location = media.location.map(EmbeddedLocation::from);
            return Some(post);
        }

        let item = self.items.into_iter().next()?;
        let id = match item.pk? {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let taken_at = Utc.timestamp_opt(item.taken_at?, 0).single()?;
        let mut post = Post::new(&id, shortcode, taken_at).with_kind(
            item.media_type
                .map_or(PostKind::Unknown, |t| PostKind::from_str(&t.to_string())),
        );
        post.caption = item.caption.map(|c| c.text);
        post.location = item.location.map(EmbeddedLocation::from);
        Some(post)
    }
}
