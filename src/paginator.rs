//! Lazy, bounded walk over a profile's posts
//!
//! [`posts`] builds a [`Paginator`] that yields posts newest first, fetching
//! pages only when the buffered ones run out and stopping after `limit`
//! posts. Every remote call goes through the shared [`Governor`].
//!
//! Failure handling:
//!
//! - `NotFound` / `PrivateProfile` while resolving the profile or fetching a
//!   page end the sequence; the error is kept as the termination reason.
//! - A transient page failure is retried a few times, then ends the sequence
//!   with what was collected so far.
//! - A single bad item (undecodable, or a post whose details cannot be
//!   fetched) is skipped and counted.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use crate::api::{PageItem, PostSource, ProfileHandle};
use crate::config::Config;
use crate::error::FetchError;
use crate::governor::Governor;
use crate::models::{Post, ProfileTarget, Session};

/// Consecutive empty pages tolerated before assuming the listing is stuck
const MAX_EMPTY_PAGES: usize = 3;

/// Listing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginatorSettings {
    /// Posts requested per page
    pub page_size: usize,
    /// Retries for a transient failure
    pub transient_retries: u32,
    /// Skip posts published before this instant
    pub date_from: Option<DateTime<Utc>>,
    /// Skip posts published after this instant
    pub date_to: Option<DateTime<Utc>>,
}

impl PaginatorSettings {
    /// Settings from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.paginator.page_size.max(1),
            transient_retries: config.paginator.transient_retries,
            date_from: config.date_from,
            date_to: config.date_to,
        }
    }
}

impl Default for PaginatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of a finished (or abandoned) walk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaginationReport {
    /// Posts handed to the caller
    pub yielded: usize,
    /// Items dropped because they could not be read
    pub skipped: usize,
    /// Posts outside the date range
    pub filtered: usize,
    /// Pages fetched
    pub pages: usize,
    /// Why the walk ended early, if it did
    pub termination: Option<FetchError>,
}

/// Run `operation` under the governor, retrying transient failures
async fn with_retries<F, Fut, T>(
    governor: &Governor,
    retries: u32,
    label: &str,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match governor.guard(label, &mut operation).await {
            Err(FetchError::Transient(reason)) if attempt < retries => {
                attempt += 1;
                tracing::debug!(operation = label, attempt, %reason, "retrying transient failure");
            }
            other => return other,
        }
    }
}

/// Lazy post sequence for one profile
pub struct Paginator<S> {
    source: S,
    governor: Arc<Governor>,
    session: Session,
    target: ProfileTarget,
    settings: PaginatorSettings,
    limit: usize,
    profile: Option<ProfileHandle>,
    buffer: VecDeque<PageItem>,
    cursor: Option<String>,
    empty_pages: usize,
    done: bool,
    report: PaginationReport,
}

/// Start a walk over `target`'s posts, yielding at most `limit` of them
pub fn posts<S: PostSource>(
    source: S,
    governor: Arc<Governor>,
    session: Session,
    target: ProfileTarget,
    limit: usize,
    settings: PaginatorSettings,
) -> Paginator<S> {
    Paginator {
        source,
        governor,
        session,
        target,
        settings,
        limit,
        profile: None,
        buffer: VecDeque::new(),
        cursor: None,
        empty_pages: 0,
        done: limit == 0,
        report: PaginationReport::default(),
    }
}

impl<S: PostSource> Paginator<S> {
    /// Profile being walked
    pub const fn target(&self) -> &ProfileTarget {
        &self.target
    }

    /// Counters so far
    pub const fn report(&self) -> &PaginationReport {
        &self.report
    }

    /// Why the walk ended early, if it did
    pub const fn termination(&self) -> Option<&FetchError> {
        self.report.termination.as_ref()
    }

    /// Items skipped so far
    pub const fn skipped(&self) -> usize {
        self.report.skipped
    }

    /// Whether the walk is over
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Consume the paginator, returning its report
    pub fn into_report(self) -> PaginationReport {
        self.report
    }

    fn terminate(&mut self, err: FetchError) {
        if err.is_terminal() {
            tracing::info!(profile = %self.target, error = %err, "profile unavailable");
        } else {
            tracing::warn!(profile = %self.target, error = %err, "stopping pagination");
        }
        self.report.termination = Some(err);
        self.done = true;
    }

    fn skip(&mut self, id: Option<&str>, reason: &str) {
        tracing::warn!(profile = %self.target, post = id.unwrap_or("?"), reason, "skipping post");
        self.report.skipped += 1;
    }

    /// Next post, newest first; `None` once the limit is reached, the
    /// listing is exhausted or a terminal error occurred
    pub async fn next(&mut self) -> Option<Post> {
        loop {
            if self.done || self.report.yielded >= self.limit {
                self.done = true;
                return None;
            }

            if self.profile.is_none() {
                let source = &self.source;
                let session = &self.session;
                let target = &self.target;
                let resolved = with_retries(
                    &self.governor,
                    self.settings.transient_retries,
                    "resolve_profile",
                    || source.resolve_profile(target, session),
                )
                .await;
                match resolved {
                    Ok(handle) => {
                        tracing::debug!(profile = %self.target, user_id = %handle.user_id, "profile resolved");
                        self.profile = Some(handle);
                    }
                    Err(err) => {
                        self.terminate(err);
                        return None;
                    }
                }
            }

            if let Some(item) = self.buffer.pop_front() {
                let post = match item {
                    PageItem::Ready(post) => post,
                    PageItem::Malformed { id, reason } => {
                        self.skip(id.as_deref(), &reason);
                        continue;
                    }
                    PageItem::Deferred(reference) => {
                        let source = &self.source;
                        let session = &self.session;
                        let fetched = with_retries(
                            &self.governor,
                            self.settings.transient_retries,
                            "fetch_post",
                            || source.fetch_post(&reference, session),
                        )
                        .await;
                        match fetched {
                            Ok(post) => post,
                            Err(err) => {
                                self.skip(Some(&reference.shortcode), &err.to_string());
                                continue;
                            }
                        }
                    }
                };

                if self.settings.date_to.is_some_and(|to| post.taken_at > to) {
                    self.report.filtered += 1;
                    continue;
                }
                // Listing is newest first, so nothing later can be in range
                if self.settings.date_from.is_some_and(|from| post.taken_at < from) {
                    self.report.filtered += 1;
                    self.done = true;
                    return None;
                }

                self.report.yielded += 1;
                return Some(post);
            }

            if self.report.pages > 0 && self.cursor.is_none() {
                self.done = true;
                return None;
            }

            let fetched = {
                let source = &self.source;
                let session = &self.session;
                let Some(profile) = self.profile.as_ref() else {
                    return None;
                };
                let cursor = self.cursor.as_deref();
                let page_size = self.settings.page_size;
                with_retries(
                    &self.governor,
                    self.settings.transient_retries,
                    "fetch_page",
                    || source.fetch_page(profile, session, cursor, page_size),
                )
                .await
            };

            match fetched {
                Ok(page) => {
                    self.report.pages += 1;
                    tracing::debug!(
                        profile = %self.target,
                        page = self.report.pages,
                        items = page.items.len(),
                        more = page.next_cursor.is_some(),
                        "page fetched"
                    );
                    if page.items.is_empty() {
                        self.empty_pages += 1;
                        if self.empty_pages >= MAX_EMPTY_PAGES {
                            self.done = true;
                            return None;
                        }
                    } else {
                        self.empty_pages = 0;
                    }
                    self.buffer.extend(page.items);
                    self.cursor = page.next_cursor;
                }
                Err(err) => {
                    self.terminate(err);
                    return None;
                }
            }
        }
    }

    /// Drain the remaining posts into a vector
    pub async fn collect(&mut self) -> Vec<Post> {
        let mut out = Vec::new();
        while let Some(post) = self.next().await {
            out.push(post);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, epoch, fast_governor, posts as sample, session};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::Ordering;

    fn walk(source: &FakeSource, limit: usize, page_size: usize) -> Paginator<&FakeSource> {
        posts(
            source,
            Arc::new(Governor::new(fast_governor())),
            session(),
            ProfileTarget::Username("someone".to_string()),
            limit,
            PaginatorSettings {
                page_size,
                transient_retries: 2,
                date_from: None,
                date_to: None,
            },
        )
    }

    #[tokio::test]
    async fn test_yields_min_of_limit_and_available() {
        let source = FakeSource::new(sample(7));

        let got = walk(&source, 5, 3).collect().await;
        assert_eq!(got.len(), 5);
        assert_eq!(got[0].shortcode, "p0");
        // two pages were enough
        assert_eq!(source.page_calls.load(Ordering::SeqCst), 2);

        let got = walk(&source, 50, 3).collect().await;
        assert_eq!(got.len(), 7);
    }

    #[tokio::test]
    async fn test_newest_first() {
        let source = FakeSource::new(sample(4));
        let got = walk(&source, 10, 2).collect().await;
        assert!(got.windows(2).all(|w| w[0].taken_at >= w[1].taken_at));
    }

    #[tokio::test]
    async fn test_zero_limit_fetches_nothing() {
        let source = FakeSource::new(sample(3));
        let mut pager = walk(&source, 0, 3);
        assert!(pager.next().await.is_none());
        assert_eq!(source.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_profile_terminates() {
        let source = FakeSource::new(sample(3)).profile_error(FetchError::NotFound);
        let mut pager = walk(&source, 10, 3);

        assert!(pager.next().await.is_none());
        assert_eq!(pager.termination(), Some(&FetchError::NotFound));
    }

    #[tokio::test]
    async fn test_private_profile_page_terminates() {
        let source = FakeSource::new(sample(3)).fail_pages(vec![FetchError::PrivateProfile]);
        let mut pager = walk(&source, 10, 3);

        assert!(pager.next().await.is_none());
        assert_eq!(pager.termination(), Some(&FetchError::PrivateProfile));
    }

    #[tokio::test]
    async fn test_transient_page_failure_is_retried() {
        let source = FakeSource::new(sample(3))
            .fail_pages(vec![FetchError::transient("reset"), FetchError::transient("reset")]);
        let mut pager = walk(&source, 10, 3);

        assert_eq!(pager.collect().await.len(), 3);
        assert!(pager.termination().is_none());
    }

    #[tokio::test]
    async fn test_throttled_pages_are_absorbed() {
        let source = FakeSource::new(sample(5)).fail_pages(vec![FetchError::throttled(); 2]);
        let governor = Arc::new(Governor::new(fast_governor()));
        let mut pager = posts(
            &source,
            Arc::clone(&governor),
            session(),
            ProfileTarget::Username("someone".to_string()),
            10,
            PaginatorSettings {
                page_size: 2,
                transient_retries: 0,
                date_from: None,
                date_to: None,
            },
        );

        assert_eq!(pager.collect().await.len(), 5);
        assert!(pager.termination().is_none());
        assert_eq!(pager.skipped(), 0);
        assert_eq!(governor.stats().throttled, 2);
    }

    #[tokio::test]
    async fn test_persistent_page_failure_keeps_partial_result() {
        let failures = vec![FetchError::transient("reset"); 3];
        let source = FakeSource::new(sample(6));
        let mut pager = walk(&source, 10, 3);

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(pager.next().await.unwrap());
        }
        // second page keeps failing past the retry budget
        source.page_failures_push(failures);
        got.extend(pager.collect().await);

        assert_eq!(got.len(), 3);
        assert!(matches!(pager.termination(), Some(FetchError::Transient(_))));
    }

    #[tokio::test]
    async fn test_unfetchable_post_is_skipped() {
        let failures = vec![FetchError::transient("reset"); 3];
        let source = FakeSource::new(sample(4)).deferred().fail_post("p1", failures);
        let mut pager = walk(&source, 10, 2);

        let got = pager.collect().await;
        let codes: Vec<_> = got.iter().map(|p| p.shortcode.as_str()).collect();
        assert_eq!(codes, ["p0", "p2", "p3"]);
        assert_eq!(pager.skipped(), 1);
        assert!(pager.termination().is_none());
    }

    #[tokio::test]
    async fn test_date_range_filters_posts() {
        let all = sample(6);
        let source = FakeSource::new(all.clone());
        let mut pager = posts(
            &source,
            Arc::new(Governor::new(fast_governor())),
            session(),
            ProfileTarget::Username("someone".to_string()),
            10,
            PaginatorSettings {
                page_size: 2,
                transient_retries: 0,
                // p0 is the newest (epoch + 6h), p5 the oldest (epoch + 1h)
                date_from: Some(epoch() + ChronoDuration::hours(2)),
                date_to: Some(epoch() + ChronoDuration::hours(4)),
            },
        );

        let got = pager.collect().await;
        let codes: Vec<_> = got.iter().map(|p| p.shortcode.as_str()).collect();
        assert_eq!(codes, ["p2", "p3", "p4"]);
        assert_eq!(pager.report().filtered, 3);
    }
}
