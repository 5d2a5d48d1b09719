//! Harvest pipeline
//!
//! One [`Harvester::run`] walks a profile's posts, resolves their locations
//! in batches and assembles the [`Timeline`]. Progress is reported through a
//! [`ProgressSink`]; a [`CancellationToken`] stops the run early, giving the
//! operation in flight a grace period before it is dropped.
//!
//! ```text
//! Paginator ──posts──▶ batch ──▶ LocationResolver ──▶ TimelineAssembler
//!     │                              │
//!     └──────── shared Governor ─────┘
//! ```

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{LocationLookup, PostSource};
use crate::config::Config;
use crate::governor::{Governor, GovernorSettings};
use crate::models::{LocationRecord, Post, ProfileTarget, Session};
use crate::paginator::{self, Paginator, PaginatorSettings};
use crate::resolver::LocationResolver;
use crate::timeline::{Completion, Timeline, TimelineAssembler};

/// Progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestEvent {
    /// A profile run began
    Started {
        profile: ProfileTarget,
        run_id: Uuid,
        limit: usize,
    },
    /// A post was added to the timeline
    EntryAdded {
        profile: ProfileTarget,
        post_id: String,
        taken_at: DateTime<Utc>,
        location: LocationRecord,
        /// Entries so far
        count: usize,
    },
    /// A post could not be read and was left out
    PostSkipped {
        profile: ProfileTarget,
        /// Skips so far
        skipped: usize,
    },
    /// A profile run ended
    Finished {
        profile: ProfileTarget,
        completion: Completion,
        entries: usize,
        skipped: usize,
    },
}

/// Receives [`HarvestEvent`]s
pub trait ProgressSink {
    fn emit(&self, event: HarvestEvent);
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn emit(&self, event: HarvestEvent) {
        (**self).emit(event);
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn emit(&self, event: HarvestEvent) {
        (**self).emit(event);
    }
}

/// Discards events
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: HarvestEvent) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Started { profile, run_id, limit } => {
                tracing::info!(%profile, %run_id, limit, "harvest started");
            }
            HarvestEvent::EntryAdded { profile, post_id, location, count, .. } => {
                tracing::debug!(%profile, post = %post_id, source = %location.source, count, "entry added");
            }
            HarvestEvent::PostSkipped { profile, skipped } => {
                tracing::debug!(%profile, skipped, "post skipped");
            }
            HarvestEvent::Finished { profile, completion, entries, skipped } => {
                tracing::info!(%profile, %completion, entries, skipped, "harvest finished");
            }
        }
    }
}

/// Per-run parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSettings {
    /// Posts to collect per profile
    pub limit: usize,
    /// Concurrent location lookups, also the batch size
    pub workers: usize,
    /// Time an in-flight operation may take after cancellation
    pub cancel_grace: Duration,
    pub governor: GovernorSettings,
    pub paginator: PaginatorSettings,
}

impl HarvestSettings {
    /// Settings from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: config.max_posts,
            workers: config.resolver.workers.max(1),
            cancel_grace: Duration::from_millis(config.harvest.cancel_grace_ms),
            governor: GovernorSettings::from_config(config),
            paginator: PaginatorSettings::from_config(config),
        }
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Runs harvests for one authenticated session
pub struct Harvester<S, L, P = NullSink> {
    source: S,
    lookup: L,
    session: Session,
    sink: P,
    settings: HarvestSettings,
    cancel: CancellationToken,
}

impl<S, L> Harvester<S, L, NullSink>
where
    S: PostSource,
    L: LocationLookup,
{
    /// Create a harvester without progress reporting
    pub fn new(source: S, lookup: L, session: Session, settings: HarvestSettings) -> Self {
        Self {
            source,
            lookup,
            session,
            sink: NullSink,
            settings,
            cancel: CancellationToken::new(),
        }
    }
}

impl<S, L, P> Harvester<S, L, P>
where
    S: PostSource,
    L: LocationLookup,
    P: ProgressSink,
{
    /// Report progress to `sink`
    pub fn with_sink<Q: ProgressSink>(self, sink: Q) -> Harvester<S, L, Q> {
        Harvester {
            source: self.source,
            lookup: self.lookup,
            session: self.session,
            sink,
            settings: self.settings,
            cancel: self.cancel,
        }
    }

    /// Stop when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this harvester's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub const fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Await `operation` unless cancelled; once cancelled it gets the grace
    /// period to finish. `None` when it was dropped.
    async fn within_grace<F: Future>(&self, operation: F) -> Option<F::Output> {
        tokio::pin!(operation);
        tokio::select! {
            biased;
            out = &mut operation => return Some(out),
            () = self.cancel.cancelled() => {}
        }

        match tokio::time::timeout(self.settings.cancel_grace, operation).await {
            Ok(out) => Some(out),
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.settings.cancel_grace.as_millis() as u64,
                    "dropping in-flight operation after cancellation"
                );
                None
            }
        }
    }

    /// Pull up to `workers` posts. The flag is set when cancellation
    /// interrupted the pull.
    async fn pull_batch<T: PostSource>(
        &self,
        pager: &mut Paginator<T>,
        skipped_seen: &mut usize,
    ) -> (Vec<Post>, bool) {
        let mut batch = Vec::with_capacity(self.settings.workers);

        while batch.len() < self.settings.workers && !pager.is_done() {
            if self.cancel.is_cancelled() {
                return (batch, true);
            }

            let pulled = self.within_grace(pager.next()).await;

            while *skipped_seen < pager.skipped() {
                *skipped_seen += 1;
                self.sink.emit(HarvestEvent::PostSkipped {
                    profile: pager.target().clone(),
                    skipped: *skipped_seen,
                });
            }

            match pulled {
                Some(Some(post)) => batch.push(post),
                Some(None) => break,
                None => return (batch, true),
            }
        }

        let interrupted = self.cancel.is_cancelled();
        (batch, interrupted)
    }

    /// Harvest one profile. Never fails: profile-level errors and
    /// cancellation end the run with a partial timeline.
    pub async fn run(&self, target: ProfileTarget) -> Timeline {
        let governor = Arc::new(Governor::new(self.settings.governor.clone()));
        let mut pager = paginator::posts(
            &self.source,
            Arc::clone(&governor),
            self.session.clone(),
            target.clone(),
            self.settings.limit,
            self.settings.paginator.clone(),
        );
        let resolver = LocationResolver::new(&self.lookup, Arc::clone(&governor), self.session.clone());
        let mut assembler = TimelineAssembler::new(target.clone());

        self.sink.emit(HarvestEvent::Started {
            profile: target.clone(),
            run_id: assembler.run_id(),
            limit: self.settings.limit,
        });

        let mut skipped_seen = 0;
        let mut cancelled = false;

        'run: loop {
            let (batch, interrupted) = self.pull_batch(&mut pager, &mut skipped_seen).await;
            if batch.is_empty() {
                cancelled = interrupted;
                break;
            }

            let Some(resolved) = self
                .within_grace(resolver.resolve_all(&batch, self.settings.workers))
                .await
            else {
                cancelled = true;
                break;
            };
            let mut locations: HashMap<String, LocationRecord> = resolved.into_iter().collect();

            // Work already in flight when cancellation arrived is kept whole
            let flushing = interrupted || self.cancel.is_cancelled();

            for post in batch {
                if !flushing && self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'run;
                }
                let location = locations
                    .remove(&post.id)
                    .unwrap_or_else(LocationRecord::unresolved);
                let post_id = post.id.clone();
                let taken_at = post.taken_at;
                if assembler.insert(post, location.clone()) {
                    self.sink.emit(HarvestEvent::EntryAdded {
                        profile: target.clone(),
                        post_id,
                        taken_at,
                        location,
                        count: assembler.len(),
                    });
                }
            }

            if flushing {
                cancelled = true;
                break;
            }
            if pager.is_done() {
                break;
            }
        }

        let report = pager.into_report();
        assembler.add_skipped(report.skipped);

        let completion = if cancelled {
            Completion::Cancelled
        } else if let Some(err) = report.termination {
            Completion::Aborted(err)
        } else if report.yielded >= self.settings.limit {
            Completion::LimitReached
        } else {
            Completion::Exhausted
        };

        let stats = governor.stats();
        tracing::debug!(
            profile = %target,
            calls = stats.calls,
            throttled = stats.throttled,
            backoff_ms = stats.backoff.as_millis() as u64,
            lookups = resolver.remote_calls(),
            "governor summary"
        );

        let timeline = assembler.finalize(completion);
        self.sink.emit(HarvestEvent::Finished {
            profile: target,
            completion: timeline.completion().clone(),
            entries: timeline.len(),
            skipped: timeline.skipped(),
        });
        timeline
    }

    /// Harvest several profiles concurrently, each with its own governor,
    /// resolver and assembler. Results are in input order.
    pub async fn harvest_profiles(&self, targets: Vec<ProfileTarget>) -> Vec<Timeline> {
        join_all(targets.into_iter().map(|target| self.run(target))).await
    }
}
