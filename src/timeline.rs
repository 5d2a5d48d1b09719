//! Timeline assembly
//!
//! Resolved posts are inserted into a [`TimelineAssembler`], which keeps them
//! ordered by publication time (oldest first, ties broken by post id) and
//! drops repeated post ids. [`TimelineAssembler::finalize`] turns it into a
//! read-only [`Timeline`] tagged with why the run ended.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::error::FetchError;
use crate::models::{LocationRecord, Post, ProfileTarget};

/// A post paired with its resolved location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub post: Post,
    pub location: LocationRecord,
}

impl TimelineEntry {
    /// Ordering key
    pub fn key(&self) -> (DateTime<Utc>, &str) {
        (self.post.taken_at, self.post.id.as_str())
    }
}

/// Why a harvest stopped
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Completion {
    /// The profile had no more posts (or none left in the date range)
    #[default]
    Exhausted,
    /// The configured post limit was reached
    LimitReached,
    /// The run was cancelled; entries processed before that are kept
    Cancelled,
    /// A profile-level error stopped the run
    Aborted(FetchError),
}

impl Completion {
    /// Whether the run covered everything it set out to
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Exhausted | Self::LimitReached)
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::LimitReached => write!(f, "limit reached"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Aborted(err) => write!(f, "aborted: {err}"),
        }
    }
}

/// Ordered, duplicate-free harvest result for one profile
#[derive(Debug, Clone)]
pub struct Timeline {
    profile: ProfileTarget,
    run_id: Uuid,
    completed_at: DateTime<Utc>,
    completion: Completion,
    skipped: usize,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub const fn profile(&self) -> &ProfileTarget {
        &self.profile
    }

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub const fn completion(&self) -> &Completion {
        &self.completion
    }

    /// Posts dropped because they could not be read
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Entries, oldest first
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with a known location
    pub fn resolved(&self) -> usize {
        self.entries.iter().filter(|e| e.location.is_resolved()).count()
    }

    /// Entries without a location
    pub fn unresolved(&self) -> usize {
        self.len() - self.resolved()
    }

    /// Oldest entry
    pub fn first(&self) -> Option<&TimelineEntry> {
        self.entries.first()
    }

    /// Newest entry
    pub fn last(&self) -> Option<&TimelineEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimelineEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a TimelineEntry;
    type IntoIter = std::slice::Iter<'a, TimelineEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Collects resolved posts into a sorted timeline
#[derive(Debug)]
pub struct TimelineAssembler {
    profile: ProfileTarget,
    run_id: Uuid,
    entries: BTreeMap<(DateTime<Utc>, String), TimelineEntry>,
    ids: HashSet<String>,
    skipped: usize,
}

impl TimelineAssembler {
    /// Start assembling a timeline for `profile`
    pub fn new(profile: ProfileTarget) -> Self {
        Self {
            profile,
            run_id: Uuid::new_v4(),
            entries: BTreeMap::new(),
            ids: HashSet::new(),
            skipped: 0,
        }
    }

    /// Identifier of this run
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Add a post; `false` if its id is already present
    pub fn insert(&mut self, post: Post, location: LocationRecord) -> bool {
        if !self.ids.insert(post.id.clone()) {
            tracing::debug!(post = %post.id, "duplicate post ignored");
            return false;
        }
        let key = (post.taken_at, post.id.clone());
        self.entries.insert(key, TimelineEntry { post, location });
        true
    }

    /// Insert every pair; returns how many were new
    pub fn assemble<I>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (Post, LocationRecord)>,
    {
        pairs
            .into_iter()
            .map(|(post, location)| self.insert(post, location))
            .filter(|added| *added)
            .count()
    }

    /// Record posts dropped upstream
    pub const fn add_skipped(&mut self, count: usize) {
        self.skipped += count;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a post id has been inserted
    pub fn contains(&self, post_id: &str) -> bool {
        self.ids.contains(post_id)
    }

    /// Freeze into a read-only timeline
    pub fn finalize(self, completion: Completion) -> Timeline {
        Timeline {
            profile: self.profile,
            run_id: self.run_id,
            completed_at: Utc::now(),
            completion,
            skipped: self.skipped,
            entries: self.entries.into_values().collect(),
        }
    }
}
