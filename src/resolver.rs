//! Post location resolution
//!
//! A post's embedded location is used when it is complete. Otherwise the
//! resolver asks the remote [`LocationLookup`] once, under the shared
//! governor, and caches the outcome per post id, including failures, so a
//! post is never looked up twice in one run. Concurrent resolves of the same
//! post share the first caller's lookup.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell};

use crate::api::LocationLookup;
use crate::governor::Governor;
use crate::models::{EmbeddedLocation, LocationRecord, Post, Session, is_missing_name};

/// Resolves post locations, with a per-run cache
pub struct LocationResolver<L> {
    lookup: L,
    governor: Arc<Governor>,
    session: Session,
    cache: Mutex<HashMap<String, Arc<OnceCell<LocationRecord>>>>,
    remote_calls: AtomicUsize,
}

impl<L: LocationLookup> LocationResolver<L> {
    /// Create a resolver sharing `governor` with the rest of the pipeline
    pub fn new(lookup: L, governor: Arc<Governor>, session: Session) -> Self {
        Self {
            lookup,
            governor,
            session,
            cache: Mutex::new(HashMap::new()),
            remote_calls: AtomicUsize::new(0),
        }
    }

    /// Remote lookups issued so far
    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::Relaxed)
    }

    /// Cached outcome for a post id
    pub async fn cached(&self, post_id: &str) -> Option<LocationRecord> {
        let cell = self.cache.lock().await.get(post_id).cloned()?;
        cell.get().cloned()
    }

    /// Resolve one post's location. Never fails; failures become
    /// [`LocationRecord::unresolved`].
    pub async fn resolve(&self, post: &Post) -> LocationRecord {
        if let Some(embedded) = post.location.as_ref().filter(|l| l.is_complete())
            && let (Some(name), Some(lat), Some(lng)) =
                (embedded.name.as_deref(), embedded.latitude, embedded.longitude)
        {
            return LocationRecord::embedded(name, lat, lng);
        }

        let cell = Arc::clone(self.cache.lock().await.entry(post.id.clone()).or_default());
        cell.get_or_init(|| self.lookup_remote(post)).await.clone()
    }

    async fn lookup_remote(&self, post: &Post) -> LocationRecord {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        let lookup = &self.lookup;
        let session = &self.session;
        let shortcode = post.shortcode.as_str();

        match self
            .governor
            .guard("location_lookup", || lookup.lookup(shortcode, session))
            .await
        {
            Ok(Some(EmbeddedLocation {
                name: Some(name),
                latitude,
                longitude,
            })) if !is_missing_name(Some(&name)) => LocationRecord::remote(&name, latitude, longitude),
            Ok(_) => {
                tracing::debug!(post = %post.id, "no location on post");
                LocationRecord::unresolved()
            }
            Err(err) => {
                tracing::warn!(post = %post.id, error = %err, "location lookup failed");
                LocationRecord::unresolved()
            }
        }
    }

    /// Resolve many posts with at most `workers` lookups in flight.
    ///
    /// Returns `(post id, record)` pairs in input order, one per distinct id.
    pub async fn resolve_all(&self, posts: &[Post], workers: usize) -> Vec<(String, LocationRecord)> {
        let mut seen = HashSet::new();
        let unique: Vec<&Post> = posts.iter().filter(|p| seen.insert(p.id.as_str())).collect();

        stream::iter(unique)
            .map(|post| async move { (post.id.clone(), self.resolve(post).await) })
            .buffered(workers.max(1))
            .collect()
            .await
    }
}
