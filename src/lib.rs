//! # geotrail
//!
//! Builds a location timeline from an Instagram profile's posts.
//!
//! ## Overview
//!
//! geotrail logs in (password, two-factor or access token), walks a profile's
//! posts newest first, resolves where each post was taken and writes an
//! ordered, duplicate-free timeline to CSV. Every call to the remote service
//! is paced and backed off by a shared governor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Harvester                            │
//! │   Drives one run per profile, reports progress, cancels     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │    Paginator    │ │    Resolver     │ │    Timeline     │
//! │                 │ │                 │ │                 │
//! │ • Lazy pages    │ │ • Embedded      │ │ • Sorted insert │
//! │ • Post limit    │ │ • Remote lookup │ │ • Dedup by id   │
//! │ • Date range    │ │ • Per-run cache │ │ • Completion    │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                   │
//!          └─────────┬─────────┘
//!                    ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │    Governor     │ │      API        │ │      Auth       │
//! │                 │ │                 │ │                 │
//! │ • Pacing floor  │ │ • Instagram     │ │ • Login / 2FA   │
//! │ • Backoff       │ │ • Browser       │ │ • Session store │
//! │ • Retry ceiling │ │ • Traits        │ │ • Expiry        │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`]: remote collaborators (HTTP client, browser adapter, traits)
//! - [`auth`]: session manager and encrypted session store
//! - [`config`]: configuration management
//! - [`export`]: CSV output
//! - [`governor`]: rate limiting and throttle backoff
//! - [`harvest`]: the per-profile pipeline
//! - [`models`]: data models (Post, LocationRecord, Session)
//! - [`paginator`]: lazy post listing
//! - [`resolver`]: post location resolution
//! - [`timeline`]: timeline assembly
//!
//! ## Example
//!
//! ```no_run
//! use geotrail::api::instagram::InstagramClient;
//! use geotrail::harvest::{HarvestSettings, Harvester};
//! use geotrail::models::{ProfileTarget, Session, SessionToken};
//! use geotrail::Config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let client = InstagramClient::new(&config.api)?;
//! let session = Session::authenticated("me", SessionToken::access("token"));
//!
//! let harvester = Harvester::new(&client, &client, session, HarvestSettings::from_config(&config));
//! let timeline = harvester.run(ProfileTarget::Username("someone".into())).await;
//! println!("{} posts, {} located", timeline.len(), timeline.resolved());
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/geotrail/0.1.0")]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::use_self)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::similar_names)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::future_not_send)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod governor;
pub mod harvest;
pub mod models;
pub mod paginator;
pub mod paths;
pub mod resolver;
pub mod timeline;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use config::Config;
pub use error::{AuthError, FetchError};
pub use harvest::{HarvestEvent, HarvestSettings, Harvester, ProgressSink};
pub use models::{LocationRecord, Post, ProfileTarget, ResolutionSource, Session};
pub use timeline::{Completion, Timeline, TimelineEntry};

/// ASCII logo for the application
pub const LOGO: &str = r"
                   __             _ __
  ___ ____ ___    / /________ _  (_) /
 / _ `/ -_) _ \  / __/ __/ _ `/ / / /
 \_, /\__/\___/  \__/_/  \_,_/ /_/_/
/___/
";

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
