//! Data models for geotrail

mod location;
mod post;
mod profile;
mod session;

pub use location::{EmbeddedLocation, LocationRecord, ResolutionSource, is_missing_name};
pub use post::{POST_URL_BASE, Post, PostKind};
pub use profile::ProfileTarget;
pub use session::{Identity, Session, SessionState, SessionToken, TokenKind};
