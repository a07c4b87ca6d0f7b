//! Domain atoms for the feed: models, the collaborator traits the flows are
//! written against, and services that take those collaborators as arguments.

pub mod backend;
pub mod error;
pub mod media;
pub mod posts;
pub mod users;

pub use error::{AuthError, FeedError, StoreError};
