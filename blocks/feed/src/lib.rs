//! Feed block: the session gate, post composer and live feed view, written
//! against the collaborator traits in `feedline-atoms`.

pub mod composer;
pub mod drop_zone;
pub mod feed;
pub mod router;

pub use composer::{PostComposer, PostSubmissionFlow, Submitted};
pub use drop_zone::{DragEvent, DragState, DropZone};
pub use feed::{FeedState, FeedStatus, FeedView, RetryPolicy};
pub use router::{Resolution, Route, RouteTree, SessionRouter};
