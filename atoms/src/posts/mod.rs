pub mod model;
pub mod service;

pub use model::{CreatePostPayload, Post};
pub use service::*;
