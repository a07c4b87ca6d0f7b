pub mod model;
pub mod service;

pub use model::PendingImage;
pub use service::*;
