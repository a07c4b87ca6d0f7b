pub mod model;

pub use model::{Credentials, SignedIn, Session};
