//! Management channel middlewares shipped with the node

pub mod auth;
pub mod bytescount;
pub mod state;

pub use auth::{AuthMiddleware, CredentialsProvider};
pub use bytescount::BytescountMiddleware;
pub use state::StateMiddleware;
