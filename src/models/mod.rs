//! Data models

pub mod feedback;
pub mod prediction;
pub mod reset_token;
pub mod response;
pub mod revoked_token;
pub mod user;

pub use feedback::*;
pub use prediction::*;
pub use reset_token::*;
pub use response::*;
pub use revoked_token::*;
pub use user::*;
