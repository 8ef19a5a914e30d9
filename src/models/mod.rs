//! Data models for the school pickup application.
//!
//! These models match the frontend TypeScript interfaces (camelCase on the wire).

mod pickup_request;
mod revision;
mod school;
mod session;
mod user;

pub use pickup_request::*;
pub use revision::*;
pub use school::*;
pub use session::*;
pub use user::*;
