//! Core data types shared by the router and the conversation service.

pub mod chat;
pub mod session;
pub mod tools;

pub use chat::*;
pub use session::*;
pub use tools::*;
