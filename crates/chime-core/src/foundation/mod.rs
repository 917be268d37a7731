//! Foundation layer: users and messages.

pub mod message;
pub mod user;

pub use message::{Envelope, Message, MessageKind};
pub use user::{User, value_to_string};
