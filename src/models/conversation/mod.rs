//! Entities stored in a conversation actor's embedded database.

pub mod message;
pub mod thread;
