// src/services/mod.rs
//
// Outbound service integrations shared across domain modules

pub mod email;

// Re-export commonly used types for convenience
pub use email::{EmailSender, LogEmailSender, SesEmailSender};
