//! API-friendly types.
//!
//! These hide stored secrets (login codes are only ever shown to administrators)
//! and accept client input in forgiving forms.

pub mod auth;
pub mod ballot;
pub mod catalog;
pub mod results;
pub mod settings;
pub mod voter;
