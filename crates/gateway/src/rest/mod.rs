//! Typed endpoints, grouped by backend API.

pub mod accounts;
pub mod chat;
