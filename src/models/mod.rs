//! Core data models for the link facade.
//!
//! `object` maps onto the local backend's `objects` table via
//! `sqlx::FromRow`; `access` and `link` are the value types callers see.

pub mod access;
pub mod link;
pub mod object;
