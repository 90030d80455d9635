//! Background TTL expiration engine.
//!
//! Expiration rules bind a table and a timestamp column to a retention
//! window. A scheduler periodically deletes rows that have aged past their
//! window, in bounded batches, with at most one sweeper active per database.

pub mod config;
pub mod db;
pub mod expiration;
pub mod models;
pub mod observability;
pub mod services;
