//! Shared database repository test infrastructure
//!
//! This module provides a test harness for running the same test logic against
//! both SQLite and PostgreSQL implementations. Tests are organized as:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! Each module contains shared test functions that take a
//! [`harness::DbTestContext`], followed by a `sqlite_tests` and a
//! `postgres_tests` module that instantiate them per backend.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

mod rules;
