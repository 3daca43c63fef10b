// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence layer for chime.
//!
//! The scheduling engine consumes the [`JobStore`], [`ExecutionStore`] and
//! [`HistoryStore`] traits; this crate provides the Postgres implementations
//! plus in-memory implementations (in [`testing`]) used by engine tests and
//! single-process setups.

pub mod error;
pub mod executions;
pub mod history;
pub mod jobs;
pub mod pool;
pub mod testing;

pub use error::{DbError, Result};
pub use executions::{ExecutionStore, PgExecutionStore};
pub use history::{HistoryStore, PgHistoryStore};
pub use jobs::{JobStore, PgJobStore};
pub use pool::{create_pool, run_migrations};
