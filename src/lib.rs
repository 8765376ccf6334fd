//! Run coordinator for a distributed load-generation platform.
//!
//! This crate is the controller half: it tracks the live population of
//! remote agents and their worker processes, folds periodic statistics
//! reports into aggregated per-test and total sample data plus persisted
//! report files, runs health heuristics that can signal an autonomous
//! stop, and drives safe distribution of test artifacts to agents. The
//! wire transport, worker lifecycle, and expression evaluation engine are
//! injected through ports; see [`coordinator::CoordinatorDeps`].
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod model;
pub mod protocol;
pub mod shutdown;
pub mod statistics;
