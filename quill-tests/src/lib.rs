//! Cluster scenario and property tests for the Quill consensus engine.
//!
//! [`cluster::TestCluster`] wires several [`quill_raft::RaftContext`]
//! instances together with an in-memory network that delivers actions
//! synchronously and can drop packets per peer, so failure scenarios run
//! deterministically without timers or sockets. [`properties`] holds the
//! safety-property checkers evaluated throughout every scenario.

pub mod cluster;
pub mod properties;

#[cfg(test)]
mod log_tests;
#[cfg(test)]
mod reconcile_tests;
#[cfg(test)]
mod runtime_tests;
