//! Distributed container orchestration for model demo services: placing,
//! creating, starting, monitoring and tearing down containers across a fleet
//! of remote worker nodes ("controllers"), while keeping the database of
//! record consistent with remote container state.

pub mod config;
pub mod controller;
pub mod models;
pub mod orchestrator;
pub mod resources;
pub mod shared;
