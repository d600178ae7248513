// ABOUTME: Library root for ci-runner - exposes the control loop and its collaborators.
// ABOUTME: The main binary is in main.rs.

pub mod build;
pub mod cluster;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod release;
pub mod retry;
pub mod runner;
pub mod source;
pub mod state;
pub mod types;
