//! Domain records shared across the workspace.

pub mod command;
pub mod directory;
pub mod telemetry;
