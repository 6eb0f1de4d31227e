//! Orchestration: one encode session from image folder to finished MP4.

pub mod orchestrator;
pub mod worker;
