//! CLI Commands

pub mod config;
pub mod jobs;
pub mod run;
