//! CLI command implementations

pub mod completions;
pub mod config;
pub mod io;
pub mod items;
pub mod migrate;
pub mod reindex;
pub mod status;
