//! Side-effecting components: filesystem, processes, git and persistence.

pub mod cache;
pub mod chat;
pub mod config;
pub mod file_store;
pub mod git;
pub mod path_guard;
pub mod process;
pub mod prompt;
pub mod search;
pub mod snapshot;
