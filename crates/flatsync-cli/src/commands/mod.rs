pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod expense;
pub mod household;
pub mod shopping;
pub mod sync;
pub mod todo;
