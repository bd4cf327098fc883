//! Library for the scopestore CLI.

pub mod commands;
pub mod output;
pub mod project;

pub use output::OutputFormat;
pub use project::{Project, ScopeHandle};
