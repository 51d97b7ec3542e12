//! Protocol implementations.

pub mod boot;
pub mod chunk;
pub mod shell;

// Re-export common types
pub use boot::{BootOutcome, BootWatcher};
pub use shell::{DirEntry, format_listing, is_prompt, parse_listing};
