pub mod analyze;
pub mod assign;
pub mod backup;
pub mod config;
pub mod consumer;
pub mod filesystem;
pub mod frontmatter;
pub mod layout;
pub mod migrate;
pub mod poem;
pub mod registry;
pub mod runtime;
pub mod stats;
pub mod validate;
