// Persistence backends for delivered-artifact cache entries.

pub mod json_file;
pub mod memory;
pub mod traits;
