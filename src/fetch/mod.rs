// Fetch tool seam and the shared working area it writes into.

pub mod command;
pub mod traits;
pub mod workdir;
