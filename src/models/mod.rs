//! Domain models for OpenDesk.
//!
//! - [`Script`]: a runnable task file in the scripts directory, identified by a
//!   stable integer id that the manifest keeps across restarts.
//!
//! Display names are derived from filenames by dropping the extension; only
//! files with one of the [`SCRIPT_EXTENSIONS`] are tracked.

mod script;

pub use script::*;
