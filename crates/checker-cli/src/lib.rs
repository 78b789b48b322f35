//! checker-cli — runs one probe per process.
//!
//! ```text
//! Idle ─► ParsingOptions ─► Checking ─► Succeeded   (exit 0)
//!              │                │
//!              └────────────────┴─────► Failed      (usage + diagnostic, exit 255)
//! ```

pub mod runner;

pub use runner::{Environment, RunState, Runner};
