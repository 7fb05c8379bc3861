pub mod backlog;
pub mod config;
pub mod init;
pub mod migrate;
pub mod next;
pub mod phase;
pub mod reconcile;
pub mod status;

use anyhow::Context;
use specflow_core::types::{resolve_key, PhaseNumber};

/// Parse a phase number argument; legacy three-digit keys are widened once.
pub fn parse_number(arg: &str) -> anyhow::Result<PhaseNumber> {
    resolve_key(arg).with_context(|| format!("'{arg}' is not a phase number"))
}
