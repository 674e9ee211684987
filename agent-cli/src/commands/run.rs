//! `guest-agent run`: the service entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};

use agent_core::Platform;
use agent_daemon::{start_blocking, AgentOptions};

pub fn run(config: Option<PathBuf>) -> Result<()> {
    let opts = AgentOptions::for_platform(Platform::current(), config);
    start_blocking(opts).context("guest agent exited with an error")
}
