//! `guest-agent config`: show what the agent would read.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use agent_core::{Config, Platform};
use agent_daemon::paths::config_path;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct Entry {
    #[tabled(rename = "section")]
    section: String,
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "value")]
    value: String,
}

#[derive(Serialize)]
struct ConfigJson {
    sources: Vec<String>,
    entries: Vec<Entry>,
}

impl ConfigArgs {
    pub fn run(self, config: Option<PathBuf>) -> Result<()> {
        let base = config.unwrap_or_else(|| config_path(Platform::current()));
        let merged = Config::load_layered(&base)
            .with_context(|| format!("failed to load config from {}", base.display()))?;

        let sources: Vec<String> = merged
            .sources()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let entries: Vec<Entry> = merged
            .entries()
            .map(|(section, key, value)| Entry {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect();

        if self.json {
            let out = serde_json::to_string_pretty(&ConfigJson { sources, entries })
                .context("failed to serialize config")?;
            println!("{out}");
            return Ok(());
        }

        if sources.is_empty() {
            println!("{} no config files found at {}", "note:".yellow(), base.display());
        } else {
            println!("{}", "Sources".bold());
            for source in &sources {
                println!("  {source}");
            }
        }
        if entries.is_empty() {
            println!("{}", "(built-in defaults only)".dimmed());
            return Ok(());
        }
        println!("{}", Table::new(entries).with(Style::rounded()));
        Ok(())
    }
}
