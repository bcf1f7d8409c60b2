//! `trafficcontrol dnd` subcommands: a do-not-disturb toggle that gates
//! alert delivery. Stored as a small JSON file next to the config file
//! rather than in the database -- it's operator-local state, not something
//! projects or tasks reference.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cli_output::CliOutput;

#[derive(Debug, Serialize, Deserialize)]
struct DndState {
    enabled: bool,
    since: DateTime<Utc>,
}

fn dnd_path() -> std::path::PathBuf {
    crate::config::config_dir().join("dnd.json")
}

fn read_state() -> DndState {
    std::fs::read_to_string(dnd_path())
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(DndState { enabled: false, since: Utc::now() })
}

fn write_state(state: &DndState) -> Result<()> {
    let path = dnd_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(state)?).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn on() -> Result<CliOutput> {
    let state = DndState { enabled: true, since: Utc::now() };
    write_state(&state)?;
    Ok(CliOutput::ok("do-not-disturb enabled"))
}

pub fn off() -> Result<CliOutput> {
    let state = DndState { enabled: false, since: Utc::now() };
    write_state(&state)?;
    Ok(CliOutput::ok("do-not-disturb disabled"))
}

pub fn status() -> Result<CliOutput> {
    let state = read_state();
    Ok(CliOutput::ok_with(
        if state.enabled { "do-not-disturb is on" } else { "do-not-disturb is off" },
        json!({ "enabled": state.enabled, "since": state.since }),
    ))
}
