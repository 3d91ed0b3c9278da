//! `repodeck.toml`: which programs to run as executor, watcher and message
//! generator, and the limits applied to them.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "repodeck.toml";

/// Parsed `repodeck.toml`.
///
/// Every field has a default, so an empty file (or no file) runs the Python
/// executor and watcher from the current directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Wall-clock bound for one executor or generator invocation, in seconds.
    pub command_timeout_secs: u64,

    /// Keep at most this many bytes of executor stdout/stderr.
    pub output_limit_bytes: usize,

    /// Buffered watcher records per subscriber before it starts lagging.
    pub watch_channel_capacity: usize,

    /// Commits requested on history refresh.
    pub history_limit: u32,

    pub executor: ProgramConfig,
    pub watcher: ProgramConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramConfig {
    /// Program and leading arguments (e.g. `["python3", "git_operations.py"]`).
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Commit message generator; when unset the local fallback message is used.
    pub command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            output_limit_bytes: 1_000_000,
            watch_channel_capacity: 256,
            history_limit: 50,
            executor: ProgramConfig {
                command: vec!["python3".to_string(), "git_operations.py".to_string()],
            },
            watcher: ProgramConfig {
                command: vec!["python3".to_string(), "file_watcher.py".to_string()],
            },
            generator: GeneratorConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.watch_channel_capacity == 0 {
            return Err(anyhow!("watch_channel_capacity must be > 0"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be > 0"));
        }
        check_command("executor.command", &self.executor.command)?;
        check_command("watcher.command", &self.watcher.command)?;
        if let Some(command) = &self.generator.command {
            check_command("generator.command", command)?;
        }
        Ok(())
    }
}

fn check_command(field: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(exe) if !exe.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{field} must be a non-empty array")),
    }
}

/// Read and validate `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let cfg: Config = match fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Config::default(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Validate `cfg` and replace `path` with it, via a sibling `.toml.tmp` and a rename.
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
