//! Logging configuration
//!
//! Everything here is serde so a simulation config file can carry its own
//! logging section. `RUST_LOG`, when set, replaces the computed filter.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Target used by the engine crate's per-packet events
pub const ENGINE_TARGET: &str = "cope_engine";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target without its own directive
    pub default_level: String,

    /// Separate level for the engine's hot path. Per-packet events
    /// (overheard, acked, redundant) are `trace`/`debug` and swamp the
    /// simulator's own output unless they are filtered apart.
    #[serde(default)]
    pub engine_level: Option<String>,

    pub console: ConsoleConfig,

    /// JSONL file output, e.g. to keep a record of a simulation run
    pub file: Option<FileConfig>,

    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            engine_level: None,
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// Pretty console at `debug`; engine internals stay at `info` so a
    /// scenario's progress remains readable
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            engine_level: Some("info".to_string()),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// Full per-packet trace of one run written to `log_dir/cope.log`.
    /// The console is left off; a run produces one file, so no rotation.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            default_level: "info".to_string(),
            engine_level: Some("trace".to_string()),
            console: ConsoleConfig {
                enabled: false,
                pretty: false,
                ansi: false,
            },
            file: Some(FileConfig::single_run(log_dir)),
            jsonl: JsonlConfig {
                include_location: false,
                ..JsonlConfig::default()
            },
        }
    }

    /// Warnings only, so a halted engine still shows up in test output
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            engine_level: None,
            console: ConsoleConfig {
                enabled: true,
                pretty: false,
                ansi: false,
            },
            ..Default::default()
        }
    }

    /// `EnvFilter` directives for this config, e.g. `info,cope_engine=trace`
    pub fn filter_directives(&self) -> String {
        match &self.engine_level {
            Some(level) => format!("{},{}={}", self.default_level, ENGINE_TARGET, level),
            None => self.default_level.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSONL
    pub pretty: bool,
    /// Colors; only honored in pretty mode
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        // JSONL, so `cope-sim` output can be piped into jq
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Created on init if missing
    pub directory: PathBuf,
    /// Base file name; rolling appenders add a date suffix
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileConfig {
    /// One file per run, truncated when the run starts
    pub fn single_run(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "cope".to_string(),
            rotation: RotationStrategy::Never,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "cope".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

/// How file output is split over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    /// Long-running nodes
    #[default]
    Daily,
    Hourly,
    /// Single `<prefix>.log`
    Never,
}

/// Shape of each JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlConfig {
    /// Put `fingerprint`, `degree` and friends at the top level instead of
    /// under `fields`
    pub flatten_events: bool,
    /// Include the enclosing spans, which carry the node label
    pub include_spans: bool,
    pub include_location: bool,
    /// Thread ids and names; useful with the tokio runtime
    pub include_thread_info: bool,
    /// Labels logged once at startup, e.g. scenario name and seed
    pub extra_fields: HashMap<String, String>,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: true,
            include_thread_info: false,
            extra_fields: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty);
        assert!(config.file.is_none());
        assert_eq!(config.filter_directives(), "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
        assert_eq!(config.filter_directives(), "debug,cope_engine=info");
    }

    #[test]
    fn test_production_records_one_file_per_run() {
        let config = LogConfig::production(PathBuf::from("/tmp/cope-run"));
        assert!(!config.console.enabled);
        let file = config.file.clone().unwrap();
        assert_eq!(file.directory, PathBuf::from("/tmp/cope-run"));
        assert_eq!(file.rotation, RotationStrategy::Never);
        assert_eq!(config.filter_directives(), "info,cope_engine=trace");
    }

    #[test]
    fn test_engine_level_is_optional_in_json() {
        let json = r#"{
            "default_level": "warn",
            "console": {"enabled": true, "pretty": false, "ansi": false},
            "file": null,
            "jsonl": {
                "flatten_events": true,
                "include_spans": false,
                "include_location": false,
                "include_thread_info": false,
                "extra_fields": {"scenario": "cross"}
            }
        }"#;
        let config: LogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine_level, None);
        assert_eq!(config.jsonl.extra_fields["scenario"], "cross");
    }

    #[test]
    fn test_config_serde() {
        let config = LogConfig::testing();
        let json = serde_json::to_string(&config).unwrap();
        let back: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_level, "warn");
        assert!(!back.console.pretty);
    }
}
