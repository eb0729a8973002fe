//! Configuration loading and output path resolution

use anyhow::{Context, Result};
use chrono::Local;
use j1939_capture::{OutputFormat, SignalCatalog, SignalDefinition, SinkConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Extra payload signals, added to the built-in catalog
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Mode name; any alias understood by `modes::normalize_mode`
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    /// Signals decoded into extra log columns ("all" for the whole catalog)
    #[serde(default)]
    pub signals: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            poll_timeout_ms: default_poll_timeout(),
            signals: Vec::new(),
        }
    }
}

fn default_mode() -> String {
    "logged".to_string()
}

fn default_poll_timeout() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    /// candump log to replay ("-" for stdin)
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    pub format: Option<OutputFormat>,
    /// Directory for the log file (default: current directory)
    pub location: Option<PathBuf>,
    /// File name without extension (default: can_log_<timestamp>)
    pub name: Option<String>,
}

impl AppConfig {
    /// Built-in signals plus `[[signals]]` entries; config entries win on name clashes
    pub fn signal_catalog(&self) -> SignalCatalog {
        let mut catalog = SignalCatalog::builtin();
        for signal in &self.signals {
            if catalog.insert(signal.clone()).is_some() {
                log::info!("Signal '{}' overridden by configuration", signal.name);
            }
        }
        catalog
    }
}

/// Pick the signals to decode into log columns
///
/// An empty selection means raw logging; `all` selects the whole catalog.
pub fn select_signals(catalog: &SignalCatalog, names: &[String]) -> Result<SignalCatalog> {
    if names.iter().any(|name| name.trim().eq_ignore_ascii_case("all")) {
        return Ok(catalog.clone());
    }
    catalog
        .select(names)
        .context("Invalid signal selection")
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Default log name, e.g. `can_log_20261019-130501`
pub fn default_output_name() -> String {
    format!("can_log_{}", Local::now().format("%Y%m%d-%H%M%S"))
}

/// Turn the (possibly partial) output settings into a fully resolved sink path
///
/// - format defaults to CSV
/// - location defaults to the current directory; `~` is expanded
/// - name defaults to [`default_output_name`]; a trailing extension matching
///   the format is dropped so `run.csv` does not become `run.csv.csv`
pub fn resolve_output(output: &OutputConfig) -> Result<SinkConfig> {
    let format = output.format.unwrap_or_else(|| {
        log::warn!("Output format not provided, defaulting to 'csv'");
        OutputFormat::Csv
    });

    let location = match &output.location {
        Some(location) => expand_home(location),
        None => {
            let cwd = std::env::current_dir().context("Failed to determine current directory")?;
            log::warn!("Output location not provided, defaulting to {:?}", cwd);
            cwd
        }
    };
    let location = if location.is_absolute() {
        location
    } else {
        std::env::current_dir()
            .context("Failed to determine current directory")?
            .join(location)
    };

    let name = match output.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => strip_extension(name, format).to_string(),
        _ => {
            let name = default_output_name();
            log::warn!("Output name not provided, defaulting to '{}'", name);
            name
        }
    };

    Ok(SinkConfig::new(
        location.join(format!("{}.{}", name, format.extension())),
        format,
    ))
}

fn strip_extension(name: &str, format: OutputFormat) -> &str {
    let suffix = format!(".{}", format.extension());
    if name.len() > suffix.len() && name.to_ascii_lowercase().ends_with(&suffix) {
        &name[..name.len() - suffix.len()]
    } else {
        name
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [capture]
            mode = "logging"
            signals = ["nox", "egt"]

            [input]
            file = "trace.log"

            [output]
            format = "json"
            location = "/var/log/can"
            name = "field_run"

            [[signals]]
            name = "egt"
            byte_offset = 2
            scale = 1.0
            bias = 40.0
            unit = "degC"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.capture.mode, "logging");
        assert_eq!(config.capture.poll_timeout_ms, 1000);
        assert_eq!(config.output.format, Some(OutputFormat::Json));
        assert_eq!(config.signals.len(), 1);
        assert_eq!(config.signals[0].unit.as_deref(), Some("degC"));

        let selected = select_signals(&config.signal_catalog(), &config.capture.signals).unwrap();
        assert_eq!(selected.names(), vec!["egt".to_string(), "nox".to_string()]);
    }

    #[test]
    fn test_signal_catalog_extends_and_overrides_builtins() {
        let mut config = AppConfig::default();
        config.signals = vec![
            SignalDefinition::new("egt", 2, 1.0, 40.0),
            SignalDefinition::new("nox", 0, 1.0, 0.0),
        ];
        let catalog = config.signal_catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("nox").unwrap().scale, 1.0);
    }

    #[test]
    fn test_select_signals() {
        let catalog = AppConfig::default().signal_catalog();
        assert!(select_signals(&catalog, &[]).unwrap().is_empty());
        assert_eq!(select_signals(&catalog, &["ALL".to_string()]).unwrap(), catalog);
        assert!(select_signals(&catalog, &["egt".to_string()]).is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.capture.mode, "logged");
        assert!(config.capture.signals.is_empty());
        assert!(config.input.file.is_none());
        assert!(config.signals.is_empty());
    }

    #[test]
    fn test_resolve_output_explicit() {
        let output = OutputConfig {
            format: Some(OutputFormat::Csv),
            location: Some(PathBuf::from("/data/logs")),
            name: Some("bench.CSV".to_string()),
        };
        let sink = resolve_output(&output).unwrap();
        assert_eq!(sink.path, PathBuf::from("/data/logs/bench.csv"));
        assert_eq!(sink.format, OutputFormat::Csv);
    }

    #[test]
    fn test_resolve_output_defaults() {
        let sink = resolve_output(&OutputConfig::default()).unwrap();
        assert_eq!(sink.format, OutputFormat::Csv);
        assert!(sink.path.is_absolute());
        let file_name = sink.path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("can_log_"));
        assert!(file_name.ends_with(".csv"));
    }

    #[test]
    fn test_strip_extension_only_matching_format() {
        assert_eq!(strip_extension("run.json", OutputFormat::Json), "run");
        assert_eq!(strip_extension("run.json", OutputFormat::Csv), "run.json");
        assert_eq!(strip_extension(".csv", OutputFormat::Csv), ".csv");
    }
}
