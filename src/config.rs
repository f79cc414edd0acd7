use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{env, fs, path::Path, path::PathBuf};

/// Launcher-wide configuration, shared by every plan run.
///
/// The opaque sections (`log_settings`, `communication_settings`,
/// `services_deployment`) are handed through unchanged to concurrently
/// launched actions and to the batch launcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub log_settings: Value,
    pub communication_settings: Value,
    pub services_deployment: Value,
    pub is_interactive: bool,
    /// Where scripts received by the app server are stored.
    pub script_dir: Option<PathBuf>,
}

impl LauncherConfig {
    /// Load from an explicit path, or from the first config file found by
    /// [`resolve_config_path`]. No file at all yields the defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match resolve_config_path() {
                Some(path) => path,
                None => {
                    tracing::debug!("no launcher config found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        tracing::info!("Loading launcher config from {}", path.display());
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        let cfg: LauncherConfig = serde_json::from_value(expand_value(value))
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn script_dir(&self) -> PathBuf {
        if let Some(dir) = &self.script_dir {
            return dir.clone();
        }
        if let Ok(dir) = env::var("COSIM_SCRIPT_DIRPATH") {
            return PathBuf::from(dir);
        }
        env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("COSIM_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("cosim").join("cosim.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("cosim.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Python-style truthiness for plan parameters.
pub fn strtobool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(anyhow::anyhow!("invalid truth value `{other}`")),
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}
