use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::HeraldConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Override the config directory (e.g. from `--config-dir`).
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

/// Override the data directory (e.g. from `--data-dir`).
pub fn set_data_dir(path: PathBuf) {
    if let Ok(mut guard) = DATA_DIR_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

fn overridden(slot: &Mutex<Option<PathBuf>>) -> Option<PathBuf> {
    slot.lock().ok().and_then(|g| g.clone())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (project-local)
/// 2. the config dir (`--config-dir` or `~/.config/herald/`)
///
/// Returns `HeraldConfig::default()` if no config file is found or it fails
/// to parse.
pub fn discover_and_load() -> HeraldConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HeraldConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    find_in_dir(&dir)
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory (override or `~/.config/herald/`).
pub fn config_dir() -> Option<PathBuf> {
    overridden(&CONFIG_DIR_OVERRIDE).or_else(|| {
        directories::ProjectDirs::from("", "", "herald").map(|d| d.config_dir().to_path_buf())
    })
}

/// Returns the data directory (override, platform data dir, or `./.herald`).
pub fn data_dir() -> PathBuf {
    overridden(&DATA_DIR_OVERRIDE)
        .or_else(|| {
            directories::ProjectDirs::from("", "", "herald").map(|d| d.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from(".herald"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HeraldConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("herald.toml");
        std::fs::write(&toml_path, "[dispatch]\nmax_idle_cycles = 3\n").unwrap();
        assert_eq!(
            load_config(&toml_path).unwrap().dispatch.max_idle_cycles,
            Some(3)
        );

        let yaml_path = dir.path().join("herald.yaml");
        std::fs::write(&yaml_path, "server:\n  port: 9000\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().server.port, 9000);

        let json_path = dir.path().join("herald.json");
        std::fs::write(&json_path, r#"{"sidecar":{"url":"ws://sidecar:1"}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().sidecar.url, "ws://sidecar:1");
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.ini");
        std::fs::write(&path, "x").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn finds_first_matching_filename_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_in_dir(dir.path()).is_none());
        std::fs::write(dir.path().join("herald.json"), "{}").unwrap();
        std::fs::write(dir.path().join("herald.toml"), "").unwrap();
        assert_eq!(
            find_in_dir(dir.path()).unwrap(),
            dir.path().join("herald.toml")
        );
    }
}
