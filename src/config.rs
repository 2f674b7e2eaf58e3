use crate::presets::{PresetEntry, PresetTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WpConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    /// Extra or replacement presets, keyed by repository
    #[serde(default)]
    pub presets: BTreeMap<String, PresetEntry>,
}

/// [server] section: the comparison server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for one branch fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

/// [github] section: where pull requests are listed from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
}

fn default_base_url() -> String {
    "http://localhost:8080/".into()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

fn default_owner() -> String {
    "paritytech".into()
}

fn default_repo() -> String {
    "polkadot-sdk".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            owner: default_owner(),
            repo: default_repo(),
        }
    }
}

impl WpConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.server.fetch_timeout_secs.max(1))
    }

    pub fn preset_table(&self) -> PresetTable {
        PresetTable::with_overrides(&self.presets)
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wp/config.toml"))
}

/// Load config by merging global defaults with per-directory overrides.
/// Priority: `./.wp-config.toml` > global `~/.config/wp/config.toml` > built-in defaults.
/// Merging is deep: individual fields within sections override independently.
pub fn load_config(dir: &Path) -> WpConfig {
    load_config_from(global_config_path().as_deref(), &dir.join(".wp-config.toml"))
}

fn load_config_from(global_path: Option<&Path>, local_path: &Path) -> WpConfig {
    let global_table = global_path.and_then(read_table);
    let local_table = read_table(local_path);

    let merged = match (global_table, local_table) {
        (Some(mut global), Some(local)) => {
            deep_merge(&mut global, local);
            toml::Value::Table(global)
        }
        (Some(global), None) => toml::Value::Table(global),
        (None, Some(local)) => toml::Value::Table(local),
        (None, None) => return WpConfig::default(),
    };

    merged.try_into().unwrap_or_else(|e| {
        log::warn!("Invalid config, using defaults: {}", e);
        WpConfig::default()
    })
}

fn read_table(path: &Path) -> Option<toml::Table> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<toml::Table>(&content) {
        Ok(table) => Some(table),
        Err(e) => {
            log::warn!("Ignoring unparsable config {}: {}", path.display(), e);
            None
        }
    }
}

/// Recursively merge `overlay` into `base`. Overlay values win; nested tables
/// are merged recursively.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Save config to the global config dir (~/.config/wp/config.toml).
pub fn save_config(config: &WpConfig) -> Result<PathBuf> {
    let path = global_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    save_config_to(config, &path)?;
    Ok(path)
}

fn save_config_to(config: &WpConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{CompareMethod, Unit};

    #[test]
    fn missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(None, &dir.path().join(".wp-config.toml"));
        assert_eq!(config.server.base_url, "http://localhost:8080/");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.github.owner, "paritytech");
        assert!(config.presets.is_empty());
    }

    #[test]
    fn local_fields_override_global_fields() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let local = dir.path().join(".wp-config.toml");
        std::fs::write(
            &global,
            "[server]\nbase_url = \"https://weights.example.org/\"\nfetch_timeout_secs = 10\n\n[github]\nowner = \"acme\"\n",
        )
        .unwrap();
        std::fs::write(&local, "[server]\nfetch_timeout_secs = 5\n").unwrap();

        let config = load_config_from(Some(&global), &local);

        assert_eq!(config.server.base_url, "https://weights.example.org/");
        assert_eq!(config.server.fetch_timeout_secs, 5);
        assert_eq!(config.github.owner, "acme");
        assert_eq!(config.github.repo, "polkadot-sdk");
    }

    #[test]
    fn presets_section_extends_table() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(".wp-config.toml");
        std::fs::write(
            &local,
            "[presets.substrate]\npath_pattern = \"frame/*/src/weights.rs\"\nmethod = \"guess-worst\"\nunit = \"weight\"\n",
        )
        .unwrap();

        let table = load_config_from(None, &local).preset_table();

        let preset = table.resolve(Some("substrate")).unwrap();
        assert_eq!(preset.method, CompareMethod::GuessWorst);
        assert_eq!(preset.unit, Unit::Weight);
        assert_eq!(preset.threshold, 10);
        assert!(table.resolve(Some("polkadot-sdk")).is_ok());
    }

    #[test]
    fn unparsable_local_falls_back_to_global() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let local = dir.path().join(".wp-config.toml");
        std::fs::write(&global, "[github]\nrepo = \"runtimes\"\n").unwrap();
        std::fs::write(&local, "[github\nrepo = ").unwrap();

        let config = load_config_from(Some(&global), &local);
        assert_eq!(config.github.repo, "runtimes");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wp/config.toml");
        let mut config = WpConfig::default();
        config.server.fetch_timeout_secs = 12;
        config.presets.insert(
            "cumulus".into(),
            PresetEntry {
                path_pattern: "parachains/runtimes/**/src/weights/*.rs".into(),
                threshold: 10,
                method: CompareMethod::GuessWorst,
                ignore_errors: true,
                unit: Unit::Weight,
            },
        );

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(Some(&path), &dir.path().join("missing.toml"));

        assert_eq!(loaded.server.fetch_timeout_secs, 12);
        assert_eq!(loaded.presets, config.presets);
    }
}
