use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7934;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;
pub const CONFIG_FILE: &str = "symdex.toml";
pub const INDEX_DIR: &str = ".symdex";

/// Optional per-project settings read from `symdex.toml`; CLI flags win.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SymdexConfig {
    pub port: Option<u16>,
    pub idle_timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    /// Skips the builtin header probe when set
    pub builtin_include: Option<String>,
    /// Background sweep period; no background sweeps when absent
    pub sweep_interval_secs: Option<u64>,
    pub watch: Option<bool>,
    /// Extra gitignore-style patterns for the watcher
    pub exclude: Option<Vec<String>>,
}

impl SymdexConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn watch_enabled(&self) -> bool {
        self.watch.unwrap_or(false)
    }

    /// Fill unset fields from `other`
    pub fn merged_with(mut self, other: &SymdexConfig) -> Self {
        self.port = self.port.or(other.port);
        self.idle_timeout_secs = self.idle_timeout_secs.or(other.idle_timeout_secs);
        self.workers = self.workers.or(other.workers);
        self.builtin_include = self.builtin_include.or_else(|| other.builtin_include.clone());
        self.sweep_interval_secs = self.sweep_interval_secs.or(other.sweep_interval_secs);
        self.watch = self.watch.or(other.watch);
        self.exclude = self.exclude.or_else(|| other.exclude.clone());
        self
    }
}

pub fn config_path_in(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_FILE)
}

pub fn default_database_path_in(project_root: &Path) -> PathBuf {
    project_root.join(INDEX_DIR).join("index.db")
}

pub fn load_config(path: &Path) -> anyhow::Result<Option<SymdexConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)?;
    let config: SymdexConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &SymdexConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = format!("{}/", INDEX_DIR);

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(&entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SymdexConfig::default();
        assert_eq!(config.port(), 7934);
        assert_eq!(config.idle_timeout(), Duration::from_secs(3600));
        assert_eq!(config.sweep_interval(), None);
        assert!(!config.watch_enabled());
    }

    #[test]
    fn test_load_and_merge() {
        let dir = TempDir::new().unwrap();
        let path = config_path_in(dir.path());
        assert!(load_config(&path).unwrap().is_none());

        std::fs::write(&path, "port = 9000\nsweep_interval_secs = 30\nwatch = true\n").unwrap();
        let file = load_config(&path).unwrap().unwrap();
        assert_eq!(file.port(), 9000);
        assert_eq!(file.sweep_interval(), Some(Duration::from_secs(30)));

        let cli = SymdexConfig {
            port: Some(8000),
            ..Default::default()
        };
        let merged = cli.merged_with(&file);
        assert_eq!(merged.port(), 8000);
        assert!(merged.watch_enabled());
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = config_path_in(dir.path());
        write_config(&path, &SymdexConfig::default(), false).unwrap();
        assert!(write_config(&path, &SymdexConfig::default(), false).is_err());
        write_config(&path, &SymdexConfig::default(), true).unwrap();
    }

    #[test]
    fn test_ensure_gitignore_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "build/").unwrap();
        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "build/\n.symdex/\n");
    }
}
