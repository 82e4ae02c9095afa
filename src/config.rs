use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Default, Deserialize, Clone)]
struct PartialConfig {
    #[serde(default)]
    sync_folder: Option<PathBuf>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    server_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

/// Runtime knobs the engine honors (spec §6). All have defaults that match
/// the production service; a user only overrides the ones they care about.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub poll_interval: Duration,
    pub clock_buffer: Duration,
    pub max_retries: u32,
    pub retry_delays: [Duration; 3],
    pub watcher_stability: Duration,
    pub cache_ttl: Duration,
    pub max_backups_per_site: usize,
    pub debounce_window: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            clock_buffer: Duration::from_secs(10),
            max_retries: 3,
            retry_delays: [
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(60),
            ],
            watcher_stability: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(30),
            max_backups_per_site: 20,
            debounce_window: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sync_folder: PathBuf,
    pub username: String,
    pub server_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(skip)]
    pub runtime: RuntimeOptionsSerde,
}

/// Wraps [`RuntimeOptions`] so `Config` can derive `Deserialize` even though
/// the knobs live outside the persisted JSON shape today.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptionsSerde(pub RuntimeOptions);

impl Default for RuntimeOptionsSerde {
    fn default() -> Self {
        Self(RuntimeOptions::default())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub sync_folder: Option<PathBuf>,
    pub username: Option<String>,
    pub server_url: Option<String>,
    pub api_key: Option<String>,
}

pub fn default_log_file_path() -> PathBuf {
    home_dir().join(".sitesync").join("logs").join("sitesync.log")
}

impl Config {
    pub fn default_sync_folder() -> PathBuf {
        home_dir().join("Sites")
    }

    pub fn default_server_url() -> &'static str {
        "https://app.example.com"
    }

    pub fn default_config_path() -> PathBuf {
        home_dir().join(".sitesync").join("config.json")
    }

    pub fn resolve_config_path(flag_path: Option<&Path>) -> PathBuf {
        if let Some(p) = flag_path {
            return absolutize_path(p);
        }

        if let Ok(env_path) = std::env::var("SITESYNC_CONFIG_PATH") {
            let env_path = env_path.trim();
            if !env_path.is_empty() {
                return absolutize_path(Path::new(env_path));
            }
        }

        let candidates = [
            Self::default_config_path(),
            home_dir()
                .join(".config")
                .join("sitesync")
                .join("config.json"),
        ];
        for p in candidates {
            if p.exists() {
                return absolutize_path(&p);
            }
        }

        absolutize_path(&Self::default_config_path())
    }

    pub fn load_with_overrides(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let file_cfg = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<PartialConfig>(&data).context("parse config json")?
        } else {
            PartialConfig::default()
        };

        let env_cfg = read_env_config();

        let sync_folder = overrides
            .sync_folder
            .or(env_cfg.sync_folder)
            .or(file_cfg.sync_folder)
            .unwrap_or_else(Self::default_sync_folder);
        let username = overrides
            .username
            .or(env_cfg.username)
            .or(file_cfg.username)
            .unwrap_or_default();
        let server_url = overrides
            .server_url
            .or(env_cfg.server_url)
            .or(file_cfg.server_url)
            .unwrap_or_else(|| Self::default_server_url().to_string());
        let api_key = overrides.api_key.or(env_cfg.api_key).or(file_cfg.api_key);

        let mut cfg = Config {
            sync_folder,
            username,
            server_url,
            api_key,
            config_path: Some(path.to_path_buf()),
            runtime: RuntimeOptionsSerde::default(),
        };
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            anyhow::bail!("config_path missing");
        };
        save_config_file(path, self)
    }

    fn normalize(&mut self) -> Result<()> {
        self.sync_folder = absolutize_path(&self.sync_folder);
        if let Some(p) = self.config_path.take() {
            self.config_path = Some(absolutize_path(&p));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        crate::validator::validate_username(&self.username)
            .map_err(|e| anyhow::anyhow!(e.error.unwrap_or_default()))
            .context("username")?;
        validate_url(&self.server_url).context("server_url")?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PersistedConfig<'a> {
    sync_folder: &'a PathBuf,
    username: &'a str,
    server_url: &'a str,
    #[serde(skip_serializing_if = "is_none_or_empty")]
    api_key: &'a Option<String>,
}

fn is_none_or_empty(v: &Option<String>) -> bool {
    v.as_deref().unwrap_or("").trim().is_empty()
}

fn save_config_file(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let persisted = PersistedConfig {
        sync_folder: &cfg.sync_folder,
        username: &cfg.username,
        server_url: &cfg.server_url,
        api_key: &cfg.api_key,
    };
    let data = serde_json::to_vec_pretty(&persisted).context("serialize config")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub(crate) fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("url must be http or https");
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn absolutize_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let abs = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };
    let cleaned = clean_lexical(&abs);
    std::fs::canonicalize(&cleaned).unwrap_or(cleaned)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(c)) if c == OsStr::new("~") => {
            let mut out = home_dir();
            for c in components {
                out.push(c.as_os_str());
            }
            out
        }
        _ => path.to_path_buf(),
    }
}

fn clean_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => {
                if !pop_normal_component(&mut out) && !out.as_os_str().is_empty() {
                    out.push("..");
                }
            }
            Component::Normal(p) => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

fn pop_normal_component(path: &mut PathBuf) -> bool {
    let mut comps = path.components().collect::<Vec<_>>();
    match comps.pop() {
        Some(Component::Normal(_)) => {
            *path = rebuild_components(&comps);
            true
        }
        Some(Component::Prefix(_)) | Some(Component::RootDir) | None => false,
        Some(Component::CurDir) => {
            *path = rebuild_components(&comps);
            false
        }
        Some(Component::ParentDir) => {
            *path = rebuild_components(&comps);
            false
        }
    }
}

fn rebuild_components(components: &[Component<'_>]) -> PathBuf {
    let mut out = PathBuf::new();
    for c in components {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => out.push(".."),
            Component::Normal(p) => out.push(p),
        }
    }
    out
}

fn read_env_config() -> PartialConfig {
    let mut out = PartialConfig::default();
    if let Ok(v) = std::env::var("SITESYNC_USERNAME") {
        let v = v.trim();
        if !v.is_empty() {
            out.username = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("SITESYNC_SYNC_FOLDER") {
        let v = v.trim();
        if !v.is_empty() {
            out.sync_folder = Some(PathBuf::from(v));
        }
    }
    if let Ok(v) = std::env::var("SITESYNC_SERVER_URL") {
        let v = v.trim();
        if !v.is_empty() {
            out.server_url = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("SITESYNC_API_KEY") {
        let v = v.trim();
        if !v.is_empty() {
            out.api_key = Some(v.to_string());
        }
    }
    out
}
