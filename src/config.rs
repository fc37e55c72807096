use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::session::SessionOptions;

pub const CONFIG_FILENAME: &str = "ringsdb-translator.toml";
pub const CONFIG_ENV: &str = "RINGSDB_TRANSLATOR_CONFIG";
pub const DEFAULT_DICTIONARY_FILE: &str = "translation.json";
pub const DEFAULT_STORE_FILE: &str = "ringsdb-state.json";

/// Dictionary shipped with the crate; `init-config` writes it next to the config.
pub const BUNDLED_DICTIONARY: &str = include_str!("../assets/translation.json");

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub translator: TranslatorSection,
    #[serde(default)]
    pub sweep: SweepSection,
    #[serde(default)]
    pub intercept: InterceptSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslatorSection {
    /// Term dictionary JSON (source name -> target name).
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
    /// Mode used before anything has been stored: "zh_only", "bilingual" or "restore".
    #[serde(default)]
    pub default_mode: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct SweepSection {
    #[serde(default)]
    pub skip_elements: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct InterceptSection {
    /// Substrings matched against the response content type.
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    /// JSON file backing the key-value store.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Config with every path made absolute and every default filled in.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub dictionary_path: PathBuf,
    pub store_path: PathBuf,
    pub session: SessionOptions,
}

impl Settings {
    /// `explicit`, then `$RINGSDB_TRANSLATOR_CONFIG`, then an upward search. Without a
    /// config file everything defaults relative to the working directory.
    pub fn discover(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&cwd, CONFIG_FILENAME));

        match cfg_file {
            Some(p) if p.exists() => {
                let cfg = load_config(&p)?;
                log::debug!("using config {}", p.display());
                Self::from_config(&cfg, Some(&p), &cwd)
            }
            Some(p) => Err(anyhow::anyhow!("config not found: {}", p.display())),
            None => Self::from_config(&AppConfig::default(), None, &cwd),
        }
    }

    /// Relative paths resolve against the config file's directory, or `base_dir` without one.
    pub fn from_config(cfg: &AppConfig, config_path: Option<&Path>, base_dir: &Path) -> anyhow::Result<Self> {
        let dir = config_path
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(base_dir);
        let resolve = |p: &Path| if p.is_relative() { dir.join(p) } else { p.to_path_buf() };

        let dictionary_path = resolve(
            cfg.translator
                .dictionary
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_DICTIONARY_FILE)),
        );
        let store_path = resolve(cfg.storage.path.as_deref().unwrap_or(Path::new(DEFAULT_STORE_FILE)));

        let mut session = SessionOptions::default();
        if let Some(m) = cfg.translator.default_mode.as_deref() {
            session.default_mode = m.parse().context("translator.default_mode")?;
        }
        if let Some(skip) = cfg.sweep.skip_elements.clone() {
            session.skip_elements = skip;
        }
        if let Some(types) = cfg.intercept.content_types.clone() {
            session.content_types = types;
        }

        Ok(Self {
            config_path: config_path.map(Path::to_path_buf),
            dictionary_path,
            store_path,
            session,
        })
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

const DEFAULT_CONFIG_TOML: &str = r#"[translator]
dictionary = "translation.json"
# zh_only | bilingual | restore
default_mode = "zh_only"

[sweep]
# Text inside these elements is never touched.
skip_elements = ["script", "style"]

[intercept]
content_types = ["text/html", "application/json"]

[storage]
path = "ringsdb-state.json"
"#;

/// Writes the default config and the bundled dictionary into `dir`; existing files are
/// kept unless `force`.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;

    let dict_path = dir.join(DEFAULT_DICTIONARY_FILE);
    if !dict_path.exists() || force {
        std::fs::write(&dict_path, BUNDLED_DICTIONARY)
            .with_context(|| format!("write dictionary: {}", dict_path.display()))?;
    }

    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
