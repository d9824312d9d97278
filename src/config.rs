use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestration::FailurePolicy;
use crate::{klog_debug, Error, Result};

pub const CONFIG_FILE: &str = "kiln.toml";

/// Project configuration, read from `kiln.toml` at the project root.
///
/// Every field has a default, so an empty or missing file describes the
/// conventional `source/` -> `build/` layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root all relative directories are resolved against.
    #[serde(skip)]
    pub root: PathBuf,
    pub source_dir: String,
    pub build_dir: String,
    pub failure_policy: FailurePolicy,
    pub server: ServerConfig,
    pub styles: StylesConfig,
    pub html: HtmlConfig,
    pub images: ImageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            source_dir: "source".to_string(),
            build_dir: "build".to_string(),
            failure_policy: FailurePolicy::default(),
            server: ServerConfig::default(),
            styles: StylesConfig::default(),
            html: HtmlConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StylesConfig {
    /// Entry stylesheet, relative to the source directory.
    pub entry: String,
    /// Minified output, relative to the build directory.
    pub output: String,
    pub source_map: bool,
    pub targets: BrowserTargets,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: "scss/style.scss".to_string(),
            output: "css/style.min.css".to_string(),
            source_map: true,
            targets: BrowserTargets::default(),
        }
    }
}

/// Oldest major browser versions vendor prefixes are generated for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserTargets {
    pub chrome: Option<u32>,
    pub firefox: Option<u32>,
    pub safari: Option<u32>,
    pub edge: Option<u32>,
    pub ios_saf: Option<u32>,
    pub samsung: Option<u32>,
}

impl Default for BrowserTargets {
    fn default() -> Self {
        Self {
            chrome: Some(90),
            firefox: Some(88),
            safari: Some(13),
            edge: Some(90),
            ios_saf: Some(13),
            samsung: Some(14),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlConfig {
    pub include_prefix: String,
    pub collapse_whitespace: bool,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            include_prefix: "@@".to_string(),
            collapse_whitespace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub jpeg_quality: u8,
    /// Keep the source bytes when re-encoding would make a file larger.
    pub never_grow: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            never_grow: true,
        }
    }
}

impl Config {
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// Load `kiln.toml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::config_path(root);
        klog_debug!("Config::load path={}", path.display());
        let mut config = if path.exists() {
            toml::from_str::<Self>(&fs::read_to_string(&path)?)?
        } else {
            klog_debug!("Config file not found, using defaults");
            Self::default()
        };
        config.root = root.to_path_buf();
        config.validate()?;
        klog_debug!(
            "Config loaded: source={}, build={}, policy={:?}, server={}",
            config.source_dir,
            config.build_dir,
            config.failure_policy,
            config.server_addr()
        );
        Ok(config)
    }

    /// Defaults rooted at `root`, without reading any file.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let source = self.source_path();
        let build = self.build_path();
        if source == build {
            return Err(Error::Validation(format!(
                "source_dir and build_dir must differ (both {})",
                source.display()
            )));
        }
        if build.starts_with(&source) {
            return Err(Error::Validation(format!(
                "build_dir {} must not be inside source_dir {}",
                build.display(),
                source.display()
            )));
        }
        if !(1..=100).contains(&self.images.jpeg_quality) {
            return Err(Error::Validation(format!(
                "images.jpeg_quality must be within 1..=100, got {}",
                self.images.jpeg_quality
            )));
        }
        if self.html.include_prefix.is_empty() {
            return Err(Error::Validation(
                "html.include_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source_path(&self) -> PathBuf {
        resolve(&self.root, &self.source_dir)
    }

    pub fn build_path(&self) -> PathBuf {
        resolve(&self.root, &self.build_dir)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn resolve(root: &Path, dir: &str) -> PathBuf {
    let expanded = expand_tilde(dir);
    if expanded.is_absolute() {
        expanded
    } else {
        crate::util::normalize(&root.join(expanded))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
