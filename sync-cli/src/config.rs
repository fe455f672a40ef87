//! Configuration management for tmux-buffer-sync.
//!
//! The data directory holds:
//!
//! - `server.json`: this server's identity
//! - `state.json`: sync state (written by the engine)
//! - `config.toml`: settings, all optional
//! - `daemon.sock`: control socket of the running daemon

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use bufsync_client::{AtuinStore, ConfigError, StateFile, SyncConfig, TmuxBuffers};
use bufsync_types::{now_millis, ServerId};

/// tmux options that override the settings file.
pub const COUNT_OPTION: &str = "@buffer-sync-count";
/// See [`COUNT_OPTION`].
pub const FREQUENCY_OPTION: &str = "@buffer-sync-frequency";
/// See [`COUNT_OPTION`].
pub const NAMESPACE_OPTION: &str = "@buffer-sync-namespace";

/// Files inside the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    data_dir: PathBuf,
    config_file: PathBuf,
}

impl Paths {
    /// Paths under `data_dir`; `config_file` overrides `<data_dir>/config.toml`.
    pub fn new(data_dir: PathBuf, config_file: Option<PathBuf>) -> Self {
        let config_file = config_file.unwrap_or_else(|| data_dir.join("config.toml"));
        Self {
            data_dir,
            config_file,
        }
    }

    /// The data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Settings file.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Identity file.
    pub fn server_file(&self) -> PathBuf {
        self.data_dir.join("server.json")
    }

    /// Daemon control socket.
    pub fn socket(&self) -> PathBuf {
        self.data_dir.join("daemon.sock")
    }

    /// Sync state file.
    pub fn state_file(&self) -> StateFile {
        StateFile::in_dir(&self.data_dir)
    }
}

/// Server identity stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Unique server identifier.
    pub server_id: String,
    /// When the identity was created (unix millis).
    pub created_at: u64,
}

impl ServerIdentity {
    /// Create a new random identity.
    pub fn new() -> Self {
        Self {
            server_id: ServerId::random().to_string(),
            created_at: now_millis(),
        }
    }

    /// The parsed server id.
    pub fn id(&self) -> Result<ServerId> {
        self.server_id
            .parse()
            .context("Invalid server id in identity file")
    }

    /// Load the identity from a data directory.
    pub async fn load(paths: &Paths) -> Result<Self> {
        let contents = tokio::fs::read_to_string(paths.server_file())
            .await
            .context("Server not initialized. Run 'tmux-buffer-sync init' first.")?;
        serde_json::from_str(&contents).context("Invalid server identity")
    }

    /// Load the identity, creating one on first use.
    pub async fn load_or_create(paths: &Paths) -> Result<Self> {
        if Self::exists(paths) {
            return Self::load(paths).await;
        }
        let identity = Self::new();
        identity.save(paths).await?;
        tracing::info!("Created server identity {}", &identity.server_id[..16]);
        Ok(identity)
    }

    /// Save the identity to a data directory.
    pub async fn save(&self, paths: &Paths) -> Result<()> {
        let path = paths.server_file();
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save server identity")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if the identity exists.
    pub fn exists(paths: &Paths) -> bool {
        paths.server_file().exists()
    }
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings file (`config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Sync engine and scheduler settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// How to reach tmux.
    #[serde(default)]
    pub tmux: TmuxSettings,
    /// How to reach atuin.
    #[serde(default)]
    pub atuin: AtuinSettings,
}

/// `[tmux]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSettings {
    /// tmux binary (default: "tmux").
    #[serde(default = "default_tmux_bin")]
    pub bin: String,
    /// Socket name (`-L`) or path (`-S`), if not the default server.
    #[serde(default)]
    pub socket: Option<String>,
    /// Read `@buffer-sync-*` options from tmux (default: true).
    #[serde(default = "default_true")]
    pub read_options: bool,
}

/// `[atuin]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtuinSettings {
    /// atuin binary (default: "atuin").
    #[serde(default = "default_atuin_bin")]
    pub bin: String,
    /// Run `atuin sync` before pulls and after pushes (default: true).
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

fn default_tmux_bin() -> String {
    "tmux".to_string()
}

fn default_atuin_bin() -> String {
    "atuin".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TmuxSettings {
    fn default() -> Self {
        Self {
            bin: default_tmux_bin(),
            socket: None,
            read_options: true,
        }
    }
}

impl Default for AtuinSettings {
    fn default() -> Self {
        Self {
            bin: default_atuin_bin(),
            auto_sync: true,
        }
    }
}

impl Settings {
    /// Load settings from a file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The tmux adapter these settings describe.
    pub fn tmux(&self) -> TmuxBuffers {
        let tmux = TmuxBuffers::new().with_bin(&self.tmux.bin);
        match &self.tmux.socket {
            Some(socket) => tmux.with_socket(socket.clone()),
            None => tmux,
        }
    }

    /// The atuin adapter these settings describe.
    pub fn atuin(&self) -> AtuinStore {
        AtuinStore::new()
            .with_bin(&self.atuin.bin)
            .with_auto_sync(self.atuin.auto_sync)
    }
}

/// Values given on the command line or as tmux options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// `sync_count`
    pub count: Option<usize>,
    /// `sync_frequency`
    pub frequency: Option<u64>,
    /// `sync_namespace`
    pub namespace: Option<String>,
}

impl Overrides {
    /// Apply the values that are set.
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(count) = self.count {
            config = config.with_count(count);
        }
        if let Some(frequency) = self.frequency {
            config = config.with_frequency(frequency);
        }
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace);
        }
        config
    }

    /// Read the `@buffer-sync-*` options. Unset or unparsable options are
    /// skipped; an unreachable tmux server yields no overrides.
    pub async fn from_tmux(tmux: &TmuxBuffers) -> Self {
        let read = |option: &'static str| async move {
            match tmux.global_option(option).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!("Could not read tmux option {}: {}", option, e);
                    None
                }
            }
        };

        Self {
            count: parse_option(COUNT_OPTION, read(COUNT_OPTION).await),
            frequency: parse_option(FREQUENCY_OPTION, read(FREQUENCY_OPTION).await),
            namespace: read(NAMESPACE_OPTION).await,
        }
    }
}

fn parse_option<T: std::str::FromStr>(option: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring tmux option {} = {:?}: not a number", option, value);
            None
        }
    }
}

/// Everything a command needs: where files live, settings, and the
/// effective sync configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Data directory layout.
    pub paths: Paths,
    /// Settings file contents.
    pub settings: Settings,
    /// Effective configuration after all overrides.
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Resolve configuration: defaults < file < tmux options < CLI flags.
    pub async fn load(paths: Paths, cli: &Overrides) -> Result<Self> {
        let settings = Settings::load(paths.config_file()).await?;

        let tmux = if settings.tmux.read_options {
            Overrides::from_tmux(&settings.tmux()).await
        } else {
            Overrides::default()
        };

        let sync = resolve(&settings, &tmux, cli);
        sync.validate().context("Invalid configuration")?;

        Ok(Self {
            paths,
            settings,
            sync,
        })
    }

    /// Default settings, for reporting when the settings file is unusable.
    pub fn fallback(paths: Paths) -> Self {
        let settings = Settings::default();
        Self {
            paths,
            sync: settings.sync.clone(),
            settings,
        }
    }
}

/// Layer overrides on top of the settings file.
pub fn resolve(settings: &Settings, tmux: &Overrides, cli: &Overrides) -> SyncConfig {
    cli.apply(tmux.apply(settings.sync.clone()))
}

/// Default contents of `config.toml` written by `init`.
pub fn default_settings_toml() -> Result<String> {
    toml::to_string_pretty(&Settings::default()).context("Failed to render default settings")
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
