//! Configuration loading and validation.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. JSON config file (`--config`, or `<config dir>/linkmux/config.json`)
//! 2. `LINKMUX_*` environment variables
//! 3. Command-line flags (applied by the binary)
//!
//! [`Config::hub_settings`] and [`Config::remote_settings`] run the preflight
//! checks for each role and produce typed settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{FILE_POLL_INTERVAL, MAX_LINK_FILE_SIZE};
use crate::transport::file::FileLinkOptions;
use crate::transport::poll::IntervalPoller;

/// Raw, unvalidated configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Hub: where applications connect. Remote: where the link is accepted.
    pub listen: Option<String>,
    /// Hub: link address to dial. Remote: backend address to dial per connection.
    pub forward: Option<String>,
    /// File link: file to read the peer's records from.
    pub input: Option<PathBuf>,
    /// File link: file to append our records to.
    pub output: Option<PathBuf>,
    /// File link poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// File link size cap in bytes.
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: None,
            forward: None,
            input: None,
            output: None,
            poll_interval_ms: FILE_POLL_INTERVAL.as_millis() as u64,
            max_file_size: MAX_LINK_FILE_SIZE,
        }
    }
}

/// How a role obtains its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEndpoint {
    /// TCP. The hub dials this address; the remote listens on it.
    Tcp(String),
    /// Pair of shared files.
    Files {
        /// File carrying the peer's records.
        input: PathBuf,
        /// File carrying our records.
        output: PathBuf,
    },
}

/// Validated hub settings.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Address applications connect to.
    pub listen: String,
    /// Link to the remote.
    pub link: LinkEndpoint,
    /// File link tuning.
    pub file_options: FileLinkOptions,
}

/// Validated remote settings.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Link from the hub.
    pub link: LinkEndpoint,
    /// Backend dialed once per new connection id.
    pub forward: String,
    /// File link tuning.
    pub file_options: FileLinkOptions,
}

impl Config {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("linkmux").join("config.json"))
    }

    /// Load configuration, then apply environment overrides.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("LINKMUX_LISTEN") {
            self.listen = Some(listen);
        }
        if let Some(forward) = lookup("LINKMUX_FORWARD") {
            self.forward = Some(forward);
        }
        if let Some(input) = lookup("LINKMUX_INPUT") {
            self.input = Some(PathBuf::from(input));
        }
        if let Some(output) = lookup("LINKMUX_OUTPUT") {
            self.output = Some(PathBuf::from(output));
        }
        if let Some(interval) = lookup("LINKMUX_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poll_interval_ms = interval;
        }
        if let Some(max) = lookup("LINKMUX_MAX_FILE_SIZE").and_then(|v| v.parse().ok()) {
            self.max_file_size = max;
        }
    }

    fn file_link(&self) -> Result<Option<LinkEndpoint>> {
        match (&self.input, &self.output) {
            (Some(input), Some(output)) => Ok(Some(LinkEndpoint::Files {
                input: input.clone(),
                output: output.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => bail!("missing output file (input given without output)"),
            (None, Some(_)) => bail!("missing input file (output given without input)"),
        }
    }

    fn file_options(&self) -> Result<FileLinkOptions> {
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be at least 1 ms");
        }
        if self.max_file_size == 0 {
            bail!("max file size must be nonzero");
        }
        Ok(FileLinkOptions {
            max_file_size: self.max_file_size,
            poller: Arc::new(IntervalPoller::new(Duration::from_millis(
                self.poll_interval_ms,
            ))),
        })
    }

    /// Preflight checks for the hub role.
    pub fn hub_settings(&self) -> Result<HubSettings> {
        let listen = self
            .listen
            .clone()
            .context("hub needs a listen address for applications")?;
        let link = match self.file_link()? {
            Some(files) => files,
            None => LinkEndpoint::Tcp(
                self.forward
                    .clone()
                    .context("hub needs a forward address or input/output files for the link")?,
            ),
        };
        Ok(HubSettings {
            listen,
            link,
            file_options: self.file_options()?,
        })
    }

    /// Preflight checks for the remote role.
    pub fn remote_settings(&self) -> Result<RemoteSettings> {
        let forward = self
            .forward
            .clone()
            .context("remote needs a forward address for the backend")?;
        let link = match self.file_link()? {
            Some(files) => files,
            None => LinkEndpoint::Tcp(
                self.listen
                    .clone()
                    .context("remote needs a listen address or input/output files for the link")?,
            ),
        };
        Ok(RemoteSettings {
            link,
            forward,
            file_options: self.file_options()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tcp_config(listen: &str, forward: &str) -> Config {
        Config {
            listen: Some(listen.to_string()),
            forward: Some(forward.to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert!(config.listen.is_none());
    }

    #[test]
    fn test_hub_over_tcp() {
        let settings = tcp_config("127.0.0.1:3000", "10.0.0.2:9000")
            .hub_settings()
            .unwrap();
        assert_eq!(settings.listen, "127.0.0.1:3000");
        assert_eq!(settings.link, LinkEndpoint::Tcp("10.0.0.2:9000".to_string()));
    }

    #[test]
    fn test_remote_over_tcp() {
        let settings = tcp_config("0.0.0.0:9000", "127.0.0.1:22")
            .remote_settings()
            .unwrap();
        assert_eq!(settings.forward, "127.0.0.1:22");
        assert_eq!(settings.link, LinkEndpoint::Tcp("0.0.0.0:9000".to_string()));
    }

    #[test]
    fn test_files_take_precedence_for_link() {
        let config = Config {
            input: Some(PathBuf::from("/share/in")),
            output: Some(PathBuf::from("/share/out")),
            ..tcp_config("127.0.0.1:3000", "10.0.0.2:9000")
        };
        let settings = config.hub_settings().unwrap();
        assert_eq!(
            settings.link,
            LinkEndpoint::Files {
                input: PathBuf::from("/share/in"),
                output: PathBuf::from("/share/out"),
            }
        );
    }

    #[test]
    fn test_remote_over_files_needs_no_listen() {
        let config = Config {
            forward: Some("127.0.0.1:22".to_string()),
            input: Some(PathBuf::from("in")),
            output: Some(PathBuf::from("out")),
            ..Config::default()
        };
        assert!(config.remote_settings().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(Config::default().hub_settings().is_err());
        assert!(Config::default().remote_settings().is_err());

        let hub_without_link = Config {
            listen: Some("127.0.0.1:3000".to_string()),
            ..Config::default()
        };
        let err = hub_without_link.hub_settings().unwrap_err().to_string();
        assert!(err.contains("forward"), "unexpected error: {err}");
    }

    #[test]
    fn test_half_file_pair_rejected() {
        let config = Config {
            input: Some(PathBuf::from("in")),
            ..tcp_config("127.0.0.1:3000", "10.0.0.2:9000")
        };
        let err = config.hub_settings().unwrap_err().to_string();
        assert!(err.contains("output"), "unexpected error: {err}");
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = Config {
            poll_interval_ms: 0,
            ..tcp_config("127.0.0.1:3000", "10.0.0.2:9000")
        };
        assert!(config.hub_settings().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("LINKMUX_LISTEN", "127.0.0.1:4000"),
            ("LINKMUX_POLL_INTERVAL_MS", "25"),
            ("LINKMUX_MAX_FILE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = tcp_config("127.0.0.1:3000", "10.0.0.2:9000");
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.listen.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(config.forward.as_deref(), Some("10.0.0.2:9000"));
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.max_file_size, MAX_LINK_FILE_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{"listen": "127.0.0.1:3000", "forward": "127.0.0.1:9000"}"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.listen.as_deref(), Some("127.0.0.1:3000"));
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(tmp.path().join("nope.json").as_path())).is_err());
    }
}
