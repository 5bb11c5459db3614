//! Server configuration: optional JSON file, overridden by command-line flags.

use std::{fs, net::IpAddr, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::ServerArgs;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65532;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:65532";

/// Shape of the optional config file. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: String,
    pub port: u16,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout_secs: None,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// `None` keeps silent connections open indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: &ServerArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    fn merge(file: FileConfig, args: &ServerArgs) -> Result<Self> {
        let listen = match args.listen {
            Some(listen) => listen,
            None => {
                let host: IpAddr = file
                    .host
                    .parse()
                    .with_context(|| format!("config host {:?} is not an IP address", file.host))?;
                SocketAddr::new(host, file.port)
            }
        };
        let idle_timeout = args
            .idle_timeout_secs
            .or(file.idle_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            listen,
            idle_timeout,
        })
    }
}
