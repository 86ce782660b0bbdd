use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use dualstore_cloud::{CloudOptions, DEFAULT_INFO_WORKERS};
use dualstore_core::{SessionDescriptor, StorageMode};
use dualstore_share::{ShareBackend, Smb2Connector, DEFAULT_SHARE_PORT};

/// Configuration for the dualstore command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "dualstore")]
#[command(about = "Browse, download and upload files on SMB2 shares and WebDAV clouds")]
pub struct Config {
    /// Storage flavour: share (SMB2) or cloud (WebDAV)
    #[arg(long, default_value = "share", env = "STORAGE_MODE")]
    pub storage: String,

    /// Share: server host. Cloud: base URL
    #[arg(long, default_value = "", env = "STORAGE_ENDPOINT")]
    pub endpoint: String,

    /// Share name (share mode only)
    #[arg(long, default_value = "", env = "STORAGE_SHARE")]
    pub share: String,

    #[arg(long, default_value = "", env = "STORAGE_USERNAME")]
    pub username: String,

    #[arg(long, default_value = "", env = "STORAGE_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Concurrent metadata requests per cloud listing (1-16)
    #[arg(long, default_value_t = DEFAULT_INFO_WORKERS, env = "DAV_INFO_WORKERS")]
    pub info_workers: usize,

    /// Fetch metadata for cloud folders too
    #[arg(
        long,
        default_value = "true",
        env = "DAV_INFO_DIRECTORIES",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub info_directories: bool,

    /// Per-request timeout for both storage flavours (seconds)
    #[arg(long, default_value = "30", env = "DAV_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// TCP port of the SMB2 server
    #[arg(long, default_value_t = DEFAULT_SHARE_PORT, env = "SHARE_PORT")]
    pub share_port: u16,

    /// Accept invalid TLS certificates (self-hosted clouds)
    #[arg(long)]
    pub insecure: bool,

    /// Print machine-readable JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List a directory (default: the storage root)
    List { path: Option<String> },
    /// Download one file
    Download { remote: String, local: PathBuf },
    /// Upload a file to the storage root under its own name
    Upload { local: PathBuf },
}

impl Config {
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            storage_mode: StorageMode::from_label(&self.storage),
            endpoint: self.endpoint.clone(),
            share_name: self.share.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            current_path: String::new(),
        }
    }

    pub fn cloud_options(&self) -> CloudOptions {
        CloudOptions {
            info_workers: self.info_workers,
            info_directories: self.info_directories,
            request_timeout: self.request_timeout(),
            accept_invalid_certs: self.insecure,
        }
    }

    /// Share backend over the native SMB2 client.
    pub fn share_backend(&self) -> ShareBackend {
        let connector = Smb2Connector::new().with_timeout(self.request_timeout());
        ShareBackend::new(Arc::new(connector)).with_port(self.share_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let config = Config::try_parse_from([
            "dualstore",
            "--storage",
            "webdav",
            "--endpoint",
            "https://cloud.example.com",
            "--username",
            "alice",
            "--password",
            "pw",
            "--info-workers",
            "4",
            "--info-directories",
            "no",
            "list",
            "Photos",
            "--json",
        ])
        .unwrap();

        let d = config.descriptor();
        assert_eq!(d.storage_mode, StorageMode::Cloud);
        assert_eq!(d.username, "alice");
        assert!(config.json);
        assert!(matches!(config.command, Command::List { path: Some(ref p) } if p == "Photos"));

        let opts = config.cloud_options();
        assert_eq!(opts.info_workers, 4);
        assert!(!opts.info_directories);
        assert_eq!(opts.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_transfer_commands() {
        let config =
            Config::try_parse_from(["dualstore", "download", "docs/a.txt", "/tmp/a.txt"]).unwrap();
        assert_eq!(config.descriptor().storage_mode, StorageMode::Share);
        assert!(matches!(config.command, Command::Download { .. }));

        let config = Config::try_parse_from(["dualstore", "upload", "/tmp/a.txt"]).unwrap();
        assert!(matches!(config.command, Command::Upload { .. }));
        assert_eq!(config.share_port, DEFAULT_SHARE_PORT);
    }
}
