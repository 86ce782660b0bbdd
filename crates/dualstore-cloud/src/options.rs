use std::time::Duration;

/// Upper bound on concurrent metadata requests per listing.
pub const MAX_INFO_WORKERS: usize = 16;
pub const DEFAULT_INFO_WORKERS: usize = 8;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const INFO_WORKERS_ENV: &str = "DAV_INFO_WORKERS";
pub const INFO_DIRECTORIES_ENV: &str = "DAV_INFO_DIRECTORIES";

/// Tuning for the WebDAV adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudOptions {
    /// Concurrent `Depth: 0` requests during enrichment, clamped to
    /// `1..=MAX_INFO_WORKERS` when used
    pub info_workers: usize,
    /// Also fetch metadata for collections
    pub info_directories: bool,
    pub request_timeout: Duration,
    /// Skip TLS certificate validation (self-hosted servers)
    pub accept_invalid_certs: bool,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            info_workers: DEFAULT_INFO_WORKERS,
            info_directories: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

impl CloudOptions {
    /// Defaults with `DAV_INFO_WORKERS` / `DAV_INFO_DIRECTORIES` applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            std::env::var(INFO_WORKERS_ENV).ok().as_deref(),
            std::env::var(INFO_DIRECTORIES_ENV).ok().as_deref(),
        )
    }

    /// Apply raw override values; unparseable worker counts are ignored.
    pub fn with_overrides(mut self, workers: Option<&str>, directories: Option<&str>) -> Self {
        if let Some(n) = workers.and_then(|w| w.trim().parse::<usize>().ok()) {
            self.info_workers = n;
        }
        if let Some(flag) = directories {
            self.info_directories = parse_flag(flag);
        }
        self
    }

    pub fn effective_workers(&self) -> usize {
        self.info_workers.clamp(1, MAX_INFO_WORKERS)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
