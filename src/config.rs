//! Configuration options for slotwatch

use std::time::Duration;

use log::debug;
use slotwatch_realtime::RealtimeClientOptions;
use url::Url;

use crate::error::Error;
use crate::models::PageSize;

/// Configuration options for the slotwatch client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout for store queries. `None` waits as long as the HTTP client does.
    pub request_timeout: Option<Duration>,

    /// The database schema
    pub db_schema: String,

    /// Page size a freshly mounted appointments table starts with
    pub default_page_size: PageSize,

    /// Pull the current page back into range when a refresh shrinks the result set
    pub clamp_page_on_refresh: bool,

    /// Age after which the last completed scrape run is shown as stale
    pub stale_after: Duration,

    /// Reconnect and heartbeat settings for the change feed
    pub realtime: RealtimeClientOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            db_schema: "public".to_string(),
            default_page_size: PageSize::default(),
            clamp_page_on_refresh: true,
            stale_after: Duration::from_secs(30 * 60),
            realtime: RealtimeClientOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the initial page size of appointment tables
    pub fn with_default_page_size(mut self, value: PageSize) -> Self {
        self.default_page_size = value;
        self
    }

    /// Set whether refreshes clamp an out-of-range page
    pub fn with_clamp_page_on_refresh(mut self, value: bool) -> Self {
        self.clamp_page_on_refresh = value;
        self
    }

    /// Set the stale-after threshold of the last-checked indicator
    pub fn with_stale_after(mut self, value: Duration) -> Self {
        self.stale_after = value;
        self
    }

    /// Set the change feed options
    pub fn with_realtime_options(mut self, value: RealtimeClientOptions) -> Self {
        self.realtime = value;
        self
    }

    /// Set how many reconnects the change feed tries before giving up. `None` retries forever.
    pub fn with_max_reconnect_attempts(mut self, value: Option<u32>) -> Self {
        self.realtime.max_reconnect_attempts = value;
        self
    }
}

/// Project credentials plus options, usually read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub anon_key: String,
    pub options: ClientOptions,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// A `.env` file in the working directory (or a parent) is loaded first
    /// when present. Variables:
    ///
    /// * `SUPABASE_URL`, `SUPABASE_ANON_KEY` (required)
    /// * `SLOTWATCH_PAGE_SIZE` (25, 50 or 100)
    /// * `SLOTWATCH_STALE_AFTER_SECS`
    /// * `SLOTWATCH_MAX_RECONNECT_ATTEMPTS` (a number, or `unlimited`)
    pub fn from_env() -> Result<Self, Error> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::config(format!("Cannot read .env file: {}", e))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::config(format!("{} is not set", key)))
        };
        let url = required("SUPABASE_URL")?;
        match Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(Error::config(format!(
                    "SUPABASE_URL must be an http(s) URL, got {:?}",
                    url
                )))
            }
        }
        let anon_key = required("SUPABASE_ANON_KEY")?;

        let mut options = ClientOptions::default();

        if let Some(raw) = lookup("SLOTWATCH_PAGE_SIZE") {
            let size = raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| PageSize::try_from(n).ok())
                .ok_or_else(|| {
                    Error::config(format!("SLOTWATCH_PAGE_SIZE must be 25, 50 or 100, got {:?}", raw))
                })?;
            options = options.with_default_page_size(size);
        }

        if let Some(raw) = lookup("SLOTWATCH_STALE_AFTER_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                Error::config(format!("SLOTWATCH_STALE_AFTER_SECS is not a number: {:?}", raw))
            })?;
            options = options.with_stale_after(Duration::from_secs(secs));
        }

        if let Some(raw) = lookup("SLOTWATCH_MAX_RECONNECT_ATTEMPTS") {
            let attempts = match raw.trim() {
                "unlimited" => None,
                n => Some(n.parse::<u32>().map_err(|_| {
                    Error::config(format!(
                        "SLOTWATCH_MAX_RECONNECT_ATTEMPTS is not a number: {:?}",
                        raw
                    ))
                })?),
            };
            options = options.with_max_reconnect_attempts(attempts);
        }

        Ok(Self {
            url,
            anon_key,
            options,
        })
    }
}
