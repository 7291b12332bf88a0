use std::str::FromStr;

/// Configuration for [`FlagdClient`](crate::FlagdClient).
///
/// All fields have documented defaults and can also be supplied through `FLAGD_WEB_*`
/// environment variables (see [`FlagdOptions::from_env`]). Explicit builder calls take
/// precedence over environment values, which take precedence over defaults.
///
/// # Examples
/// ```
/// # use flagd_web::FlagdOptions;
/// let options = FlagdOptions::new()
///     .with_host("flagd.internal")
///     .with_cache(true)
///     .with_cache_ttl(60);
/// ```
#[derive(Debug, Clone)]
pub struct FlagdOptions {
    /// Host of the flagd service. Defaults to [`FlagdOptions::DEFAULT_HOST`].
    pub host: String,
    /// Port of the flagd service. Defaults to [`FlagdOptions::DEFAULT_PORT`].
    pub port: u16,
    /// Connect over https instead of http. Defaults to `false`.
    pub tls: bool,
    /// Number of reconnection attempts after the initial one. `0` disables retry. Defaults to
    /// [`FlagdOptions::DEFAULT_MAX_RETRIES`].
    pub max_retries: u32,
    /// Enable the resolution cache. Defaults to `false`.
    pub cache: bool,
    /// Cache entry time-to-live in seconds. `0` (the default) disables expiry.
    pub cache_ttl: u64,
    /// Cache size budget in bytes. `0` (the default) disables size-based eviction.
    pub cache_max_bytes: usize,
}

impl FlagdOptions {
    /// Default value for [`FlagdOptions::host`].
    pub const DEFAULT_HOST: &'static str = "localhost";
    /// Default value for [`FlagdOptions::port`].
    pub const DEFAULT_PORT: u16 = 8013;
    /// Default value for [`FlagdOptions::max_retries`].
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Create options with default values, ignoring the environment.
    pub fn new() -> FlagdOptions {
        FlagdOptions::default()
    }

    /// Create options from the environment, falling back to defaults.
    ///
    /// Recognized variables: `FLAGD_WEB_HOST`, `FLAGD_WEB_PORT`, `FLAGD_WEB_TLS`,
    /// `FLAGD_WEB_MAX_RETRIES`, `FLAGD_WEB_CACHE`, `FLAGD_WEB_CACHE_TTL`,
    /// `FLAGD_WEB_CACHE_MAX_BYTES`. A variable that is set but unparseable is ignored with a
    /// warning. Builder calls applied afterwards override environment values.
    pub fn from_env() -> FlagdOptions {
        let defaults = FlagdOptions::default();
        FlagdOptions {
            host: std::env::var("FLAGD_WEB_HOST").unwrap_or(defaults.host),
            port: env_parse("FLAGD_WEB_PORT").unwrap_or(defaults.port),
            tls: env_parse("FLAGD_WEB_TLS").unwrap_or(defaults.tls),
            max_retries: env_parse("FLAGD_WEB_MAX_RETRIES").unwrap_or(defaults.max_retries),
            cache: env_parse("FLAGD_WEB_CACHE").unwrap_or(defaults.cache),
            cache_ttl: env_parse("FLAGD_WEB_CACHE_TTL").unwrap_or(defaults.cache_ttl),
            cache_max_bytes: env_parse("FLAGD_WEB_CACHE_MAX_BYTES")
                .unwrap_or(defaults.cache_max_bytes),
        }
    }

    /// Override the flagd host.
    pub fn with_host(mut self, host: impl Into<String>) -> FlagdOptions {
        self.host = host.into();
        self
    }

    /// Override the flagd port.
    pub fn with_port(mut self, port: u16) -> FlagdOptions {
        self.port = port;
        self
    }

    /// Enable or disable tls.
    pub fn with_tls(mut self, tls: bool) -> FlagdOptions {
        self.tls = tls;
        self
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> FlagdOptions {
        self.max_retries = max_retries;
        self
    }

    /// Enable or disable the resolution cache.
    pub fn with_cache(mut self, cache: bool) -> FlagdOptions {
        self.cache = cache;
        self
    }

    /// Override the cache time-to-live, in seconds.
    pub fn with_cache_ttl(mut self, cache_ttl: u64) -> FlagdOptions {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Override the cache size budget, in bytes.
    pub fn with_cache_max_bytes(mut self, cache_max_bytes: usize) -> FlagdOptions {
        self.cache_max_bytes = cache_max_bytes;
        self
    }

    /// The service base url derived from host, port, and tls.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl Default for FlagdOptions {
    fn default() -> FlagdOptions {
        FlagdOptions {
            host: FlagdOptions::DEFAULT_HOST.to_owned(),
            port: FlagdOptions::DEFAULT_PORT,
            tls: false,
            max_retries: FlagdOptions::DEFAULT_MAX_RETRIES,
            cache: false,
            cache_ttl: 0,
            cache_max_bytes: 0,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!(target: "flagd", name, raw = raw.as_str(); "ignoring unparseable environment variable");
            None
        }
    }
}
