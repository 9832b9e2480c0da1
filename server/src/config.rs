//! Server configuration (§3, §6's "Configuration recognized options").
//!
//! Configuration is immutable after construction, matching `ListenerConfig`
//! in the teacher's `src/listener.rs`/`src/multilistener.rs`: a plain
//! struct built up through a builder rather than parsed from an external
//! config-file format.

use std::time::Duration;

/// Immutable server configuration, built via [`ConfigBuilder`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls_enable: bool,
    pub(crate) tls_cert: Option<String>,
    pub(crate) tls_key: Option<String>,
    pub(crate) public_path: Option<String>,
    pub(crate) request_timeout: Duration,
    pub(crate) connection_timeout: Duration,
    pub(crate) max_connections: usize,
    pub(crate) max_request_size: usize,
    pub(crate) buffer_size: usize,
    pub(crate) keep_alive_enable: bool,
    pub(crate) keep_alive_timeout: Duration,
    pub(crate) keep_alive_max_requests: u64,
    pub(crate) static_cache_enable: bool,
    pub(crate) static_cache_size: usize,
    pub(crate) static_cache_max_entries: usize,
    pub(crate) cache_eligible_max_bytes: usize,
    pub(crate) rate_limit_enable: bool,
    pub(crate) rate_limit_requests: usize,
    pub(crate) rate_limit_window: Duration,
    pub(crate) max_accepts_per_cycle: usize,
    pub(crate) debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

impl Config {
    /// Starts building a [`Config`] with documented defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Host/address the listener binds to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the listener binds to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether TLS termination is enabled.
    pub fn tls_enable(&self) -> bool {
        self.tls_enable
    }

    /// Path to the PEM-encoded TLS certificate chain, if TLS is enabled.
    pub fn tls_cert(&self) -> Option<&str> {
        self.tls_cert.as_deref()
    }

    /// Path to the PEM-encoded TLS private key, if TLS is enabled.
    pub fn tls_key(&self) -> Option<&str> {
        self.tls_key.as_deref()
    }

    /// Root directory the static file handler serves from, if attached.
    pub fn public_path(&self) -> Option<&str> {
        self.public_path.as_deref()
    }

    /// Deadline from a request's first byte to its headers+body being
    /// fully framed.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Idle deadline since a connection's last activity.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Hard cap on the number of live connections in the pool.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Maximum accepted `Content-Length`, in bytes.
    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    /// Per-connection read buffer size, in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether keep-alive connection reuse is enabled.
    pub fn keep_alive_enable(&self) -> bool {
        self.keep_alive_enable
    }

    /// Keep-alive idle timeout advertised to clients.
    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    /// Maximum requests served on one keep-alive connection.
    pub fn keep_alive_max_requests(&self) -> u64 {
        self.keep_alive_max_requests
    }

    /// Whether the static file LRU cache is enabled.
    pub fn static_cache_enable(&self) -> bool {
        self.static_cache_enable
    }

    /// Total byte bound for the static file cache.
    pub fn static_cache_size(&self) -> usize {
        self.static_cache_size
    }

    /// Total entry-count bound for the static file cache.
    pub fn static_cache_max_entries(&self) -> usize {
        self.static_cache_max_entries
    }

    /// Per-file size above which a file is never cached, only streamed.
    /// See Open Question resolution #2 in `DESIGN.md`.
    pub fn cache_eligible_max_bytes(&self) -> usize {
        self.cache_eligible_max_bytes
    }

    /// Whether the sliding-window rate limiter is enabled.
    pub fn rate_limit_enable(&self) -> bool {
        self.rate_limit_enable
    }

    /// Requests allowed per client within `rate_limit_window`.
    pub fn rate_limit_requests(&self) -> usize {
        self.rate_limit_requests
    }

    /// The rate limiter's sliding window duration.
    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    /// Maximum accepts performed within one `has_request()` tick.
    pub fn max_accepts_per_cycle(&self) -> usize {
        self.max_accepts_per_cycle
    }

    /// Whether verbose debug-level logging is enabled.
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

/// Builder for [`Config`]. Every option has a documented default so a host
/// can opt into only the settings it cares about.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    inner: Config,
    cache_eligible_override: Option<usize>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Starts a builder with the server's documented defaults.
    pub fn new() -> Self {
        Self {
            inner: Config {
                host: "0.0.0.0".to_string(),
                port: 8080,
                tls_enable: false,
                tls_cert: None,
                tls_key: None,
                public_path: None,
                request_timeout: Duration::from_secs(30),
                connection_timeout: Duration::from_secs(60),
                max_connections: 1024,
                max_request_size: 10 * 1024 * 1024,
                buffer_size: 16 * 1024,
                keep_alive_enable: true,
                keep_alive_timeout: Duration::from_secs(5),
                keep_alive_max_requests: 100,
                static_cache_enable: true,
                static_cache_size: 50 * 1024 * 1024,
                static_cache_max_entries: 1024,
                cache_eligible_max_bytes: 5 * 1024 * 1024,
                rate_limit_enable: false,
                rate_limit_requests: 100,
                rate_limit_window: Duration::from_secs(60),
                max_accepts_per_cycle: 64,
                debug_mode: false,
            },
            cache_eligible_override: None,
        }
    }

    /// Sets the bind host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.inner.host = host.into();
        self
    }

    /// Sets the bind port.
    pub fn port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    /// Enables TLS and sets the certificate and private key paths.
    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.inner.tls_enable = true;
        self.inner.tls_cert = Some(cert_path.into());
        self.inner.tls_key = Some(key_path.into());
        self
    }

    /// Enables the static file handler, rooted at `path`.
    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.inner.public_path = Some(path.into());
        self
    }

    /// Sets the per-request read deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner.request_timeout = timeout;
        self
    }

    /// Sets the idle connection deadline.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connection_timeout = timeout;
        self
    }

    /// Sets the maximum number of live connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.inner.max_connections = n;
        self
    }

    /// Sets the maximum accepted request body size.
    pub fn max_request_size(mut self, n: usize) -> Self {
        self.inner.max_request_size = n;
        self
    }

    /// Sets the per-connection read buffer size.
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.inner.buffer_size = n;
        self
    }

    /// Configures keep-alive policy.
    pub fn keep_alive(mut self, enable: bool, timeout: Duration, max_requests: u64) -> Self {
        self.inner.keep_alive_enable = enable;
        self.inner.keep_alive_timeout = timeout;
        self.inner.keep_alive_max_requests = max_requests;
        self
    }

    /// Configures the static file cache bounds.
    pub fn static_cache(mut self, enable: bool, size_bytes: usize, max_entries: usize) -> Self {
        self.inner.static_cache_enable = enable;
        self.inner.static_cache_size = size_bytes;
        self.inner.static_cache_max_entries = max_entries;
        self
    }

    /// Overrides the per-file cache eligibility threshold. Defaults to 10%
    /// of `static_cache_size` if left unset.
    pub fn cache_eligible_max_bytes(mut self, n: usize) -> Self {
        self.cache_eligible_override = Some(n);
        self
    }

    /// Configures the sliding-window rate limiter.
    pub fn rate_limit(mut self, enable: bool, requests: usize, window: Duration) -> Self {
        self.inner.rate_limit_enable = enable;
        self.inner.rate_limit_requests = requests;
        self.inner.rate_limit_window = window;
        self
    }

    /// Sets the per-tick accept fairness cap.
    pub fn max_accepts_per_cycle(mut self, n: usize) -> Self {
        self.inner.max_accepts_per_cycle = n;
        self
    }

    /// Enables verbose debug-level logging.
    pub fn debug_mode(mut self, enable: bool) -> Self {
        self.inner.debug_mode = enable;
        self
    }

    /// Finishes the builder, producing an immutable [`Config`].
    pub fn build(mut self) -> Config {
        self.inner.cache_eligible_max_bytes = self
            .cache_eligible_override
            .unwrap_or(self.inner.static_cache_size / 10);
        self.inner
    }
}
