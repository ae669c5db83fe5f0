use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Certificate;
use reqwest::redirect::Policy;

use crate::proxy::{ProxyError, ProxySettings};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);
pub const MAX_IDLE_PER_HOST: usize = 40;
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const MAX_POOLED_CONFIGURATIONS: usize = 16;

static GLOBAL_POOL: LazyLock<Arc<ClientPool>> = LazyLock::new(|| Arc::new(ClientPool::new()));
static DEFAULT_FACTORY: OnceLock<ClientFactory> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// Idle connection limits handed to the underlying pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolSettings {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: MAX_IDLE_PER_HOST,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

/// Connect, read and write timeouts.
///
/// Read and write are enforced as one bound on the whole exchange, so a body
/// that keeps streaming past `read` fails even though no single read stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: timeout,
            read: timeout,
            write: timeout,
        }
    }

    fn exchange(&self) -> Duration {
        self.read.max(self.write)
    }
}

/// Reject timeouts that would fail every request before it starts.
pub fn check_timeout(timeout: Duration) -> Result<Duration, ClientError> {
    if timeout.is_zero() {
        return Err(ClientError::ZeroTimeout);
    }
    Ok(timeout)
}

/// Everything that distinguishes one factory-built client from another.
///
/// Redirect following is always disabled and cannot be switched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientSettings {
    timeouts: Timeouts,
    proxy: Option<ProxySettings>,
    accept_invalid_hostnames: bool,
    root_certificates: Vec<Vec<u8>>,
    pool: PoolSettings,
}

impl ClientSettings {
    pub fn standard(timeout: Duration, proxy: Option<ProxySettings>) -> Self {
        Self {
            timeouts: Timeouts::uniform(timeout),
            proxy,
            accept_invalid_hostnames: false,
            root_certificates: Vec::new(),
            pool: PoolSettings::default(),
        }
    }

    /// Like [`ClientSettings::standard`], but the TLS layer accepts any
    /// certificate/hostname pairing. The certificate chain is still verified.
    pub fn secure(timeout: Duration, proxy: Option<ProxySettings>) -> Self {
        Self {
            accept_invalid_hostnames: true,
            ..Self::standard(timeout, proxy)
        }
    }

    pub fn with_pool_settings(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// Trust the PEM encoded certificates in addition to the built-in roots.
    pub fn with_root_certificates(mut self, pems: Vec<Vec<u8>>) -> Self {
        self.root_certificates = pems;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn accepts_invalid_hostnames(&self) -> bool {
        self.accept_invalid_hostnames
    }

    pub fn pool_settings(&self) -> PoolSettings {
        self.pool
    }

    pub fn follows_redirects(&self) -> bool {
        false
    }

    /// Build a fresh client with its own connection pool.
    ///
    /// Prefer [`ClientPool::get_or_build`] so that identical settings reuse
    /// established connections.
    pub fn build(&self) -> Result<Client, ClientError> {
        check_timeout(self.timeouts.connect)?;
        check_timeout(self.timeouts.exchange())?;
        tracing::debug!(
            connect_timeout_ms = self.timeouts.connect.as_millis() as u64,
            exchange_timeout_ms = self.timeouts.exchange().as_millis() as u64,
            proxy = ?self.proxy.as_ref().map(ProxySettings::url),
            max_idle_per_host = self.pool.max_idle_per_host,
            extra_roots = self.root_certificates.len(),
            "building HTTP client"
        );

        let mut builder = Client::builder()
            .connect_timeout(self.timeouts.connect)
            .timeout(self.timeouts.exchange())
            .redirect(Policy::none())
            .pool_max_idle_per_host(self.pool.max_idle_per_host)
            .pool_idle_timeout(self.pool.idle_timeout);

        builder = match &self.proxy {
            Some(proxy) => builder.proxy(proxy.to_proxy()?),
            None => builder.no_proxy(),
        };

        for pem in &self.root_certificates {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }

        if self.accept_invalid_hostnames {
            tracing::warn!("TLS hostname verification is disabled for this client");
            builder = builder.danger_accept_invalid_hostnames(true);
        }

        Ok(builder.build()?)
    }
}

/// Clients keyed by their settings. Clones of a [`Client`] share one
/// connection pool, so every caller asking for the same settings ends up on
/// the same pool.
///
/// At most `capacity` configurations are kept. Past that, clients are built
/// fresh and not retained.
#[derive(Debug)]
pub struct ClientPool {
    clients: Mutex<HashMap<ClientSettings, Client>>,
    capacity: usize,
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::with_capacity(MAX_POOLED_CONFIGURATIONS)
    }
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The pool shared by the whole process.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_POOL)
    }

    pub fn get_or_build(&self, settings: &ClientSettings) -> Result<Client, ClientError> {
        if let Some(client) = self.lock().get(settings) {
            return Ok(client.clone());
        }

        let client = settings.build()?;

        let mut clients = self.lock();
        if !clients.contains_key(settings) && clients.len() >= self.capacity {
            tracing::debug!(
                capacity = self.capacity,
                "client pool is full, returning an unshared client"
            );
            return Ok(client);
        }
        Ok(clients.entry(settings.clone()).or_insert(client).clone())
    }

    /// Number of distinct configurations, and therefore connection pools,
    /// currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientSettings, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Produces preconfigured clients backed by a shared [`ClientPool`].
#[derive(Debug, Clone)]
pub struct ClientFactory {
    timeout: Duration,
    proxy: Option<ProxySettings>,
    root_certificates: Vec<Vec<u8>>,
    pool_settings: PoolSettings,
    pool: Arc<ClientPool>,
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            root_certificates: Vec::new(),
            pool_settings: PoolSettings::default(),
            pool: ClientPool::global(),
        }
    }

    /// A factory using the proxy from `HTTP_PROXY_HOST` / `HTTP_PROXY_PORT`.
    pub fn from_env() -> Result<Self, ClientError> {
        Ok(Self::new().with_proxy(ProxySettings::from_env()?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_pool_settings(mut self, pool_settings: PoolSettings) -> Self {
        self.pool_settings = pool_settings;
        self
    }

    /// Trust an extra PEM encoded root certificate, e.g. an internal CA.
    pub fn with_root_certificate_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(pem.into());
        self
    }

    pub fn with_pool(mut self, pool: Arc<ClientPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    pub fn standard_settings(&self, timeout: Duration) -> ClientSettings {
        ClientSettings::standard(timeout, self.proxy.clone())
            .with_pool_settings(self.pool_settings)
            .with_root_certificates(self.root_certificates.clone())
    }

    pub fn secure_settings(&self, timeout: Duration) -> ClientSettings {
        ClientSettings::secure(timeout, self.proxy.clone())
            .with_pool_settings(self.pool_settings)
            .with_root_certificates(self.root_certificates.clone())
    }

    pub fn client(&self) -> Result<Client, ClientError> {
        self.client_with_timeout(self.timeout)
    }

    pub fn client_with_timeout(&self, timeout: Duration) -> Result<Client, ClientError> {
        self.obtain(self.standard_settings(check_timeout(timeout)?))
    }

    /// A client that accepts any certificate/hostname pairing.
    pub fn secure_client(&self) -> Result<Client, ClientError> {
        self.secure_client_with_timeout(self.timeout)
    }

    pub fn secure_client_with_timeout(&self, timeout: Duration) -> Result<Client, ClientError> {
        self.obtain(self.secure_settings(check_timeout(timeout)?))
    }

    /// Only the factory's own timeout goes through the shared pool; one-off
    /// timeouts get a client of their own.
    fn obtain(&self, settings: ClientSettings) -> Result<Client, ClientError> {
        if settings.timeouts() == Timeouts::uniform(self.timeout) {
            self.pool.get_or_build(&settings)
        } else {
            settings.build()
        }
    }
}

/// The process-wide factory: default timeout, proxy from the environment,
/// global pool. The environment is read once, on first successful use.
pub fn default_factory() -> Result<&'static ClientFactory, ClientError> {
    if let Some(factory) = DEFAULT_FACTORY.get() {
        return Ok(factory);
    }
    let factory = ClientFactory::from_env()?;
    Ok(DEFAULT_FACTORY.get_or_init(|| factory))
}

pub fn client() -> Result<Client, ClientError> {
    default_factory()?.client()
}

pub fn client_with_timeout(timeout: Duration) -> Result<Client, ClientError> {
    default_factory()?.client_with_timeout(timeout)
}

pub fn secure_client() -> Result<Client, ClientError> {
    default_factory()?.secure_client()
}
