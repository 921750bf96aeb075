use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default inactivity window before a session's assignment is reclaimed.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Usernames longer than this are truncated.
pub const DEFAULT_MAX_USERNAME_LEN: usize = 50;

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub session_timeout: Duration,
    pub max_username_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

/// Connection settings for the remote durable tier.
///
/// The remote tier is a Gist-style document store: one resource holding one
/// file whose content is the serialized state envelope.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Bearer token sent with every request.
    pub token: String,
    /// Identifier of the remote resource (e.g. the gist id).
    pub resource_id: String,
    /// API base URL, without trailing slash.
    pub api_base: String,
    /// Name of the file inside the resource that holds the state.
    pub file_name: String,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://api.github.com";
    pub const DEFAULT_FILE_NAME: &'static str = "review_state.json";

    /// Build a remote config from the two required values.
    ///
    /// Returns `None` when either is absent or blank, which disables the
    /// remote tier entirely.
    pub fn from_parts(token: Option<String>, resource_id: Option<String>) -> Option<Self> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        let resource_id = resource_id.filter(|r| !r.trim().is_empty())?;
        Some(Self {
            token: token.trim().to_string(),
            resource_id: resource_id.trim().to_string(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            file_name: Self::DEFAULT_FILE_NAME.to_string(),
            request_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub local_path: PathBuf,
    pub remote: Option<RemoteConfig>,
    /// How long a shutdown flush waits for the remote tier.
    pub flush_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            local_path: PathBuf::from("shared_state.json"),
            remote: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            ..Self::default()
        }
    }

    pub fn with_remote(mut self, remote: Option<RemoteConfig>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub catalog_path: PathBuf,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            catalog_path: PathBuf::from("items.csv"),
            coordinator: CoordinatorConfig::default(),
            store: StoreConfig::default(),
        }
    }
}
