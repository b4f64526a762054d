use serde::Deserialize;

fn default_session_id() -> String {
    "0".to_string()
}

fn default_upstream() -> String {
    "https://api.openai.com".to_string()
}

fn default_completion_path() -> String {
    "/v1/chat/completions".to_string()
}

fn default_api_root() -> String {
    "/v1".to_string()
}

fn default_stream_chunk_size() -> usize {
    4096
}

fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_log_preview_chars() -> usize {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Session id used until the first control message arrives.
    #[serde(default = "default_session_id")]
    pub default_session_id: String,
    /// Upstream base URL used until the first control message arrives.
    #[serde(default = "default_upstream")]
    pub default_upstream: String,
    /// Path forwarded when the inbound request has an empty path. Streaming
    /// requests are always sent to this path on the upstream.
    #[serde(default = "default_completion_path")]
    pub default_completion_path: String,
    /// Versioned API root prepended to inbound paths that lack it.
    #[serde(default = "default_api_root")]
    pub api_root: String,
    /// Largest slice of upstream bytes relayed and scanned at once.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
    /// Carry partial lines across chunk boundaries when reassembling streams.
    #[serde(default)]
    pub line_buffered_capture: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_log_preview_chars")]
    pub log_preview_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_session_id: default_session_id(),
            default_upstream: default_upstream(),
            default_completion_path: default_completion_path(),
            api_root: default_api_root(),
            stream_chunk_size: default_stream_chunk_size(),
            line_buffered_capture: false,
            max_body_bytes: default_max_body_bytes(),
            log_preview_chars: default_log_preview_chars(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents)?;
        if config.stream_chunk_size == 0 {
            anyhow::bail!("stream_chunk_size must be greater than zero");
        }
        Ok(config)
    }
}
