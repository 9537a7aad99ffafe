use clap::Parser;
use std::error::Error;
use std::time::Duration;
use url::Url;

use crate::assistant::ClientConfig;
use crate::session::SessionConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Assistant Service Args ---
    /// API key for the remote assistant service.
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Primary chat assistant id. Its replies are parsed as sectioned course lists.
    #[arg(long, env = "ASSISTANT_ID")]
    pub assistant_id: Option<String>,

    /// Course-list assistant id. Its replies are parsed as flat bulleted lists.
    #[arg(long, env = "COURSE_LIST_ASSISTANT_ID")]
    pub course_list_assistant_id: Option<String>,

    /// Base URL of the assistant API.
    #[arg(long, env = "ASSISTANT_API_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub api_base_url: String,

    /// Timeout in seconds for a single call to the assistant API.
    #[arg(long, env = "ASSISTANT_REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub request_timeout_secs: u64,

    // --- Run Polling Args ---
    /// Delay between run status checks, in milliseconds.
    #[arg(long, env = "RUN_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Give up on a run after this many seconds. 0 waits indefinitely.
    #[arg(long, env = "RUN_MAX_WAIT_SECS", default_value = "300")]
    pub max_wait_secs: u64,

    /// Forget idle conversation threads after this many seconds. 0 keeps them forever.
    #[arg(long, env = "THREAD_TTL_SECS", default_value = "3600")]
    pub thread_ttl_secs: u64,

    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:5000")]
    pub server_addr: String,

    /// Browser origin allowed by CORS. Any origin when unset.
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Requests accepted per second from each client address. 0 disables the limit.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Chat in the terminal instead of starting the HTTP server.
    #[arg(long, default_value = "false")]
    pub repl: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Args {
    /// Checks everything that must hold before the process starts serving.
    pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY is required".into());
        }
        if non_empty(&self.assistant_id).is_none() && non_empty(&self.course_list_assistant_id).is_none() {
            return Err("At least one of ASSISTANT_ID or COURSE_LIST_ASSISTANT_ID is required".into());
        }
        let url = Url::parse(&self.api_base_url).map_err(|e|
            format!("Invalid assistant API base URL '{}': {}", self.api_base_url, e)
        )?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("Assistant API base URL must be http(s): {}", self.api_base_url).into());
        }
        if self.poll_interval_ms == 0 {
            return Err("RUN_POLL_INTERVAL_MS must be greater than zero".into());
        }
        if self.enable_tls && (self.tls_cert_path.is_none() || self.tls_key_path.is_none()) {
            return Err("Both --tls-cert-path and --tls-key-path must be provided to enable TLS".into());
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.trim().to_string(),
            base_url: Some(self.api_base_url.clone()),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            primary_assistant_id: non_empty(&self.assistant_id),
            course_list_assistant_id: non_empty(&self.course_list_assistant_id),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs)),
        }
    }

    pub fn thread_ttl(&self) -> Option<Duration> {
        (self.thread_ttl_secs > 0).then(|| Duration::from_secs(self.thread_ttl_secs))
    }
}
