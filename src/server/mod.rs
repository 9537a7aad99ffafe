pub mod api;

use crate::cli::Args;
use crate::session::ConversationSession;
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

pub struct Server {
    addr: String,
    session: ConversationSession,
    args: Args,
}

impl Server {
    pub fn new(addr: String, session: ConversationSession, args: Args) -> Self {
        if args.cors_origin.is_none() {
            warn!("CORS_ORIGIN not set. Browser requests from any origin are accepted.");
        }
        Self { addr, session, args }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid server address '{}': {}", self.addr, e))?;
        let app = api::router(
            self.session.clone(),
            self.args.cors_origin.as_deref(),
            self.args.rate_limit_per_second,
            shutdown.clone()
        )?;

        let tls = match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (true, _, _) => {
                return Err("TLS enabled without cert/key".into());
            }
            _ => None,
        };

        api::serve(addr, app, tls, shutdown).await
    }
}

/// Returns a token that is cancelled on Ctrl+C or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{ signal, SignalKind };
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }

        trigger.cancel();
    });

    token
}
