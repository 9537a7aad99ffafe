pub mod assistant;
pub mod cli;
pub mod models;
pub mod parser;
pub mod repl;
pub mod server;
pub mod session;
pub mod store;

use cli::Args;
use log::info;
use server::Server;
use session::ConversationSession;
use std::error::Error;
use std::sync::Arc;
use store::{ MemoryThreadStore, ThreadStore };

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    args.validate()?;

    info!("--- Core Configuration ---");
    info!("Assistant API: {}", args.api_base_url);
    info!("Primary Assistant: {}", args.assistant_id.as_deref().unwrap_or("(none)"));
    info!("Course-List Assistant: {}", args.course_list_assistant_id.as_deref().unwrap_or("(none)"));
    info!("Run Poll Interval: {}ms", args.poll_interval_ms);
    info!("Run Max Wait: {}s", args.max_wait_secs);
    if !args.repl {
        info!("Thread TTL: {}s", args.thread_ttl_secs);
        info!("Server Address: {}", args.server_addr);
        info!("Rate Limit: {}/s per client", args.rate_limit_per_second);
        info!("TLS Enabled: {}", args.enable_tls);
    }
    info!("-------------------------");

    let client = assistant::new_client(&args.client_config())?;
    // the REPL keeps a single thread open for as long as it runs
    let thread_ttl = if args.repl { None } else { args.thread_ttl() };
    let store: Arc<dyn ThreadStore> = Arc::new(MemoryThreadStore::new(thread_ttl));
    let session = ConversationSession::new(client, Arc::clone(&store), args.session_config())?;

    let shutdown = server::install_signal_handler();
    store::spawn_sweeper(store, shutdown.clone());

    if args.repl {
        return repl::run(session, shutdown).await;
    }

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, session, args);
    server.run(shutdown).await?;

    Ok(())
}
