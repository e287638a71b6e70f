//! Demo daemon wiring the session pipeline, cache, store, and dispatcher
//! into one running process (← teacher `apps/desktop/src-tauri`'s
//! "construct everything in `main`, hand shared state to a background
//! task" shape; the Tauri shell itself is dropped, see DESIGN.md).
//!
//! This binary has no real network listener (spec.md §1 puts that out of
//! scope): it builds one synthetic session via [`demo_adapter::DemoAdapter`]
//! and drives `client_count` [`dispatch::ClientDispatcher`]s against it
//! through an in-process [`demo_transport::ScriptedTransport`], which is
//! enough to exercise load-once, progress fan-out, late joiners, and paced
//! playback end to end without a socket.

mod config;
mod demo_adapter;
mod demo_transport;

use std::sync::Arc;

use clap::Parser;
use model::{SessionKey, SessionType};

use cache::SessionCache;
use config::ReplayConfig;
use demo_adapter::{DemoAdapter, DemoAdapterConfig};
use demo_transport::ScriptedTransport;
use dispatch::ClientDispatcher;
use ingest_core::RawAdapter;
use store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "replay-server")]
#[command(about = "Race-replay streaming server (demo: synthetic session, in-process clients)")]
struct Cli {
    #[arg(long, default_value_t = 2024)]
    year: u32,

    #[arg(long, default_value_t = 1)]
    round: u32,

    #[arg(long, default_value = "R")]
    session_type: String,

    #[arg(long, default_value_t = 8)]
    drivers: u32,

    #[arg(long, default_value_t = 3)]
    laps: u32,

    #[arg(long, default_value_t = 2)]
    clients: u32,

    /// Force a full rebuild even if a cached session exists on disk.
    #[arg(long, default_value_t = false)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "replay_server=info,dispatch=info,store=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ReplayConfig::from_env();

    let session_type = SessionType::parse(&cli.session_type)
        .ok_or_else(|| anyhow::anyhow!("unrecognized session type {:?}", cli.session_type))?;
    let key = SessionKey::new(cli.year, cli.round, session_type);

    tracing::info!(?key, cache_dir = %config.cache_dir, "replay-server: starting");

    let store = Arc::new(SessionStore::new());
    let cache = Arc::new(SessionCache::new(config.cache_dir.clone()));

    let adapter_config = DemoAdapterConfig {
        driver_count: cli.drivers,
        laps: cli.laps,
        ..DemoAdapterConfig::default()
    };
    let build_config = config.build;
    let refresh = cli.refresh;

    let cache_for_loader = cache.clone();
    let entry = store
        .get_or_create(key, move |session| async move {
            run_loader(session, cache_for_loader, adapter_config, build_config, refresh).await
        })
        .await;

    let mut handles = Vec::new();
    for client_id in 0..cli.clients {
        let entry = entry.clone();
        handles.push(tokio::spawn(async move {
            let script = vec![r#"{"action":"play","speed":1.0}"#.to_string()];
            let transport = ScriptedTransport::new(script, 500);
            let dispatcher = ClientDispatcher::new(entry, transport);
            if let Err(err) = dispatcher.run().await {
                tracing::warn!(client_id, error = %err, "replay-server: client dispatcher exited with an error");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("replay-server: demo run complete");
    Ok(())
}

/// The `loader` passed to [`SessionStore::get_or_create`]: resolve through
/// the two-tier cache, then publish or fail the session. Progress fan-out
/// to subscribers is handled by the store itself (see
/// `store::SessionStore::fan_out_progress`); this function only has to
/// drive `Session::set_progress`.
async fn run_loader(
    session: Arc<model::Session>,
    cache: Arc<SessionCache>,
    adapter_config: DemoAdapterConfig,
    build_config: pipeline::BuildConfig,
    refresh: bool,
) {
    let key = session.key;
    session.set_progress(5, "fetching raw streams");

    let result = cache
        .get_cached(key, refresh, move |key| async move {
            let adapter: Box<dyn RawAdapter> = Box::new(DemoAdapter::new(adapter_config));
            pipeline::build_session(adapter.as_ref(), &key, build_config)
                .await
                .map_err(anyhow::Error::from)
        })
        .await;

    match result {
        Ok(data) => {
            session.set_progress(95, "publishing session");
            tracing::info!(?key, frames = data.frames.len(), "replay-server: session built");
            session.publish((*data).clone());
        }
        Err(err) => {
            tracing::error!(?key, error = %err, "replay-server: session load failed");
            session.fail(err.to_string());
        }
    }
}
