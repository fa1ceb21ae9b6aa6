// src/main.rs
//! Headless demo host.
//!
//! Resolves the engine, creates one headless view, runs the host loop for a
//! few seconds (first argument, default 2) and shuts down.

use anyhow::{bail, Context};
use engine_surface_bridge::channel::GET_PLATFORM_VERSION;
use engine_surface_bridge::scheduler::ThreadRefreshSource;
use engine_surface_bridge::view::HeadlessSurfaceFactory;
use engine_surface_bridge::{
    BridgeContext, Config, EngineApi, EnginePlugin, EntryPointTable, HostLoop, MethodCall,
    RenderScheduler, SerializedEngine, ViewEvent, ViewGeometry,
};
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEMO_VIEW_ID: i64 = 1;
const DEFAULT_RUN_SECS: u64 = 2;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting engine-surface-bridge...");

    let run_time = Duration::from_secs(match std::env::args().nth(1) {
        Some(arg) => arg.parse().unwrap_or_else(|_| {
            warn!("Ignoring run time '{}', using {}s", arg, DEFAULT_RUN_SECS);
            DEFAULT_RUN_SECS
        }),
        None => DEFAULT_RUN_SECS,
    });

    let config = Arc::new(Config::load_or_default().context("Failed to load configuration")?);

    let symbols = EntryPointTable::shared();
    symbols.resolve(
        &config.symbols.library_candidates,
        config.symbols.fallback_to_process,
    );

    let engine: Arc<dyn EngineApi> = Arc::new(SerializedEngine::new(Arc::clone(&symbols)));
    let refresh = ThreadRefreshSource::new(config.scheduler.refresh_rate());
    let scheduler = Arc::new(RenderScheduler::new(
        Arc::clone(&engine),
        Box::new(refresh),
        config.scheduler.poll_interval(),
    ));
    let context = BridgeContext {
        engine,
        scheduler: Arc::clone(&scheduler),
        config: Arc::clone(&config),
    };
    let plugin = EnginePlugin::new(context, symbols, Arc::new(HeadlessSurfaceFactory::new()));
    let (mut host, handle) = HostLoop::new(plugin);

    // Stand-in for the host UI: drives the loop from another thread.
    let ui = thread::Builder::new()
        .name("host-ui".to_string())
        .spawn(move || -> anyhow::Result<()> {
            handle.create_view(DEMO_VIEW_ID, Value::Null)?;
            handle.view_event(
                DEMO_VIEW_ID,
                ViewEvent::Attach(ViewGeometry::new(800.0, 600.0, 2.0)),
            )?;
            let version = handle.call(
                MethodCall::new(GET_PLATFORM_VERSION, Value::Null),
                REPLY_TIMEOUT,
            )?;
            info!("Host platform: {:?}", version);

            thread::sleep(run_time);
            handle.view_event(DEMO_VIEW_ID, ViewEvent::Detach)?;
            handle.shutdown()
        })
        .context("Failed to spawn host UI thread")?;

    host.run().context("Host loop failed")?;

    match ui.join() {
        Ok(result) => result?,
        Err(_) => bail!("Host UI thread panicked"),
    }

    info!(
        "engine-surface-bridge exited: {} ticks dispatched, {} completed",
        scheduler.stats().dispatched(),
        scheduler.stats().completed()
    );
    Ok(())
}
