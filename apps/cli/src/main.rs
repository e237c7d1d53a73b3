#![deny(warnings)]

//! Headless fleet server for one local session.
//!
//! Reads JSON requests from stdin, one per line, and writes replies and
//! broadcast updates to stdout as JSON lines. Sweeps run on a background
//! timer against the same database.

use anyhow::{Context, Result};
use fleet_core::{EngineConfig, OperatorId, SpaceId};
use fleet_runtime::gateway::parse_request;
use fleet_runtime::{Engine, Reply, Session, SystemClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    config: Option<String>,
    db: String,
    space: String,
    operator: String,
    name: Option<String>,
    admin: bool,
    tick_ms: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        db: persistence::default_sqlite_url().to_string(),
        space: fleet_core::DEFAULT_SPACE_ID.to_string(),
        operator: "local".to_string(),
        name: None,
        admin: false,
        tick_ms: 1000,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next(),
            "--db" => {
                if let Some(v) = it.next() {
                    args.db = v;
                }
            }
            "--space" => {
                if let Some(v) = it.next() {
                    args.space = v;
                }
            }
            "--operator" => {
                if let Some(v) = it.next() {
                    args.operator = v;
                }
            }
            "--name" => args.name = it.next(),
            "--admin" => args.admin = true,
            "--tick-ms" => {
                if let Some(ms) = it.next().and_then(|s| s.parse().ok()) {
                    args.tick_ms = ms;
                }
            }
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let cfg: EngineConfig =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {path}"))?;
    cfg.validate().with_context(|| format!("validating {path}"))?;
    Ok(cfg)
}

fn emit(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to encode output"),
    }
}

fn spawn_ticker(engine: Arc<Engine>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = engine.tick().await {
                warn!(error = %e, kind = e.kind(), "tick failed");
            }
        }
    })
}

fn spawn_forwarder(engine: &Engine, session: &Session) -> tokio::task::JoinHandle<()> {
    let mut space_rx = engine.broadcaster().subscribe_space(&session.space_id);
    let mut economy_rx = engine.broadcaster().subscribe_economy();
    let operator = session.operator_id.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = space_rx.recv() => match update {
                    Ok(update) => emit(&json!({ "type": "space:update", "data": update })),
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "space updates lagged"),
                    Err(RecvError::Closed) => break,
                },
                update = economy_rx.recv() => match update {
                    Ok(update) if update.operator_id == operator => {
                        emit(&json!({ "type": "economy:update", "data": update }))
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "economy updates lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    info!(git_sha = env!("GIT_SHA"), db = %args.db, space = %args.space, "starting fleet server");

    let cfg = load_config(args.config.as_deref())?;
    let pool = persistence::init_db(&args.db).await?;
    let engine = Arc::new(Engine::new(cfg, pool, Arc::new(SystemClock))?);

    let display_name = args.name.clone().unwrap_or_else(|| args.operator.clone());
    let session = Session::new(
        OperatorId::from(args.operator.as_str()),
        &display_name,
        SpaceId::from(args.space.as_str()),
    )
    .with_admin(args.admin);
    let session = engine.connect(session).await?;

    let ticker = spawn_ticker(engine.clone(), Duration::from_millis(args.tick_ms.max(50)));
    let forwarder = spawn_forwarder(&engine, &session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match parse_request(line) {
            Ok((request_id, request)) => {
                Reply::new(request_id, engine.handle(&session, request).await)
            }
            Err(e) => Reply::malformed(None, &e),
        };
        emit(&reply);
    }

    engine.disconnect(&session).await?;
    let saved = engine.checkpoint().await?;
    ticker.abort();
    forwarder.abort();
    info!(vessels = saved, "state saved, exiting");
    Ok(())
}
