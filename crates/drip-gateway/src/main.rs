use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use drip_core::config::DripConfig;
use drip_packs::PackRegistry;
use tracing::{error, info};

mod app;
mod auth;
mod http;
mod worker_client;

/// sysexits EX_TEMPFAIL: storage was busy, try again next minute.
const EXIT_BUSY: u8 = 75;

#[derive(Parser)]
#[command(name = "drip-gateway", version, about = "Drip email scheduler")]
struct Cli {
    /// Config file (falls back to DRIP_CONFIG, then ~/.drip/drip.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the trigger, worker and health endpoints (default).
    Serve,
    /// Run one scheduler invocation in-process and print its summary.
    Tick {
        /// Evaluate due-ness at this RFC 3339 instant instead of now.
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
        /// Elapsed-minutes mode: due N minutes after the last step, cron ignored.
        #[arg(long)]
        step_minutes: Option<u32>,
    },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("not an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drip_gateway=info,drip_scheduler=info,drip_mail=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > DRIP_CONFIG env > ~/.drip/drip.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("DRIP_CONFIG").ok());
    let config = DripConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        DripConfig::default()
    });
    config.validate()?;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    // short wait; longer contention surfaces as BUSY and is retried by the controller
    conn.busy_timeout(Duration::from_millis(500))?;

    let packs = PackRegistry::load_dir(&config.packs.dir)?;
    let state = Arc::new(app::AppState::build(config, conn, packs)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Tick { now, step_minutes } => tick(&state, now, step_minutes).await,
    }
}

async fn serve(state: Arc<app::AppState>) -> anyhow::Result<ExitCode> {
    let addr: SocketAddr =
        format!("{}:{}", state.config.server.bind, state.config.server.port).parse()?;
    let router = app::build_router(state);

    info!("Drip gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(ExitCode::SUCCESS)
}

async fn tick(
    state: &app::AppState,
    now: Option<DateTime<Utc>>,
    step_minutes: Option<u32>,
) -> anyhow::Result<ExitCode> {
    let now = now.unwrap_or_else(Utc::now);
    let step_minutes = step_minutes.or(state.config.scheduler.step_minutes_override);

    match state.controller.run(now, step_minutes).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_busy() => {
            error!("{e}");
            println!("{}", serde_json::json!({"error": e.code(), "message": e.to_string()}));
            Ok(ExitCode::from(EXIT_BUSY))
        }
        Err(e) => Err(e.into()),
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_accepts_rfc3339_now() {
        let cli = Cli::try_parse_from([
            "drip-gateway",
            "tick",
            "--now",
            "2026-02-01T08:01:00+01:00",
            "--step-minutes",
            "3",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Tick { now, step_minutes }) => {
                assert_eq!(now.unwrap().to_rfc3339(), "2026-02-01T07:01:00+00:00");
                assert_eq!(step_minutes, Some(3));
            }
            _ => panic!("expected tick"),
        }
    }

    #[test]
    fn bad_instant_is_rejected() {
        assert!(Cli::try_parse_from(["drip-gateway", "tick", "--now", "yesterday"]).is_err());
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["drip-gateway", "--config", "drip.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.as_deref(), Some("drip.toml"));
    }
}
