use anyhow::Context;
use background_service::{Collaborators, Scheduler, SchedulerContext, StatusSnapshot};
use clap::Parser;
use database::Database;
use discovery::TermOptions;
use serde::Serialize;
use sourcebot_core::{AppConfig, CoreError, ErrorReporter};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tumblr_client::{RateLimitStatus, TumblrApiClient};

const DEFAULT_CONFIG: &str = "sourcebot.toml";

#[derive(Parser, Debug)]
#[command(name = "sourcebot", version, about = "Tag-driven post discovery for Tumblr blogs")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting SourceBot");
    let reporter = ErrorReporter::new();

    let mut db = Database::new(config.database.url.clone())
        .with_max_connections(config.database.max_connections);
    if let Err(e) = open_database(&mut db).await {
        eprintln!("{}", reporter.crash_report("Unable to open the blog database", &e));
        std::process::exit(1);
    }
    let db = Arc::new(db);

    let client = match TumblrApiClient::new(&config.tumblr) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", reporter.crash_report("Unable to create the Tumblr client", &e));
            db.close().await;
            std::process::exit(1);
        }
    };

    let options = TermOptions {
        cache_ttl: config.scheduler.cache_ttl(),
        retry: config.retry.policy(),
    };
    let client = Arc::new(client);
    let deps = Collaborators::from_backend(db.clone(), client.clone(), options);
    let ctx = SchedulerContext::new(CancellationToken::new());
    let mut scheduler = Scheduler::new(ctx.clone(), deps, &config.scheduler);

    let input = spawn_input_reader(std::io::BufReader::new(std::io::stdin()));
    tokio::spawn(console(ctx.clone(), client, input));
    tokio::spawn(stop_on_ctrl_c(ctx.clone()));

    let outcome = tokio::spawn(async move { scheduler.run().await }).await;
    ctx.stop();

    if let Err(e) = outcome {
        let error = CoreError::Internal {
            message: e.to_string(),
        };
        eprintln!("{}", reporter.crash_report("Scheduler terminated unexpectedly", &error));
        db.close().await;
        std::process::exit(1);
    }

    db.close().await;
    info!("SourceBot stopped");
    Ok(())
}

/// A missing default config file is not an error; everything then comes
/// from defaults and the environment.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() || path != Path::new(DEFAULT_CONFIG) {
        return AppConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }

    let mut config = AppConfig::default();
    config.apply_env(|name| std::env::var(name).ok());
    config.validate().context("invalid default configuration")?;
    Ok(config)
}

async fn open_database(db: &mut Database) -> Result<(), CoreError> {
    db.connect().await?;
    db.run_migrations().await
}

/// Reads operator input on a plain thread outside the runtime. A blocking
/// read there never holds up runtime shutdown, and the thread dies with the
/// process.
fn spawn_input_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || forward_lines(reader, tx));
    if let Err(e) = spawned {
        warn!("Console disabled, unable to start input thread: {}", e);
    }
    rx
}

fn forward_lines<R: BufRead>(reader: R, tx: mpsc::Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Console input closed: {}", e);
                break;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Empty,
    Status,
    Stop,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "status" => Command::Status,
            "stop" | "quit" | "exit" => Command::Stop,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ConsoleStatus {
    scheduler: StatusSnapshot,
    rate_limit: RateLimitStatus,
}

async fn console(
    ctx: SchedulerContext,
    client: Arc<TumblrApiClient>,
    mut input: mpsc::Receiver<String>,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => break,
            line = input.recv() => line,
        };
        let Some(line) = line else { break };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Stop => {
                info!("Stop requested from console");
                ctx.stop();
            }
            Command::Status => {
                let status = ConsoleStatus {
                    scheduler: ctx.snapshot().await,
                    rate_limit: client.get_rate_limit_status().await,
                };
                match serde_json::to_string_pretty(&status) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("Unable to render status: {}", e),
                }
            }
            Command::Unknown(other) => {
                warn!("Unknown command '{}', expected status or stop", other)
            }
        }
    }
}

async fn stop_on_ctrl_c(ctx: SchedulerContext) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Interrupt received, stopping");
            ctx.stop();
        }
        Err(e) => warn!("Unable to listen for interrupt: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcebot_core::TumblrConfig;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    fn client() -> Arc<TumblrApiClient> {
        let config = TumblrConfig {
            api_key: Some("consumer-key".to_string()),
            ..TumblrConfig::default()
        };
        Arc::new(TumblrApiClient::new(&config).unwrap())
    }

    /// Input that never produces a byte while its sender is alive.
    struct StalledInput(std::sync::mpsc::Receiver<Vec<u8>>);

    impl Read for StalledInput {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.recv() {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("  status\n"), Command::Status);
        assert_eq!(Command::parse("quit"), Command::Stop);
        assert_eq!(Command::parse("exit"), Command::Stop);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("go"), Command::Unknown("go".to_string()));
    }

    #[test]
    fn test_forward_lines_stops_at_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(Cursor::new("status\nstop\n"), tx);

        assert_eq!(rx.blocking_recv().as_deref(), Some("status"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("stop"));
        assert_eq!(rx.blocking_recv(), None);
    }

    #[test]
    fn test_forward_lines_stops_when_console_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        forward_lines(Cursor::new("status\nstatus\n"), tx);
    }

    #[tokio::test]
    async fn test_stop_command_cancels_scheduler() {
        let ctx = SchedulerContext::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send("status".to_string()).await.unwrap();
        tx.send("  stop ".to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), console(ctx.clone(), client(), rx))
            .await
            .expect("console did not return after stop");
        assert!(ctx.is_stopped());
    }

    #[tokio::test]
    async fn test_console_returns_on_cancel_with_input_open() {
        let ctx = SchedulerContext::default();
        let (_tx, rx) = mpsc::channel::<String>(4);
        let handle = tokio::spawn(console(ctx.clone(), client(), rx));

        ctx.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("console ignored cancellation")
            .unwrap();
    }

    #[test]
    fn test_runtime_shutdown_not_blocked_by_pending_input() {
        let (_keep_open, stalled) = std::sync::mpsc::channel::<Vec<u8>>();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let ctx = SchedulerContext::default();
            let input = spawn_input_reader(std::io::BufReader::new(StalledInput(stalled)));
            let handle = runtime.spawn(console(ctx.clone(), client(), input));

            ctx.stop();
            runtime.block_on(handle).unwrap();
            drop(runtime);
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "runtime shutdown waited on console input"
        );
    }
}
