//! RTT Viewer - command line control surface

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rtt_viewer::{
    config::{Args, Command, TargetArgs},
    flash::FlashManager,
    rtt::LogCursor,
    store::{self, ConfigStore, TomlConfigStore},
    targets,
    Config, ConnectRequest, DebugAdapter, ProbeRsAdapter, RttSession, SessionState,
};

/// How often new log text is copied to the terminal
const RENDER_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut config = Config::load(args.config.as_ref()).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config.merge_args(&args);
    config.validate()?;

    init_logging(&config)?;
    info!("Starting RTT Viewer v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let store = TomlConfigStore::open(&config.store.path);
    let adapter: Arc<dyn DebugAdapter> = Arc::new(ProbeRsAdapter::new());

    let command = args.command.clone().unwrap_or(Command::Rtt {
        target: TargetArgs::default(),
        elf: None,
        control_block: None,
        up: None,
        down: None,
        poll_interval: None,
    });

    match command {
        Command::List { json } => list_probes(adapter.as_ref(), json),
        Command::Targets { pack, filter, select, json } => {
            let pack = store::remembered_path(&store, store::PACK_PATH, pack.as_deref());
            browse_targets(adapter.as_ref(), &store, pack.as_deref(), filter.as_deref(), select.as_deref(), json)
        }
        Command::Rtt { target, elf, .. } => {
            let request = connect_request(&store, &target);
            run_rtt(adapter, &config, request, elf).await
        }
        Command::Erase { target } => {
            let request = connect_request(&store, &target);
            erase(adapter, &config, request).await
        }
        Command::Load { target, file, base_address } => {
            let request = connect_request(&store, &target);
            let file = store::remembered_path(&store, store::BIN_PATH, file.as_deref()).unwrap_or_default();
            let base_address = base_address.unwrap_or(config.flash.base_address);
            load(adapter, &config, request, file, base_address).await
        }
    }
}

/// Initialize logging system
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false);

    // stdout carries the RTT stream, so logs never go there
    if let Some(log_file) = &config.logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("cannot open log file {}", log_file.display()))?;

        subscriber.with_writer(file).init();
        eprintln!("Logging to file: {}", log_file.display());
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", config.logging.level);
    Ok(())
}

/// Target and pack from the command line, falling back to the last ones used
fn connect_request(store: &dyn ConfigStore, target: &TargetArgs) -> ConnectRequest {
    let target_name = store::remembered(store, store::TARGET_NAME, target.target.as_deref());
    let pack_path = store::remembered_path(store, store::PACK_PATH, target.pack.as_deref());

    ConnectRequest::from_parts(target_name, pack_path)
}

fn browse_targets(
    adapter: &dyn DebugAdapter,
    store: &dyn ConfigStore,
    pack: Option<&Path>,
    filter: Option<&str>,
    select: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(name) = select {
        let chosen = targets::select(adapter, store, pack, name)?;
        eprintln!("Target {} selected", chosen.name);
        return Ok(());
    }

    let found = targets::browse(adapter, pack, filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    println!(
        "{:<24} {:<24} {:<12} {:<24} {}",
        "Name", "Vendor", "Part Number", "Families", "Source"
    );
    for target in &found {
        println!(
            "{:<24} {:<24} {:<12} {:<24} {}",
            target.name,
            target.vendor,
            target.part_number.as_deref().unwrap_or("-"),
            target.family,
            target.source
        );
    }
    eprintln!("{} targets", found.len());
    Ok(())
}

fn list_probes(adapter: &dyn DebugAdapter, json: bool) -> anyhow::Result<()> {
    let probes = adapter.discover_probes();

    if json {
        println!("{}", serde_json::to_string_pretty(&probes)?);
        return Ok(());
    }

    if probes.is_empty() {
        eprintln!("No available debug probes are connected");
        return Ok(());
    }

    for (i, probe) in probes.iter().enumerate() {
        println!(
            "{}. {} [{}] (VID:PID = {:04X}:{:04X})",
            i, probe.description, probe.unique_id, probe.vendor_id, probe.product_id
        );
    }
    Ok(())
}

async fn run_rtt(
    adapter: Arc<dyn DebugAdapter>,
    config: &Config,
    request: ConnectRequest,
    elf: Option<PathBuf>,
) -> anyhow::Result<()> {
    let session = Arc::new(RttSession::new(adapter, config.rtt_settings(elf.as_deref())));

    let connecting = Arc::clone(&session);
    tokio::task::spawn_blocking(move || connecting.connect(&request))
        .await
        .context("RTT connect task failed")??;

    eprintln!("RTT connected. Type to send, ESC then Enter or Ctrl-C to quit.");
    spawn_input_forwarder(Arc::downgrade(&session));

    let mut stdout = tokio::io::stdout();
    let mut cursor = LogCursor::default();
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting");
                break;
            }
            _ = ticker.tick() => {
                let text = session.read_log(&mut cursor);
                if !text.is_empty() {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                if session.state() != SessionState::Streaming {
                    break;
                }
            }
        }
    }

    let closing = Arc::clone(&session);
    tokio::task::spawn_blocking(move || closing.disconnect())
        .await
        .context("RTT disconnect task failed")?;

    let rest = session.read_log(&mut cursor);
    if !rest.is_empty() {
        stdout.write_all(rest.as_bytes()).await?;
        stdout.flush().await?;
    }

    match session.state() {
        SessionState::Failed(reason) => bail!("RTT session failed: {}", reason),
        state => {
            eprintln!("RTT {}", state);
            Ok(())
        }
    }
}

/// Forward raw stdin bytes to the session until EOF or the session is gone
fn spawn_input_forwarder(session: Weak<RttSession>) {
    let spawned = std::thread::Builder::new()
        .name("rtt-stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 256];
            loop {
                let n = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                };
                match session.upgrade() {
                    Some(session) => session.send_input(&buf[..n]),
                    None => break,
                }
            }
            debug!("stdin forwarder finished");
        });

    if let Err(e) = spawned {
        error!("Could not start stdin forwarder, input disabled: {}", e);
    }
}

fn progress_printer() -> rtt_viewer::flash::ProgressCallback {
    Arc::new(|fraction| {
        eprint!("\rProgress: {:>3.0}%", fraction * 100.0);
        if fraction >= 1.0 {
            eprintln!();
        }
    })
}

async fn erase(adapter: Arc<dyn DebugAdapter>, config: &Config, request: ConnectRequest) -> anyhow::Result<()> {
    let manager = FlashManager::new(adapter, config.debugger.default_speed_khz).with_progress(progress_printer());

    let result = tokio::task::spawn_blocking(move || manager.erase_chip(&request))
        .await
        .context("erase task failed")??;

    eprintln!("Chip erased in {} ms", result.erase_time_ms);
    Ok(())
}

async fn load(
    adapter: Arc<dyn DebugAdapter>,
    config: &Config,
    request: ConnectRequest,
    file: PathBuf,
    base_address: u64,
) -> anyhow::Result<()> {
    let manager = FlashManager::new(adapter, config.debugger.default_speed_khz).with_progress(progress_printer());

    let result = tokio::task::spawn_blocking(move || manager.program_file(&request, &file, Some(base_address)))
        .await
        .context("program task failed")??;

    eprintln!(
        "Programmed {} bytes ({:?}) in {} ms",
        result.bytes_programmed, result.format, result.programming_time_ms
    );
    Ok(())
}
