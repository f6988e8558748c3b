use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use uncore::common::{MsrHandle, PciBus, SimBus, SimMsr};
use uncore::uncore::{ConfigSpace, LocalRegisters};
use uncore::{
    select_platform, AgentConfig, BoxHandle, CollectorConfig, CounterCollector, CounterExporter,
    Event, EventSpec, PlatformId, Uncore, UncoreError,
};
use uncore_raw::{Backend, EventSelect};

#[derive(Parser, Debug)]
#[command(name = "uncore")]
#[command(about = "Uncore PMU box enumeration and counter export for Intel server CPUs")]
struct Args {
    #[arg(long, global = true, help = "CPU whose MSR device serves MSR boxes")]
    cpu: Option<u32>,

    #[arg(
        long,
        global = true,
        help = "Platform tables to use (haswell-ep, none); detected from CPUID by default"
    )]
    platform: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Use in-memory registers instead of /dev/cpu/*/msr and /proc/bus/pci"
    )]
    simulate: bool,

    #[arg(long, global = true, help = "Root of the procfs PCI tree")]
    pci_root: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows all MSR/PCI read/write operations)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every enumerated box and its device (default)
    Dump,

    /// Read the counters of one box
    Read {
        #[arg(help = "Box type name, e.g. C-BOX or IMC")]
        box_type: String,

        #[arg(long = "box", default_value_t = 0, help = "Box ordinal within its type")]
        ordinal: u32,

        #[arg(long, help = "Only this programmable counter")]
        counter: Option<u32>,
    },

    /// Program events and export every counter over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        #[arg(long, default_value_t = 1000, help = "Sampling interval in milliseconds")]
        interval_ms: u64,

        #[arg(
            long = "event",
            help = "Event armed on every box of a type: TYPE:COUNTER:EVENT[:UMASK]",
            action = clap::ArgAction::Append
        )]
        events: Vec<String>,
    },
}

struct AppState {
    exporter: Arc<CounterExporter>,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    let metric_families = state.exporter.registry().gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode uncore metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions(cpu: u32) -> anyhow::Result<()> {
    let msr_path = format!("/dev/cpu/{cpu}/msr");
    std::fs::metadata(&msr_path).with_context(|| {
        format!("Cannot access {msr_path}; the MSR kernel module may not be loaded (sudo modprobe msr)")
    })?;

    if let Err(e) = std::fs::File::open(&msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            anyhow::bail!("Permission denied accessing {msr_path}; run as root or use --simulate");
        }
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let mut config = match args.cpu {
        Some(cpu) => AgentConfig::new(cpu),
        None => AgentConfig::auto_detect(),
    };

    config.simulate = args.simulate;
    if let Some(root) = &args.pci_root {
        config.pci_root = root.clone();
    }
    if let Some(name) = &args.platform {
        config.platform = Some(name.parse()?);
    }
    Ok(config)
}

fn find_box<L: LocalRegisters, D: ConfigSpace>(
    uncore: &Uncore<L, D>,
    name: &str,
) -> anyhow::Result<(Backend, usize)> {
    uncore.find_type(name).ok_or_else(|| {
        let err = if uncore.profile().is_inert() {
            UncoreError::UnsupportedPlatform(format!(
                "{} has no uncore box tables",
                uncore.platform()
            ))
        } else {
            UncoreError::InvalidConfiguration(format!(
                "unknown box type '{}' on {}",
                name,
                uncore.platform()
            ))
        };
        err.into()
    })
}

fn read_box<L: LocalRegisters, D: ConfigSpace>(
    uncore: &Uncore<L, D>,
    name: &str,
    ordinal: u32,
    counter: Option<u32>,
) -> anyhow::Result<()> {
    let (backend, type_index) = find_box(uncore, name)?;
    let handle = uncore
        .for_each_box(backend, type_index)
        .nth(ordinal as usize)
        .with_context(|| format!("{name} has no box {ordinal}"))?;
    let box_type = uncore.box_type(&handle)?;

    // An explicit index goes through as is; read_counter rejects it when out of range
    let counters: Vec<u32> = match counter {
        Some(counter) => vec![counter],
        None => (0..box_type.num_counters).collect(),
    };
    for counter in counters {
        let value = uncore.read_counter(&handle, counter)?;
        println!("{}#{} counter {}: {}", box_type.name, ordinal, counter, value);
    }

    if counter.is_none() && box_type.fixed_ctr.is_some() {
        let value = uncore.read_fixed_counter(&handle)?;
        println!("{}#{} fixed: {}", box_type.name, ordinal, value);
    }
    Ok(())
}

/// Reset and unfreeze every box, start the fixed counters, then arm the
/// requested events
fn program_boxes<L: LocalRegisters, D: ConfigSpace>(
    uncore: &Uncore<L, D>,
    specs: &[EventSpec],
) -> anyhow::Result<Vec<(BoxHandle, Event)>> {
    for handle in uncore.all_boxes() {
        uncore.init_box(&handle)?;
        uncore.enable_box(&handle)?;
        uncore.enable_fixed_counter(&handle)?;
    }

    let mut armed = Vec::new();
    for spec in specs {
        let (backend, type_index) = find_box(uncore, &spec.box_type)?;
        let select = EventSelect::new(spec.event, spec.umask);

        for handle in uncore.for_each_box(backend, type_index) {
            let box_type = uncore.box_type(&handle)?;
            let event = Event::for_counter(box_type, handle.ordinal(), spec.counter, select)?;
            uncore.enable_event(&handle, &event)?;
            armed.push((handle, event));
        }
        tracing::info!(
            "Armed event {:#04x} umask {:#04x} on {} counter {}",
            spec.event,
            spec.umask,
            spec.box_type,
            spec.counter
        );
    }
    Ok(armed)
}

fn unprogram_boxes<L: LocalRegisters, D: ConfigSpace>(
    uncore: &Uncore<L, D>,
    armed: &[(BoxHandle, Event)],
) {
    for (handle, event) in armed {
        if let Err(e) = uncore.disable_event(handle, event) {
            tracing::warn!("Failed to disable event on {}: {}", handle, e);
        }
    }
    for handle in uncore.all_boxes() {
        if let Err(e) = uncore.disable_fixed_counter(&handle) {
            tracing::warn!("Failed to stop fixed counter of {}: {}", handle, e);
        }
        if let Err(e) = uncore.disable_box(&handle) {
            tracing::warn!("Failed to freeze {}: {}", handle, e);
        }
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }

    cancel_token.cancel();
}

async fn serve<L, D>(
    uncore: Uncore<L, D>,
    listen: SocketAddr,
    interval: Duration,
    events: &[String],
) -> anyhow::Result<()>
where
    L: LocalRegisters + 'static,
    D: ConfigSpace + 'static,
{
    let specs = events
        .iter()
        .map(|s| s.parse::<EventSpec>())
        .collect::<Result<Vec<_>, _>>()?;

    let uncore = Arc::new(uncore);
    let armed = program_boxes(&uncore, &specs)?;

    let exporter = Arc::new(CounterExporter::new(uncore.clone()));
    let cancel_token = CancellationToken::new();
    let collection_handle = CounterCollector::new(CollectorConfig { interval }, Arc::clone(&exporter))
        .start(cancel_token.clone());

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(AppState { exporter }));

    tracing::warn!("Starting HTTP server on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for collection loop to finish...");
    if let Err(e) = collection_handle.await {
        tracing::error!("Collection loop failed: {}", e);
    }

    unprogram_boxes(&uncore, &armed);
    match Arc::try_unwrap(uncore) {
        Ok(uncore) => {
            uncore.teardown();
        }
        Err(_) => tracing::warn!("Uncore still shared at shutdown, skipping teardown"),
    }
    Ok(())
}

async fn run<L, D>(uncore: Uncore<L, D>, command: Command) -> anyhow::Result<()>
where
    L: LocalRegisters + 'static,
    D: ConfigSpace + 'static,
{
    match command {
        Command::Dump => print!("{}", uncore.dump()),
        Command::Read {
            box_type,
            ordinal,
            counter,
        } => read_box(&uncore, &box_type, ordinal, counter)?,
        Command::Serve {
            listen,
            interval_ms,
            events,
        } => {
            return serve(uncore, listen, Duration::from_millis(interval_ms), &events).await;
        }
    }

    uncore.teardown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = build_config(&args)?;
    let platform = config.platform.unwrap_or_else(PlatformId::detect);
    let profile = select_platform(platform);
    let command = args.command.unwrap_or(Command::Dump);

    if config.simulate {
        tracing::warn!("Simulation mode: registers live in memory, no hardware is touched");
        let bus = SimBus::from_profile(&profile);
        let uncore = Uncore::enumerate(profile, Arc::new(SimMsr::new()), &bus)?;
        return run(uncore, command).await;
    }

    check_permissions(config.cpu)?;
    let msr = MsrHandle::new(config.cpu)?;
    let bus = PciBus::scan(config.pci_root.clone()).unwrap_or_else(|e| {
        tracing::warn!(
            "Cannot list PCI devices under {}: {}, PCI boxes unavailable",
            config.pci_root.display(),
            e
        );
        PciBus::empty(config.pci_root.clone())
    });

    let uncore = Uncore::enumerate(profile, msr, &bus)?;
    run(uncore, command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uncore::common::SimDevice;

    fn haswell() -> Uncore<Arc<SimMsr>, SimDevice> {
        let profile = select_platform(PlatformId::HaswellEp);
        let bus = SimBus::from_profile(&profile);
        Uncore::enumerate(profile, Arc::new(SimMsr::new()), &bus).unwrap()
    }

    #[test]
    fn test_read_box_reports_out_of_range_counter() {
        let uncore = haswell();
        assert!(read_box(&uncore, "U-BOX", 0, Some(1)).is_ok());

        let err = read_box(&uncore, "U-BOX", 0, Some(u32::MAX)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UncoreError>(),
            Some(UncoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_program_boxes_starts_fixed_counters() {
        let profile = select_platform(PlatformId::HaswellEp);
        let regs = Arc::new(SimMsr::new());
        let uncore: Uncore<Arc<SimMsr>, SimDevice> =
            Uncore::enumerate(profile, Arc::clone(&regs), &SimBus::new()).unwrap();
        let fixed_ctl = uncore_raw::arch::haswell_ep::msr::ubox::UCLK_FIXED_CTL;

        let armed = program_boxes(&uncore, &[]).unwrap();
        assert!(armed.is_empty());
        assert_ne!(regs.get(fixed_ctl) & (1 << 22), 0);

        unprogram_boxes(&uncore, &armed);
        assert_eq!(regs.get(fixed_ctl) & (1 << 22), 0);
    }
}
