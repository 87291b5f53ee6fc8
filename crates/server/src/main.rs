use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use stopwait::{
    EventLoop, FaultModel, FileRoot, FileServer, LossyTransport, NetworkStats, ServerConfig,
    ServerEvent, Transport, UdpTransport,
};

#[derive(Parser)]
#[command(name = "stopwait-server")]
#[command(about = "Stop-and-wait file server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = stopwait::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = ".", help = "Directory to serve files from")]
    root: PathBuf,

    #[arg(short, long, default_value_t = 2, help = "Retransmission timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value_t = 5, help = "Retransmissions before a session is dropped")]
    max_tries: u32,

    #[arg(long, default_value_t = 1, help = "Peers served at the same time")]
    max_sessions: usize,

    #[arg(long, default_value_t = stopwait::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0.0, help = "Packet duplication percentage (0-100)")]
    duplicate_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        timeout: Duration::from_secs(args.timeout),
        max_tries: args.max_tries,
        block_size: args.block_size,
        max_sessions: args.max_sessions,
        ..Default::default()
    };
    config.validate()?;

    let root = FileRoot::new(&args.root)
        .with_context(|| format!("cannot serve from {}", args.root.display()))?;
    let bind_addr = format!("{}:{}", args.bind, args.port);
    let transport =
        UdpTransport::bind(&bind_addr).with_context(|| format!("cannot bind {}", bind_addr))?;

    log::info!(
        "Serving {} on {}",
        root.base().display(),
        transport.local_addr()
    );
    let server = FileServer::new(root, config.clone());

    if args.simulate_packet_loss {
        let model = FaultModel {
            enabled: true,
            loss_percent: args.loss_percent,
            duplicate_percent: args.duplicate_percent,
            ..Default::default()
        };
        log::warn!(
            "Simulating {}% loss and {}% duplication",
            model.loss_percent,
            model.duplicate_percent
        );

        let mut event_loop = EventLoop::new(LossyTransport::new(transport, model), config.timeout);
        serve(&mut event_loop, server)?;

        let lossy = event_loop.transport();
        log_stats(lossy.inner().stats());
        log::info!(
            "Simulation dropped {} and duplicated {} packets",
            lossy.fault_stats().packets_dropped,
            lossy.fault_stats().packets_duplicated
        );
    } else {
        let mut event_loop = EventLoop::new(transport, config.timeout);
        serve(&mut event_loop, server)?;
        log_stats(event_loop.transport().stats());
    }

    log::info!("Server shutting down");
    Ok(())
}

fn serve<T: Transport>(
    event_loop: &mut EventLoop<T>,
    mut server: FileServer<FileRoot>,
) -> Result<()> {
    let running = event_loop.running();
    let handler_flag = event_loop.running();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    while running.load(Ordering::SeqCst) {
        let result = event_loop.poll_once(&mut server);
        for event in server.drain_events() {
            log_event(event);
        }
        result?;
    }

    Ok(())
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::SessionStarted { addr, file } => {
            log::info!("{} requested {}", addr, file);
        }
        ServerEvent::SessionCompleted {
            addr,
            file,
            blocks,
            bytes,
            confirmed,
        } => {
            if confirmed {
                log::info!("Sent {} to {} ({} blocks, {} bytes)", file, addr, blocks, bytes);
            } else {
                log::warn!(
                    "Sent {} to {} ({} blocks, {} bytes), final ACK never arrived",
                    file,
                    addr,
                    blocks,
                    bytes
                );
            }
        }
        ServerEvent::SessionAborted { addr, file, reason } => {
            log::warn!("Transfer of {} to {} aborted: {}", file, addr, reason.as_str());
        }
        ServerEvent::RequestDenied { addr, file, reason } => {
            log::warn!("Denied {} to {}: {}", file, addr, reason);
        }
        ServerEvent::RequestIgnored { addr, file } => {
            log::info!("Busy, ignoring request for {} from {}", file, addr);
        }
    }
}

fn log_stats(stats: &NetworkStats) {
    log::info!(
        "Sent {} packets ({} bytes), received {} packets ({} bytes)",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received
    );
}
