mod prompt;

use std::fs::File;
use std::io::{self, BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use stopwait::{ClientConfig, EventLoop, Transfer, Transport, UdpTransport, parse_address};

#[derive(Parser)]
#[command(name = "stopwait-client")]
#[command(about = "Fetch a file from a stop-and-wait server")]
struct Args {
    #[arg(help = "Name of the file to request")]
    filename: String,

    #[arg(
        short,
        long,
        default_value = "localhost:50001",
        help = "Server address (e.g., 127.0.0.1:50001)"
    )]
    server: String,

    #[arg(short, long, help = "Destination path, defaults to the requested file name")]
    output: Option<PathBuf>,

    #[arg(short, long, default_value_t = 2, help = "Retransmission timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value_t = 5, help = "Retransmissions before asking to give up")]
    max_tries: u32,

    #[arg(long, help = "Give up without asking once retries run out")]
    no_prompt: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let server = parse_address(&args.server)?;
    let config = ClientConfig {
        timeout: Duration::from_secs(args.timeout),
        max_tries: args.max_tries,
    };
    config.validate()?;

    let output = match args.output {
        Some(path) => path,
        None => default_output(&args.filename)?,
    };
    let file =
        File::create(&output).with_context(|| format!("cannot create {}", output.display()))?;

    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let transport = UdpTransport::bind(bind_addr).context("failed to open socket")?;
    log::debug!("Bound {}", transport.local_addr());

    let mut event_loop = EventLoop::new(transport, config.timeout);
    let mut transfer = Transfer::new(server, args.filename.as_str(), BufWriter::new(file), config);
    if !args.no_prompt && io::stdin().is_terminal() {
        transfer = transfer.with_decider(prompt::ask_to_continue);
    }

    transfer.start(event_loop.transport_mut())?;
    event_loop.run(&mut transfer)?;

    let summary = transfer.result()?;
    log::info!(
        "Saved {} ({} bytes, {} duplicate blocks discarded)",
        output.display(),
        summary.bytes,
        summary.duplicates
    );

    Ok(())
}

fn default_output(filename: &str) -> Result<PathBuf> {
    Path::new(filename)
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("cannot derive an output name from {:?}", filename))
}
