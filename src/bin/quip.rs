//! QUIP command line entrypoint.
//!
//! - `quip -e -f <file>` - encode a file into packet units
//! - `quip -d [-f <output>]` - bulk decode the units into a file
//! - `quip --late <pid>` - patch one late packet into an in-progress file
//! - `quip --listen` - run the serial link interpreter until interrupted

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};

use quip::coder::{DecodeOutcome, LateOutcome};
use quip::link::{Interpreter, PacketCommands, SerialTransport, Signals};
use quip::store::DirStore;
use quip::{Config, Decoder, Encoder};

/// Encode files into QUIP packets and decode them back.
#[derive(Parser, Debug)]
#[command(name = "quip")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["encode", "decode", "late", "listen"])))]
struct Cli {
    /// Encode the file given with --file into packets
    #[arg(short, long)]
    encode: bool,

    /// Decode the packets into a file
    #[arg(short, long)]
    decode: bool,

    /// Patch a single late packet into an in-progress file
    #[arg(long, value_name = "PID")]
    late: Option<u64>,

    /// Listen on the serial link and handle whatever arrives
    #[arg(long)]
    listen: bool,

    /// Directory holding the packet units
    #[arg(short, long, value_name = "DIR")]
    packets: Option<PathBuf>,

    /// File to encode, or the decode destination (file or directory)
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Only report warnings and errors
    #[arg(short, long)]
    suppress: bool,

    /// Remove consumed inputs after a successful run
    #[arg(long)]
    destructive: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        if let Some(packets) = &self.packets {
            config.packet_dir = packets.clone();
        }
        if self.destructive {
            config.destructive = true;
        }
        config.validate()?;
        Ok(config)
    }

    fn output(&self, config: &Config) -> PathBuf {
        self.file.clone().unwrap_or_else(|| config.output_dir.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.suppress { tracing::Level::WARN } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = cli.load_config()?;

    if cli.encode {
        encode(&cli, &config)
    } else if cli.decode {
        decode(&cli, &config)
    } else if let Some(pid) = cli.late {
        decode_late(&cli, &config, pid)
    } else {
        listen(config).await
    }
}

fn encode(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let Some(source) = &cli.file else {
        bail!("--encode needs the file to encode (--file)");
    };
    let store = DirStore::create(&config.packet_dir)
        .with_context(|| format!("preparing {}", config.packet_dir.display()))?;

    let record = Encoder::new(source, store)
        .destructive(config.destructive)
        .run()
        .with_context(|| format!("encoding {}", source.display()))?;
    info!(
        file = %record.file_name,
        packets = record.packet_count,
        bytes = record.file_size,
        dir = %config.packet_dir.display(),
        "encode complete"
    );
    Ok(())
}

fn decode(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let store = DirStore::open(&config.packet_dir)
        .with_context(|| format!("opening {}", config.packet_dir.display()))?;

    let outcome = Decoder::new(cli.output(config), store)
        .destructive(config.destructive)
        .max_file_size(config.max_file_size)
        .run()
        .context("decoding packets")?;
    match outcome {
        DecodeOutcome::Complete { path, size } => {
            info!(path = %path.display(), bytes = size, "decode complete")
        }
        DecodeOutcome::Incomplete { missing, scaffold } => warn!(
            missing = ?missing,
            scaffold = %scaffold.display(),
            "decode incomplete, rerun with --late <pid> as packets arrive"
        ),
    }
    Ok(())
}

fn decode_late(cli: &Cli, config: &Config, pid: u64) -> anyhow::Result<()> {
    let store = DirStore::open(&config.packet_dir)
        .with_context(|| format!("opening {}", config.packet_dir.display()))?;

    let outcome = Decoder::new(cli.output(config), store)
        .destructive(config.destructive)
        .max_file_size(config.max_file_size)
        .decode_late(pid)
        .with_context(|| format!("patching packet {}", pid))?;
    match outcome {
        LateOutcome::Completed { path } => info!(path = %path.display(), "decode complete"),
        LateOutcome::Patched { remaining } => info!(pid, remaining = ?remaining, "packet patched"),
        LateOutcome::NotFound => bail!("packet {} has not arrived", pid),
    }
    Ok(())
}

async fn listen(config: Config) -> anyhow::Result<()> {
    let transport = SerialTransport::open(&config.serial)?;
    let store = DirStore::create(&config.packet_dir)
        .with_context(|| format!("preparing {}", config.packet_dir.display()))?;
    let signals = Signals::new();

    let interrupt = {
        let signals = signals.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                signals.request_shutdown();
            }
        })
    };

    let restart_delay = config.poll_interval;
    let mut interpreter = Interpreter::new(store, config, signals.clone())
        .with_transport(transport)
        .with_handler(Box::new(PacketCommands));

    // restart the worker until shutdown is requested
    let result = loop {
        match interpreter.run().await {
            Err(e) if !signals.is_shutdown() => {
                warn!(error = %e, "interpreter exited unexpectedly, restarting");
                tokio::time::sleep(restart_delay).await;
            }
            other => break other,
        }
    };
    interrupt.abort();
    result.context("serial interpreter")
}
