use clap::{Parser, Subcommand, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use udp_discovery::transport::{DatagramHandler, Transport};
use udp_discovery::{
    oneshot, Config, ConfigFile, DiscoveryError, DiscoveryEvent, Protocol, ServiceDiscovery, Ssdp,
    SsdpConfig, Wsd,
};

/// Discover services on the local network via SSDP or WS-Discovery
#[derive(Parser, Debug)]
#[command(name = "udp-discovery")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with `ssdp` and `wsd` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every discovery event until Ctrl+C, Enter probes again
    Watch {
        dialect: Dialect,

        /// SSDP search target
        #[arg(long)]
        search: Option<String>,
    },

    /// Probe once and list the services that answered
    Oneshot {
        dialect: Dialect,

        /// Time to wait for answers
        #[arg(long, default_value_t = 8)]
        seconds: u64,
    },

    /// Send an arbitrary probe and print every datagram received
    Raw {
        address: Ipv4Addr,
        port: u16,

        /// Probe payload
        #[arg(long, required_unless_present = "path", conflicts_with = "path")]
        message: Option<String>,

        /// File containing the probe payload
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dialect {
    Ssdp,
    Wsd,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Set up logging using tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::debug!(
        "{} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let settings = match &args.config {
        Some(path) => match ConfigFile::load(path) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!("Failed to load {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        },
        None => ConfigFile::default(),
    };

    let result = match args.command {
        Command::Watch { dialect, search } => {
            let ConfigFile { mut ssdp, wsd } = settings;
            match apply_search(dialect, search, &mut ssdp) {
                Err(err) => Err(err),
                Ok(()) => match dialect {
                    Dialect::Ssdp => watch(Ssdp::discovery(ssdp)).await,
                    Dialect::Wsd => watch(Wsd::discovery(wsd)).await,
                },
            }
        }
        Command::Oneshot { dialect, seconds } => {
            let ConfigFile { mut ssdp, mut wsd } = settings;
            let window = Duration::from_secs(seconds);

            let services = match dialect {
                Dialect::Ssdp => {
                    ssdp.transport.unicast_responses_only = true;
                    oneshot::search(Ssdp::discovery(ssdp), window).await
                }
                Dialect::Wsd => {
                    wsd.transport.unicast_responses_only = true;
                    oneshot::search(Wsd::discovery(wsd), window).await
                }
            };

            services.map(|services| {
                for info in services.values() {
                    println!("{}", info);
                }
            })
        }
        Command::Raw {
            address,
            port,
            message,
            path,
        } => raw(address, port, message, path).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Applies `--search`, which only SSDP understands.
fn apply_search(
    dialect: Dialect,
    search: Option<String>,
    ssdp: &mut SsdpConfig,
) -> Result<(), DiscoveryError> {
    match (dialect, search) {
        (_, None) => Ok(()),
        (Dialect::Ssdp, Some(search)) => {
            ssdp.search = search;
            Ok(())
        }
        (Dialect::Wsd, Some(_)) => Err(DiscoveryError::InvalidConfig(
            "--search only applies to ssdp".into(),
        )),
    }
}

async fn watch<P: Protocol>(discovery: ServiceDiscovery<P>) -> Result<(), DiscoveryError> {
    let (sender, mut events) = tokio::sync::mpsc::unbounded_channel::<DiscoveryEvent>();
    let session = discovery.start(sender).await?;

    tracing::info!("Watching, press Enter to probe again or Ctrl+C to stop");

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(DiscoveryEvent::Probing) => println!("PROBING"),
                    Some(DiscoveryEvent::Alive(info)) => println!("ALIVE:  {}", info),
                    Some(DiscoveryEvent::Gone(info)) => println!("GONE:   {}", info),
                    Some(DiscoveryEvent::Search(info)) => println!("SEARCH: {}", info),
                    Some(DiscoveryEvent::Other(info)) => println!("OTHER:  {}", info),
                    None => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(_)) => session.probe_now(),
                    Ok(None) => stdin_open = false,
                    Err(err) => {
                        tracing::warn!("Failed to read stdin: {}", err);
                        stdin_open = false;
                    }
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    session.stop().await;
    Ok(())
}

/// Prints datagrams verbatim.
struct RawPrinter {
    probe: Vec<u8>,
}

impl DatagramHandler for RawPrinter {
    fn probe_message(&self) -> Vec<u8> {
        self.probe.clone()
    }

    fn receive(&self, message: &str, from: SocketAddr) {
        println!("--- {} ---\n{}\n", from, message);
    }
}

async fn raw(
    address: Ipv4Addr,
    port: u16,
    message: Option<String>,
    path: Option<PathBuf>,
) -> Result<(), DiscoveryError> {
    let probe = match (message, path) {
        (Some(message), _) => message.into_bytes(),
        (None, Some(path)) => tokio::fs::read(&path).await?,
        (None, None) => {
            return Err(DiscoveryError::InvalidConfig(
                "either a message or a path is required".into(),
            ))
        }
    };

    let mut config = Config::for_group(address, port);
    config.unicast_responses_only = true;

    let session = Transport::new(config).start(RawPrinter { probe }).await?;

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to wait for Ctrl+C: {}", err);
    }

    session.stop().await;
    Ok(())
}
