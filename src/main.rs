use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use rs485_configurator_lib::config::PersistedState;
use rs485_configurator_lib::device::SequenceKind;
use rs485_configurator_lib::serial::list_ports;
use rs485_configurator_lib::{
    init_logging, ConfigStore, ConfiguratorBuilder, JsonFileStore, Notification, RangeKind,
};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Serial port, defaults to the last one used
    #[clap(short, long)]
    port: Option<String>,

    /// Baud rate override
    #[clap(short, long)]
    baud: Option<u32>,

    /// Where settings and scan results are kept
    #[clap(short, long, default_value = "rs485-configurator.json")]
    config: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Discover devices on the bus
    Scan,
    /// Request status of devices in an address range
    Range {
        #[clap(value_enum)]
        family: Family,
        start: u16,
        end: u16,
    },
    /// Assign a new address to an AM1 device
    WriteAm1 { address: u16 },
    /// Write channel addresses of an AM8 (8 values) or PM (4 values)
    Write {
        #[clap(value_enum)]
        family: Family,
        addresses: Vec<String>,
    },
    /// Print the stored scan results
    Show,
    /// Remove stored scan results
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Family {
    Am1,
    Am8,
    Pm,
}

impl Family {
    fn range_kind(self) -> RangeKind {
        match self {
            Family::Am1 => RangeKind::Single,
            Family::Am8 => RangeKind::Octal,
            Family::Pm => RangeKind::Quad,
        }
    }
}

fn is_final(command: &Command, notification: &Notification) -> bool {
    match command {
        Command::Scan => matches!(
            notification,
            Notification::ScanCompleted { .. } | Notification::ScanTimedOut { .. }
        ),
        Command::Range { .. } => matches!(
            notification,
            Notification::SingleStatus { .. }
                | Notification::OctalStatus { .. }
                | Notification::QuadStatus { .. }
                | Notification::Timeout { .. }
                | Notification::Error { .. }
        ),
        Command::WriteAm1 { .. } => matches!(
            notification,
            Notification::Acknowledged { .. } | Notification::DeviceReportedError { .. }
        ),
        Command::Write { .. } => matches!(
            notification,
            Notification::SequenceCompleted { .. } | Notification::SequenceAborted { .. }
        ),
        _ => true,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    if let Command::Ports = args.command {
        for port in list_ports()? {
            println!("{}", serde_json::to_string(&port)?);
        }
        return Ok(());
    }

    let store = Arc::new(JsonFileStore::new(&args.config));
    let stored = PersistedState::load(store.as_ref()).await?;

    match args.command {
        Command::Show => {
            let scan = stored.and_then(|state| state.scan);
            println!("{}", serde_json::to_string_pretty(&scan)?);
            return Ok(());
        }
        Command::Clear => {
            store.clear_config().await?;
            return Ok(());
        }
        _ => {}
    }

    let mut settings = stored.map(|state| state.settings).unwrap_or_default();
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    let port = match args.port.clone().or_else(|| settings.last_port.clone()) {
        Some(port) => port,
        None => bail!("No serial port given and none remembered"),
    };
    settings.last_port = Some(port.clone());
    let listen_for = settings.scan_timeout().max(settings.range_timeout()) + Duration::from_secs(1)
        + settings.write_step_delay() * 8;

    let handle = ConfiguratorBuilder::open_serial(&port, store, settings)
        .with_context(|| format!("opening {}", port))?
        .build();
    let mut events = handle.subscribe();

    match &args.command {
        Command::Scan => handle.start_scan().await?,
        Command::Range { family, start, end } => {
            handle.request_range(family.range_kind(), *start, *end).await?
        }
        Command::WriteAm1 { address } => handle.write_single_address(*address).await?,
        Command::Write { family, addresses } => {
            let kind = match family {
                Family::Am8 => SequenceKind::Octal,
                Family::Pm => SequenceKind::Quad,
                Family::Am1 => bail!("AM1 has a single address, use write-am1"),
            };
            handle.start_sequence(kind, addresses.clone()).await?
        }
        _ => {}
    }

    let deadline = tokio::time::sleep(listen_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(notification) => {
                    println!("{}", serde_json::to_string(&notification)?);
                    if is_final(&args.command, &notification) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => log::warn!("Missed {} notifications", n),
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline => {
                log::warn!("Gave up waiting after {:?}", listen_for);
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
