use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use mbus_master::{init_logger, log_info, LogType, MBusMaster, SerialConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mbus-master")]
#[command(about = "M-Bus master for reading meters over a serial link")]
struct Cli {
    /// JSON file with the serial link settings
    #[arg(short, long)]
    config: PathBuf,

    /// Override the port from the configuration file
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogKind {
    Error,
    Alarm,
    Warning,
}

impl From<LogKind> for LogType {
    fn from(kind: LogKind) -> Self {
        match kind {
            LogKind::Error => LogType::Error,
            LogKind::Alarm => LogType::Alarm,
            LogKind::Warning => LogType::Warning,
        }
    }
}

fn parse_hex_byte(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{s}': {e}"))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(cleaned).map_err(|e| format!("invalid hex string '{s}': {e}"))
}

#[derive(Subcommand)]
enum Commands {
    /// Reset a device with SND_NKE
    Init { address: u8 },
    /// Read every telegram and list the records
    Read { address: u8 },
    /// Read every telegram and show the fixed data header
    Header { address: u8 },
    /// Read every telegram and interpret one record
    Value {
        address: u8,
        #[arg(value_parser = parse_hex_byte)]
        dif: u8,
        #[arg(value_parser = parse_hex_byte)]
        vif: u8,
        /// DIFEs as hex, e.g. "10"
        #[arg(long, default_value = "")]
        difes: String,
        /// VIFE prefix as hex; the record has exactly one more VIFE
        #[arg(long, default_value = "")]
        vifes: String,
    },
    /// Read a meter log
    Logs {
        address: u8,
        #[arg(value_enum)]
        kind: LogKind,
    },
}

async fn read_all(master: &mut MBusMaster, address: u8) -> anyhow::Result<()> {
    let (ok, checksum) = master.request_and_cache_all(address).await?;
    if !ok {
        bail!("no usable data from device {address}");
    }
    log_info(&format!("Read complete, checksum {checksum}"));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let mut config = SerialConfig::from_json_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let mut master: MBusMaster = MBusMaster::new(config);
    master
        .open()
        .with_context(|| format!("opening {}", master.config().port))?;

    match cli.command {
        Commands::Init { address } => {
            let acked = master.initialize(address).await?;
            log_info(&format!("Device {address} acknowledged: {acked}"));
        }
        Commands::Read { address } => {
            read_all(&mut master, address).await?;
            for record in master.cache().records() {
                log_info(&record.to_string());
            }
        }
        Commands::Header { address } => {
            read_all(&mut master, address).await?;
            match master.get_fixed_header(address) {
                Some(header) => log_info(&header.to_string()),
                None => log_info("No fixed header received"),
            }
        }
        Commands::Value {
            address,
            dif,
            vif,
            difes,
            vifes,
        } => {
            let difes = parse_hex_bytes(&difes).map_err(anyhow::Error::msg)?;
            let vifes = parse_hex_bytes(&vifes).map_err(anyhow::Error::msg)?;
            read_all(&mut master, address).await?;
            let result = master.read_value(address, dif, vif, &difes, &vifes);
            match result.quantity() {
                Some(quantity) => log_info(&format!("{quantity}: {result}")),
                None => log_info(&result.to_string()),
            }
        }
        Commands::Logs { address, kind } => {
            let (events, checksum) = master.read_all_logs(address, kind.into()).await?;
            for event in &events {
                log_info(&event.to_string());
            }
            log_info(&format!("{} events, checksum {checksum}", events.len()));
        }
    }

    master.close();
    Ok(())
}
