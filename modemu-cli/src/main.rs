//! Command-line Modbus device emulator

use std::num::ParseIntError;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use modemu::config::TransportConfig;
use modemu::{Emulator, EmulatorConfig, EmulatorError, HexDisplay, UnitId};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Emulator(#[from] EmulatorError),
    #[error(transparent)]
    Config(#[from] modemu::error::ConfigError),
    #[error("bad hex byte '{0}': {1}")]
    BadByte(String, ParseIntError),
    #[error("unable to wait for ctrl-c: {0}")]
    Signal(std::io::Error),
}

#[derive(Parser)]
#[command(name = "modemu")]
#[command(about = "A command line program for emulating Modbus devices using the modemu crate")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "start the configured transport and serve requests until ctrl-c")]
    Run(ConfigArgs),

    #[command(about = "validate a configuration file and list its devices")]
    Check(ConfigArgs),

    #[command(about = "push one raw request frame through the configured devices")]
    Frame(FrameArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(short = 'c', long, help = "path of the JSON configuration file")]
    config: PathBuf,
}

#[derive(Args)]
struct FrameArgs {
    #[arg(short = 'c', long, help = "path of the JSON configuration file")]
    config: PathBuf,

    #[arg(
        required = true,
        help = "request frame as hex bytes starting with the unit id (e.g. 01 03 00 00 00 02)"
    )]
    bytes: Vec<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Run(args) => serve(EmulatorConfig::from_file(&args.config)?).await,
        Command::Check(args) => {
            let config = EmulatorConfig::from_file(&args.config)?;
            println!("transport: {}", describe_transport(&config.transport));
            for device in &config.devices {
                let registers = &device.registers;
                println!(
                    "unit {}: {} holding, {} input, {} coils, {} discrete, timing: {}",
                    device.unit_id,
                    registers.holding.len(),
                    registers.input.len(),
                    registers.coils.len(),
                    registers.discrete.len(),
                    if device.timing.is_some() { "yes" } else { "no" },
                );
            }
            Ok(())
        }
        Command::Frame(args) => {
            let config = EmulatorConfig {
                transport: TransportConfig::Memory,
                ..EmulatorConfig::from_file(&args.config)?
            };
            let frame = parse_frame(&args.bytes)?;
            let unit = UnitId::new(frame.first().copied().unwrap_or(modemu::UNIT_ID_WILDCARD));
            let emulator = Emulator::from_config(&config)?;
            let response = emulator.handle_request(unit, frame).await;
            println!("{}", HexDisplay(&response));
            Ok(())
        }
    }
}

async fn serve(config: EmulatorConfig) -> Result<(), Error> {
    let mut emulator = Emulator::from_config(&config)?;
    emulator.start().await?;
    tracing::info!(
        "serving {} device(s), press ctrl-c to stop",
        emulator.device_ids().len()
    );

    let signal = tokio::signal::ctrl_c().await.map_err(Error::Signal);
    emulator.stop().await?;
    signal
}

fn describe_transport(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Memory => "memory".to_string(),
        TransportConfig::Tcp { host, port } => format!("tcp {host}:{port}"),
        TransportConfig::Rtu(serial) => format!(
            "rtu {} at {} baud (unit filter: {})",
            serial.path, serial.baud_rate, serial.unit_id
        ),
    }
}

fn parse_frame(bytes: &[String]) -> Result<Vec<u8>, Error> {
    bytes
        .iter()
        .flat_map(|x| x.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|x| !x.is_empty())
        .map(|x| {
            let digits = x.trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16).map_err(|err| Error::BadByte(x.to_string(), err))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_bytes_in_any_grouping() {
        let args = vec!["01".to_string(), "0x03".to_string(), "00,00 00 02".to_string()];
        assert_eq!(parse_frame(&args).unwrap(), vec![1, 3, 0, 0, 0, 2]);
    }

    #[test]
    fn rejects_non_hex_bytes() {
        assert!(matches!(
            parse_frame(&["0G".to_string()]),
            Err(Error::BadByte(x, _)) if x == "0G"
        ));
    }
}
