use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use thiserror::Error;

use ra_flash::RaSession;

/// Distinguishes a local filesystem failure from a protocol-level
/// `FlashError` so the error message points at the right thing — a
/// missing firmware file is not a serial transport problem.
#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Flash(#[from] ra_flash::error::FlashError),
    #[error("{path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create_file(path: &Path) -> Result<File, CliError> {
    File::create(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Host-side flashing utility for the RA family MCU factory ROM bootloader.
#[derive(Parser)]
#[command(name = "ra-flash", version, about)]
struct Cli {
    /// Serial device path (e.g. /dev/ttyACM0, COM3).
    #[arg(short, long)]
    port: String,

    /// Memory area index to operate against.
    #[arg(short, long, default_value_t = ra_flash::DEFAULT_AREA)]
    area: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the device signature and area layout.
    Info,
    /// Erase a range of flash. Defaults to the rest of the active area.
    Erase {
        #[arg(long, value_parser = parse_hex_u32)]
        start_address: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        size: Option<u32>,
    },
    /// Program a file to flash. Defaults to the file's length.
    Write {
        #[arg(long, value_parser = parse_hex_u32)]
        start_address: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        size: Option<u32>,
        file: std::path::PathBuf,
        /// Read the range back and compare after writing.
        #[arg(long)]
        verify: bool,
    },
    /// Read a range of flash to a file. Defaults to the rest of the active area.
    Read {
        #[arg(long, value_parser = parse_hex_u32)]
        start_address: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        size: Option<u32>,
        file: std::path::PathBuf,
    },
}

/// Defaults an omitted `--size` to the remainder of the active area,
/// `area.end_addr - start_addr + 1` (spec.md §6: erase/read default to
/// end-of-area; `original_source/raflash/RAFlasher.py`'s `erase_chip`/
/// `read_img` do the same when no explicit size is given).
fn size_to_end_of_area(
    size: Option<u32>,
    start_address: u32,
    area: &ra_flash::device::AreaInfo,
) -> u32 {
    size.unwrap_or_else(|| area.end_addr.saturating_sub(start_address).saturating_add(1))
}

/// Accepts `0x`-prefixed or bare hex strings (spec.md §6).
fn parse_hex_u32(raw: &str) -> Result<u32, String> {
    let trimmed = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    u32::from_str_radix(trimmed, 16).map_err(|e| format!("invalid hex value {raw:?}: {e}"))
}

fn progress_bar(done: u64, total: u64) {
    let pct = if total == 0 { 100 } else { done * 100 / total };
    eprint!("\r{pct:3}% ({done}/{total} bytes)");
    if done >= total {
        eprintln!();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut session = RaSession::open(&cli.port)?;
    session.set_active_area(cli.area);
    session.area_info()?;

    match cli.command {
        Command::Info => {
            let info = session.device_info()?;
            println!("{info:#?}");
        }
        Command::Erase { start_address, size } => {
            let area = session.active_area_info()?;
            let size = size_to_end_of_area(size, start_address, &area);
            session.erase(start_address, size)?;
        }
        Command::Write {
            start_address,
            size,
            file,
            verify,
        } => {
            let data = read_file(&file)?;
            let len = size.map(|s| s as usize).unwrap_or(data.len()).min(data.len());
            let data = &data[..len];
            if verify {
                session.write_and_verify(start_address, data, Some(&mut progress_bar))?;
            } else {
                let mut reader = BufReader::new(data);
                session.write(
                    start_address,
                    data.len() as u64,
                    &mut reader,
                    Some(&mut progress_bar),
                )?;
            }
        }
        Command::Read {
            start_address,
            size,
            file,
        } => {
            let area = session.active_area_info()?;
            let size = size_to_end_of_area(size, start_address, &area);
            let out = create_file(&file)?;
            let mut writer = BufWriter::new(out);
            session.read(start_address, size as u64, &mut writer, Some(&mut progress_bar))?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
