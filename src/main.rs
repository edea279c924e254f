//! Boot image packer for the S5P6818: combines a hex-text NSIH header with a
//! first-stage loader and a second-stage bootloader into one bootable flash
//! image, plus the two standalone images used for USB boot debugging.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod emit;
mod image;
mod nsih;

use image::LaunchMode;
use nsih::BootDevice;

/// Command-line arguments.
#[derive(Parser)]
struct Args {
    /// Path where the combined boot image will be written to.
    destination: PathBuf,
    /// NSIH boot header, as hex text.
    nsih: PathBuf,
    /// First-stage loader binary, loaded directly by the boot ROM.
    first_stage: PathBuf,
    /// Second-stage bootloader binary.
    bootloader: PathBuf,
    /// Launch-mode flag; any positive value selects the AArch64 boot path.
    #[arg(default_value_t = 1, allow_negative_numbers = true)]
    launch_mode: i32,
    /// Boot device whose record the header's boot-info region holds.
    #[arg(long, value_enum, default_value_t = BootDevice::SdMmc)]
    device: BootDevice,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let nsih_text = std::fs::read(&args.nsih)
        .wrap_err_with(|| format!("reading NSIH text {}", args.nsih.display()))?;
    let mut header = nsih::parse_header(&nsih_text)?;

    let sig = nsih::signature(&header);
    if sig != nsih::SIGNATURE {
        warn!("header signature is {:02X?}, expected \"NSIH\"", sig);
    }
    info!("boot info: {:?}", nsih::decode_boot_info(&header, args.device));
    {
        let hdr = nsih::Header::of(&mut header);
        info!("first-stage loadaddr: {:#010x}", hdr.load_addr());
        info!("first-stage launchaddr: {:#010x}", hdr.launch_addr());
    }

    let first_stage = std::fs::read(&args.first_stage)
        .wrap_err_with(|| format!("reading first-stage binary {}", args.first_stage.display()))?;
    let bootloader = std::fs::read(&args.bootloader)
        .wrap_err_with(|| format!("reading bootloader binary {}", args.bootloader.display()))?;
    info!("first-stage payload: {} bytes", first_stage.len());
    info!("bootloader payload: {} bytes", bootloader.len());

    let mode = LaunchMode::from_flag(args.launch_mode);
    info!("launch mode: {:?} (flag {})", mode, args.launch_mode);

    let master = image::assemble_master(&header, &first_stage, &bootloader, mode)?;

    let first_stage_path = derived_path(&args.destination, "nsih1_with_bl1_");
    let bootloader_path = derived_path(&args.destination, "nsih2_with_uboot_");

    {
        let img = image::first_stage_image(&master, first_stage.len());
        emit::write_image(&img, &first_stage_path)?;
    }
    {
        let img = image::bootloader_image(&master, bootloader.len());
        emit::write_image(&img, &bootloader_path)?;
    }
    emit::write_image(&master, &args.destination)?;

    info!(
        "generated {}, {} and {}",
        args.destination.display(),
        first_stage_path.display(),
        bootloader_path.display()
    );
    Ok(())
}

/// Prefixes the destination's file name, staying in its directory.
fn derived_path(destination: &Path, prefix: &str) -> PathBuf {
    let mut name = OsString::from(prefix);
    name.push(destination.file_name().unwrap_or_default());
    destination.with_file_name(name)
}
