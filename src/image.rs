//! Block layout of the flash image and assembly of the three output buffers.

use eyre::{Result, ensure};
use tracing::info;

use crate::nsih::{HEADER_LEN, Header};

/// Addressing unit of the boot ROM's storage layout.
pub const BLOCK_SIZE: usize = 512;

// Block positions within the image, 0-indexed.
pub const FIRST_STAGE_HEADER_BLOCK: usize = 0;
pub const FIRST_STAGE_PAYLOAD_BLOCK: usize = 1;
pub const BOOTLOADER_HEADER_BLOCK: usize = 63;
pub const BOOTLOADER_PAYLOAD_BLOCK: usize = 64;

const FIRST_STAGE_HEADER_OFFSET: usize = FIRST_STAGE_HEADER_BLOCK * BLOCK_SIZE;
const FIRST_STAGE_PAYLOAD_OFFSET: usize = FIRST_STAGE_PAYLOAD_BLOCK * BLOCK_SIZE;
const BOOTLOADER_HEADER_OFFSET: usize = BOOTLOADER_HEADER_BLOCK * BLOCK_SIZE;
const BOOTLOADER_PAYLOAD_OFFSET: usize = BOOTLOADER_PAYLOAD_BLOCK * BLOCK_SIZE;

const _: () = assert!(HEADER_LEN == BLOCK_SIZE);
const _: () = assert!(BOOTLOADER_HEADER_OFFSET == 0x7E00);
const _: () = assert!(BOOTLOADER_PAYLOAD_OFFSET == 0x8000);

/// Safety ceiling on any assembled image; real images sit far below this.
pub const MAX_IMAGE_SIZE: usize = 32 * 1024 * 1024;

/// Storage offset the boot ROM fetches the bootloader from.
pub const DEVICE_ADDR: u32 = 0x0000_8000;
/// Entry point of the second-stage bootloader.
pub const ENTRY_ADDR: u32 = 0x43C0_0000;
/// AArch64 load target, one block below the entry point.
pub const AARCH64_LOAD_ADDR: u32 = 0x43BF_FE00;

/// Slack added to the bootloader length before rounding `loadsize`: two
/// spare blocks so the ROM's copy never comes up short.
const LOAD_SIZE_SLACK: usize = 2 * BLOCK_SIZE;

/// Execution width the CPU launches the bootloader in; selects the header
/// patch policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    Aarch32,
    Aarch64,
}

impl LaunchMode {
    /// The CLI flag is an arbitrary integer; only its positivity matters.
    pub fn from_flag(flag: i32) -> Self {
        if flag > 0 { LaunchMode::Aarch64 } else { LaunchMode::Aarch32 }
    }
}

/// Rounds `n` up to the next multiple of the block size.
pub fn round_up_to_block(n: usize) -> usize {
    n.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Builds the combined image: first-stage header+payload at blocks 0/1,
/// bootloader header+payload at blocks 63/64, all other bytes zero. The
/// bootloader's header copy is patched; the first-stage copy is left exactly
/// as parsed. Total length is the bootloader payload offset plus its raw
/// (unrounded) length.
pub fn assemble_master(
    header: &[u8; HEADER_LEN],
    first_stage: &[u8],
    bootloader: &[u8],
    mode: LaunchMode,
) -> Result<Vec<u8>> {
    let first_stage_room = BOOTLOADER_HEADER_OFFSET - FIRST_STAGE_PAYLOAD_OFFSET;
    ensure!(
        first_stage.len() <= first_stage_room,
        "first-stage payload is {} bytes but only {} fit below the bootloader header block",
        first_stage.len(),
        first_stage_room
    );
    let total = BOOTLOADER_PAYLOAD_OFFSET + bootloader.len();
    ensure!(
        total <= MAX_IMAGE_SIZE,
        "image would be {total} bytes, above the {MAX_IMAGE_SIZE} byte ceiling"
    );

    let mut image = vec![0u8; total];
    image[FIRST_STAGE_HEADER_OFFSET..FIRST_STAGE_HEADER_OFFSET + HEADER_LEN]
        .copy_from_slice(header);
    image[FIRST_STAGE_PAYLOAD_OFFSET..FIRST_STAGE_PAYLOAD_OFFSET + first_stage.len()]
        .copy_from_slice(first_stage);
    image[BOOTLOADER_HEADER_OFFSET..BOOTLOADER_HEADER_OFFSET + HEADER_LEN]
        .copy_from_slice(header);
    image[BOOTLOADER_PAYLOAD_OFFSET..].copy_from_slice(bootloader);

    let mut hdr = Header::of(&mut image[BOOTLOADER_HEADER_OFFSET..BOOTLOADER_PAYLOAD_OFFSET]);
    hdr.set_device_addr(DEVICE_ADDR);
    hdr.set_load_size(round_up_to_block(bootloader.len() + LOAD_SIZE_SLACK) as u32);
    match mode {
        LaunchMode::Aarch64 => {
            // Once in AArch64 the core cannot take the reset-vector jump
            // again, so the image lands one block early and launch targets
            // the bootloader entry itself.
            hdr.set_load_addr(AARCH64_LOAD_ADDR);
            hdr.set_launch_addr(ENTRY_ADDR);
        }
        LaunchMode::Aarch32 => {
            // AArch32 can re-enter the vector, which jumps on to the entry.
            hdr.set_load_addr(ENTRY_ADDR);
            hdr.set_launch_addr(ENTRY_ADDR);
        }
    }
    info!("bootloader loadsize: {} bytes", hdr.load_size());
    info!("bootloader loadaddr: {:#010x}", hdr.load_addr());
    info!("bootloader launchaddr: {:#010x}", hdr.launch_addr());

    Ok(image)
}

/// Repositions the patched bootloader header+payload from the master image to
/// blocks 0/1, the shape a first stage loading over USB or mass storage
/// expects. No header-guided load happens on that path, so `loadsize` is the
/// exact payload length and load and launch addresses coincide.
pub fn bootloader_image(master: &[u8], bootloader_len: usize) -> Vec<u8> {
    let mut image = vec![0u8; FIRST_STAGE_PAYLOAD_OFFSET + bootloader_len];
    image[FIRST_STAGE_HEADER_OFFSET..FIRST_STAGE_HEADER_OFFSET + HEADER_LEN]
        .copy_from_slice(&master[BOOTLOADER_HEADER_OFFSET..BOOTLOADER_HEADER_OFFSET + HEADER_LEN]);
    image[FIRST_STAGE_PAYLOAD_OFFSET..]
        .copy_from_slice(&master[BOOTLOADER_PAYLOAD_OFFSET..BOOTLOADER_PAYLOAD_OFFSET + bootloader_len]);

    let mut hdr = Header::of(&mut image[FIRST_STAGE_HEADER_OFFSET..FIRST_STAGE_PAYLOAD_OFFSET]);
    hdr.set_load_size(bootloader_len as u32);
    hdr.set_load_addr(ENTRY_ADDR);
    hdr.set_launch_addr(ENTRY_ADDR);
    image
}

/// The first-stage header+payload prefix of the master image, byte for byte.
pub fn first_stage_image(master: &[u8], first_stage_len: usize) -> Vec<u8> {
    master[..FIRST_STAGE_PAYLOAD_OFFSET + first_stage_len].to_vec()
}
