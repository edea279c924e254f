//! NSIH header handling: hex-text parsing and field access over the
//! 512-byte boot-header record.

use eyre::{Result, bail};
use tracing::{info, warn};

/// Size of the binary NSIH record, one storage block.
pub const HEADER_LEN: usize = 512;

/// Value of the record's trailing signature word.
pub const SIGNATURE: [u8; 4] = *b"NSIH";

/// Byte offsets of the record fields this tool reads or patches. Everything
/// else in the record (vectors, PLL, DDR init, AXI slots) is opaque hex-text
/// payload that passes through untouched.
mod off {
    pub const DEVICE_ADDR: usize = 0x040;
    pub const LOAD_SIZE: usize = 0x044;
    pub const LOAD_ADDR: usize = 0x048;
    pub const LAUNCH_ADDR: usize = 0x04C;
    pub const DEVICE_BOOT_INFO: usize = 0x050;
    pub const SIGNATURE: usize = 0x1FC;
}

const _: () = assert!(off::SIGNATURE + 4 == HEADER_LEN);

// -- SECTION: hex text parsing

struct Scan {
    bytes: Vec<u8>,
    lines: usize,
}

/// Character-level scan of NSIH hex text.
///
/// Each line carries at most one run of hex digits; the first non-hex
/// character flushes the run and skips the rest of the line. Runs of 2, 4 or
/// 8 digits emit that many nibbles as bytes, least-significant byte first;
/// any other length is diagnosed and emits nothing.
fn scan_hex(input: &[u8]) -> Scan {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    let mut value: u32 = 0;
    let mut digits = 0usize;
    let mut skip = false;
    let mut line = 0usize;

    for &ch in input {
        if !skip {
            if let Some(d) = (ch as char).to_digit(16) {
                value = value.wrapping_mul(16).wrapping_add(d);
                digits += 1;
            } else {
                flush_run(&mut bytes, value, digits, line);
                digits = 0;
                skip = true;
            }
        }
        if ch == b'\n' {
            line += 1;
            skip = false;
            value = 0;
            digits = 0;
        }
    }
    if digits > 0 {
        // No terminator before end of input; the run is dropped, matching
        // the boot ROM vendor tooling. Almost certainly a truncated file.
        warn!(
            "line {}: final hex run of {} digits has no terminator and was dropped",
            line + 1,
            digits
        );
    }

    Scan { bytes, lines: line + 1 }
}

fn flush_run(bytes: &mut Vec<u8>, mut value: u32, digits: usize, line: usize) {
    match digits {
        2 | 4 | 8 => {
            for _ in 0..digits / 2 {
                bytes.push((value & 0xFF) as u8);
                value >>= 8;
            }
        }
        0 => {}
        _ => warn!("line {}: hex run of {} digits, expected 2, 4 or 8", line + 1, digits),
    }
}

/// Parses NSIH hex text into the 512-byte record. Malformed runs only warn;
/// producing anything other than exactly 512 bytes is fatal.
pub fn parse_header(input: &[u8]) -> Result<[u8; HEADER_LEN]> {
    let scan = scan_hex(input);
    info!("NSIH: {} lines processed", scan.lines);
    info!("NSIH: {} bytes generated", scan.bytes.len());
    let Ok(header) = <[u8; HEADER_LEN]>::try_from(scan.bytes.as_slice()) else {
        bail!(
            "NSIH text produced {} bytes, expected exactly {}",
            scan.bytes.len(),
            HEADER_LEN
        );
    };
    Ok(header)
}

// -- SECTION: record field access

/// View of one 512-byte NSIH record, in place inside an image buffer. Fields
/// are read and written as little-endian words at their documented offsets.
pub struct Header<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Header<'a> {
    pub fn of(bytes: &'a mut [u8]) -> Self {
        assert_eq!(bytes.len(), HEADER_LEN);
        Header { bytes }
    }

    fn get(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.bytes[offset..offset + 4].try_into().unwrap())
    }

    fn put(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Storage offset the boot ROM reads the payload from.
    pub fn set_device_addr(&mut self, value: u32) {
        self.put(off::DEVICE_ADDR, value);
    }

    pub fn load_size(&self) -> u32 {
        self.get(off::LOAD_SIZE)
    }

    pub fn set_load_size(&mut self, value: u32) {
        self.put(off::LOAD_SIZE, value);
    }

    pub fn load_addr(&self) -> u32 {
        self.get(off::LOAD_ADDR)
    }

    pub fn set_load_addr(&mut self, value: u32) {
        self.put(off::LOAD_ADDR, value);
    }

    pub fn launch_addr(&self) -> u32 {
        self.get(off::LAUNCH_ADDR)
    }

    pub fn set_launch_addr(&mut self, value: u32) {
        self.put(off::LAUNCH_ADDR, value);
    }
}

/// The record's trailing signature word, expected to spell [`SIGNATURE`].
/// Never enforced; the boot ROM is the real arbiter.
pub fn signature(header: &[u8; HEADER_LEN]) -> [u8; 4] {
    header[off::SIGNATURE..].try_into().unwrap()
}

// -- SECTION: device boot info

/// Width of the device boot-info region at 0x050.
const BOOT_INFO_LEN: usize = 12;

/// Which device's boot-info record the header's 0x050 region holds. The
/// record itself carries no tag; the boot path implies it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum BootDevice {
    Nand,
    Spi,
    SdMmc,
    SdFs,
}

#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct NandBootInfo {
    pub addr_step: u8,
    pub tcos: u8,
    pub tacc: u8,
    pub toch: u8,
    pub page_size: u32,
    pub crc32: u32,
}

#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SpiBootInfo {
    pub addr_step: u8,
    reserved0: [u8; 3],
    reserved1: u32,
    pub crc32: u32,
}

#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SdMmcBootInfo {
    pub port_number: u8,
    reserved0: [u8; 3],
    reserved1: u32,
    pub crc32: u32,
}

#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SdFsBootInfo {
    pub boot_file: [u8; BOOT_INFO_LEN],
}

impl std::fmt::Debug for SdFsBootInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdFsBootInfo").field("boot_file", &self.file_name()).finish()
    }
}

const _: () = assert!(size_of::<NandBootInfo>() == BOOT_INFO_LEN);
const _: () = assert!(size_of::<SpiBootInfo>() == BOOT_INFO_LEN);
const _: () = assert!(size_of::<SdMmcBootInfo>() == BOOT_INFO_LEN);
const _: () = assert!(size_of::<SdFsBootInfo>() == BOOT_INFO_LEN);

#[derive(Debug, Copy, Clone)]
pub enum DeviceBootInfo {
    Nand(NandBootInfo),
    Spi(SpiBootInfo),
    SdMmc(SdMmcBootInfo),
    SdFs(SdFsBootInfo),
}

impl SdFsBootInfo {
    /// Boot file name with NUL padding stripped.
    pub fn file_name(&self) -> &str {
        let end = self.boot_file.iter().position(|&b| b == 0).unwrap_or(BOOT_INFO_LEN);
        std::str::from_utf8(&self.boot_file[..end]).unwrap_or("<non-utf8>")
    }
}

/// Decodes the boot-info region as the record for `device`. Diagnostic only;
/// the packing path copies the region verbatim.
pub fn decode_boot_info(header: &[u8; HEADER_LEN], device: BootDevice) -> DeviceBootInfo {
    let region = &header[off::DEVICE_BOOT_INFO..off::DEVICE_BOOT_INFO + BOOT_INFO_LEN];
    match device {
        BootDevice::Nand => DeviceBootInfo::Nand(bytemuck::pod_read_unaligned(region)),
        BootDevice::Spi => DeviceBootInfo::Spi(bytemuck::pod_read_unaligned(region)),
        BootDevice::SdMmc => DeviceBootInfo::SdMmc(bytemuck::pod_read_unaligned(region)),
        BootDevice::SdFs => DeviceBootInfo::SdFs(bytemuck::pod_read_unaligned(region)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_header_text() -> Vec<u8> {
        b"00000000\n".repeat(128)
    }

    #[test]
    fn parses_exactly_512_zero_bytes() {
        let header = parse_header(&zero_header_text()).unwrap();
        assert_eq!(header, [0u8; HEADER_LEN]);
    }

    #[test]
    fn wrong_total_is_fatal() {
        assert!(parse_header(b"00000000\n").is_err());
        assert!(parse_header(&b"00000000\n".repeat(129)).is_err());
    }

    #[test]
    fn emits_little_endian() {
        assert_eq!(scan_hex(b"43C00000\n").bytes, [0x00, 0x00, 0xC0, 0x43]);
        assert_eq!(scan_hex(b"BEEF\n").bytes, [0xEF, 0xBE]);
        assert_eq!(scan_hex(b"AB\n").bytes, [0xAB]);
    }

    #[test]
    fn eight_digit_run_round_trips() {
        let bytes = scan_hex(b"DEADBEEF\n").bytes;
        let value = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(value, 0xDEADBEEF);
        let rehexed = format!("{value:08X}\n");
        assert_eq!(scan_hex(rehexed.as_bytes()).bytes, scan_hex(b"DEADBEEF\n").bytes);
    }

    #[test]
    fn trailing_content_is_ignored() {
        let plain = scan_hex(b"DEADBEEF\n").bytes;
        assert_eq!(scan_hex(b"DEADBEEF // reset vector\n").bytes, plain);
        assert_eq!(scan_hex(b"DEADBEEF\t;x\n").bytes, plain);
        assert_eq!(scan_hex(b"DEADBEEF     \n").bytes, plain);
    }

    #[test]
    fn one_run_per_line() {
        // The first terminator skips the rest of the line.
        assert_eq!(scan_hex(b"AB CD\n").bytes, [0xAB]);
    }

    #[test]
    fn indented_line_emits_nothing() {
        assert!(scan_hex(b" AB\n").bytes.is_empty());
    }

    #[test]
    fn malformed_run_skips_line_but_not_file() {
        let scan = scan_hex(b"ABC\nDEADBEEF\n");
        assert_eq!(scan.bytes, [0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(scan.lines, 3);
    }

    #[test]
    fn unterminated_final_run_is_dropped() {
        assert!(scan_hex(b"DEADBEEF").bytes.is_empty());
        // ...but a terminated final run without a newline is kept.
        assert_eq!(scan_hex(b"DEADBEEF ").bytes, [0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn empty_lines_count_but_emit_nothing() {
        let scan = scan_hex(b"\n\nAB\n");
        assert_eq!(scan.bytes, [0xAB]);
        assert_eq!(scan.lines, 4);
    }

    #[test]
    fn header_fields_read_back() {
        let mut bytes = [0u8; HEADER_LEN];
        let mut header = Header::of(&mut bytes);
        header.set_device_addr(0x0000_8000);
        header.set_load_size(2048);
        header.set_load_addr(0x43BF_FE00);
        header.set_launch_addr(0x43C0_0000);
        assert_eq!(header.load_size(), 2048);
        assert_eq!(header.load_addr(), 0x43BF_FE00);
        assert_eq!(header.launch_addr(), 0x43C0_0000);
        // Little-endian at the documented offsets.
        assert_eq!(bytes[0x040..0x044], [0x00, 0x80, 0x00, 0x00]);
        assert_eq!(bytes[0x048..0x04C], [0x00, 0xFE, 0xBF, 0x43]);
    }

    #[test]
    fn signature_is_last_four_bytes() {
        let mut header = [0u8; HEADER_LEN];
        header[0x1FC..].copy_from_slice(b"NSIH");
        assert_eq!(signature(&header), SIGNATURE);
    }

    #[test]
    fn decodes_sdmmc_boot_info() {
        let mut header = [0u8; HEADER_LEN];
        header[0x050] = 2;
        header[0x058..0x05C].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
        let DeviceBootInfo::SdMmc(info) = decode_boot_info(&header, BootDevice::SdMmc) else {
            panic!("wrong variant");
        };
        assert_eq!(info.port_number, 2);
        assert_eq!(info.crc32, 0xCAFE_F00D);
    }

    #[test]
    fn decodes_nand_boot_info() {
        let mut header = [0u8; HEADER_LEN];
        header[0x050..0x054].copy_from_slice(&[1, 2, 3, 4]);
        header[0x054..0x058].copy_from_slice(&8192u32.to_le_bytes());
        let DeviceBootInfo::Nand(info) = decode_boot_info(&header, BootDevice::Nand) else {
            panic!("wrong variant");
        };
        assert_eq!((info.addr_step, info.tcos, info.tacc, info.toch), (1, 2, 3, 4));
        assert_eq!(info.page_size, 8192);
    }

    #[test]
    fn decodes_sdfs_boot_file_name() {
        let mut header = [0u8; HEADER_LEN];
        header[0x050..0x058].copy_from_slice(b"BOOT.BIN");
        let DeviceBootInfo::SdFs(info) = decode_boot_info(&header, BootDevice::SdFs) else {
            panic!("wrong variant");
        };
        assert_eq!(info.file_name(), "BOOT.BIN");
    }
}
