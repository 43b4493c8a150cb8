//! Image classification: is this file a loadable image, and for which architectures.
//!
//! [`MachOClassifier`] reads only the fixed header fields (magic, CPU type and
//! subtype, file type) of thin images and of every slice of a fat container.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::utils::config::MAX_FAT_SLICES;
use crate::{Classification, ImageKind, Slice};

/// Capability the discovery stage calls into for every walked file.
pub trait Classify: Send + Sync {
    fn classify(&self, path: &Path) -> io::Result<Classification>;
}

const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_MAGIC_64: u32 = 0xcafe_babf;
const MH_MAGIC: u32 = 0xfeed_face;
const MH_MAGIC_64: u32 = 0xfeed_facf;

const CPU_ARCH_ABI64: u32 = 0x0100_0000;
const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

const CPU_TYPE_X86: u32 = 7;
const CPU_TYPE_ARM: u32 = 12;
const CPU_TYPE_POWERPC: u32 = 18;

/// Short architecture tag for a slice header, or None for architectures we do not dump.
pub fn arch_tag(cpu_type: u32, cpu_subtype: u32) -> Option<&'static str> {
    let sub = cpu_subtype & !CPU_SUBTYPE_MASK;
    match (cpu_type, sub) {
        (CPU_TYPE_X86, _) => Some("i386"),
        (t, 8) if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => Some("x86_64h"),
        (t, _) if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => Some("x86_64"),
        (t, 2) if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => Some("arm64e"),
        (t, _) if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => Some("arm64"),
        (t, _) if t == CPU_TYPE_ARM | CPU_ARCH_ABI64_32 => Some("arm64_32"),
        (CPU_TYPE_ARM, 9) => Some("armv7"),
        (CPU_TYPE_ARM, 11) => Some("armv7s"),
        (CPU_TYPE_ARM, 12) => Some("armv7k"),
        (CPU_TYPE_POWERPC, _) => Some("ppc"),
        (t, _) if t == CPU_TYPE_POWERPC | CPU_ARCH_ABI64 => Some("ppc64"),
        _ => None,
    }
}

/// Header-level Mach-O reader. Fat container first, then thin image, else not an image.
#[derive(Clone, Copy, Debug, Default)]
pub struct MachOClassifier;

impl Classify for MachOClassifier {
    fn classify(&self, path: &Path) -> io::Result<Classification> {
        let mut file = File::open(path)?;
        let Some(magic) = read_array::<4>(&mut file)? else {
            return Ok(Classification::NotAnImage);
        };
        match u32::from_be_bytes(magic) {
            FAT_MAGIC => read_fat(&mut file, false),
            FAT_MAGIC_64 => read_fat(&mut file, true),
            _ => {
                file.seek(SeekFrom::Start(0))?;
                Ok(match read_thin(&mut file)? {
                    Some(slice) => Classification::Image {
                        fat: false,
                        slices: vec![slice],
                    },
                    None => Classification::NotAnImage,
                })
            }
        }
    }
}

/// Read exactly N bytes, or None on a short file.
fn read_array<const N: usize>(r: &mut impl Read) -> io::Result<Option<[u8; N]>> {
    let mut buf = [0u8; N];
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Thin header at the current position: magic, cputype, cpusubtype, filetype (either byte order).
fn read_thin(r: &mut impl Read) -> io::Result<Option<Slice>> {
    let Some(hdr) = read_array::<16>(r)? else {
        return Ok(None);
    };
    let word = |i: usize| [hdr[i], hdr[i + 1], hdr[i + 2], hdr[i + 3]];
    let decode: fn([u8; 4]) -> u32 = match u32::from_le_bytes(word(0)) {
        MH_MAGIC | MH_MAGIC_64 => u32::from_le_bytes,
        _ => match u32::from_be_bytes(word(0)) {
            MH_MAGIC | MH_MAGIC_64 => u32::from_be_bytes,
            _ => return Ok(None),
        },
    };
    Ok(Some(Slice {
        cpu_type: decode(word(4)),
        cpu_subtype: decode(word(8)),
        kind: ImageKind::from_filetype(decode(word(12))),
    }))
}

/// Fat header (big-endian) after the magic. Every listed slice must carry a valid thin header.
fn read_fat(file: &mut File, wide: bool) -> io::Result<Classification> {
    let Some(count) = read_array::<4>(file)? else {
        return Ok(Classification::NotAnImage);
    };
    let count = u32::from_be_bytes(count);
    if count == 0 || count > MAX_FAT_SLICES {
        return Ok(Classification::NotAnImage);
    }

    let mut offsets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = if wide {
            // cputype, cpusubtype, offset (u64), size (u64), align, reserved
            let Some(arch) = read_array::<32>(file)? else {
                return Ok(Classification::NotAnImage);
            };
            let mut off = [0u8; 8];
            off.copy_from_slice(&arch[8..16]);
            u64::from_be_bytes(off)
        } else {
            // cputype, cpusubtype, offset, size, align
            let Some(arch) = read_array::<20>(file)? else {
                return Ok(Classification::NotAnImage);
            };
            u64::from(u32::from_be_bytes([arch[8], arch[9], arch[10], arch[11]]))
        };
        offsets.push(offset);
    }

    let mut slices = Vec::with_capacity(offsets.len());
    for offset in offsets {
        file.seek(SeekFrom::Start(offset))?;
        match read_thin(file)? {
            Some(slice) => slices.push(slice),
            None => return Ok(Classification::NotAnImage),
        }
    }
    Ok(Classification::Image { fat: true, slices })
}
