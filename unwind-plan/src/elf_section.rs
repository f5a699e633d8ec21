//! Locates the call frame information section of an ELF image.

use std::fs::File;
use std::path::Path;

use gimli::RunTimeEndian;
use memmap2::Mmap;
use object::{Architecture, BinaryFormat, Endianness, Object, ObjectSection, ObjectSegment};

use crate::error::{Error, Result};

/// Which CFI section the bytes were read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    EhFrame,
    DebugFrame,
}

impl SectionKind {
    pub fn name(self) -> &'static str {
        match self {
            SectionKind::EhFrame => ".eh_frame",
            SectionKind::DebugFrame => ".debug_frame",
        }
    }
}

/// Raw CFI section of an image plus what is needed to decode it.
///
/// Owns its bytes; the image file is closed once this is returned.
#[derive(Debug, Clone)]
pub struct ImageSection {
    pub kind: SectionKind,
    pub data: Vec<u8>,
    /// Virtual address of the section itself
    pub address: u64,
    pub text_address: Option<u64>,
    pub got_address: Option<u64>,
    pub architecture: Architecture,
    pub endian: RunTimeEndian,
    /// 0 when the architecture is not supported
    pub pointer_width: u8,
    /// Virtual address of the first PT_LOAD segment with file offset 0.
    /// 0x400000-ish for non-PIE executables, 0 for PIE and shared objects.
    pub base_vaddr: u64,
}

/// Pointer width in bytes for `arch`, or 0 if unsupported
pub fn pointer_width(arch: Architecture) -> u8 {
    match arch {
        Architecture::I386 => 4,
        Architecture::X86_64 | Architecture::Aarch64 => 8,
        _ => 0,
    }
}

/// Opens `path` and reads its `.eh_frame` section.
///
/// With `debug_frame_fallback`, images without `.eh_frame` are searched for
/// `.debug_frame` instead.
pub fn locate(path: &Path, debug_frame_fallback: bool) -> Result<ImageSection> {
    let open_err = |reason: String| Error::ImageOpen {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
    // The mapping is dropped before returning, section bytes are copied out.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| open_err(e.to_string()))?;
    drop(file);

    read_section(path, &mmap, debug_frame_fallback)
}

/// Locates the CFI section within in-memory image bytes
pub fn read_section(path: &Path, data: &[u8], debug_frame_fallback: bool) -> Result<ImageSection> {
    let obj = object::File::parse(data).map_err(|e| Error::ImageOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if obj.format() != BinaryFormat::Elf {
        return Err(Error::ImageOpen {
            path: path.to_path_buf(),
            reason: format!("not an ELF image ({:?})", obj.format()),
        });
    }

    let (kind, section) = match obj.section_by_name(SectionKind::EhFrame.name()) {
        Some(section) => (SectionKind::EhFrame, section),
        None => {
            let fallback = debug_frame_fallback
                .then(|| obj.section_by_name(SectionKind::DebugFrame.name()))
                .flatten();
            match fallback {
                Some(section) => (SectionKind::DebugFrame, section),
                None => {
                    return Err(Error::SectionNotFound {
                        path: path.to_path_buf(),
                        section: SectionKind::EhFrame.name(),
                    })
                }
            }
        }
    };

    let bytes = section
        .uncompressed_data()
        .map_err(|e| Error::SectionRead {
            path: path.to_path_buf(),
            section: kind.name(),
            reason: e.to_string(),
        })?
        .into_owned();

    let endian = match obj.endianness() {
        Endianness::Little => RunTimeEndian::Little,
        Endianness::Big => RunTimeEndian::Big,
    };

    let base_vaddr = obj
        .segments()
        .find(|s| s.file_range().0 == 0)
        .map(|s| s.address())
        .unwrap_or(0);

    let architecture = obj.architecture();

    Ok(ImageSection {
        kind,
        data: bytes,
        address: section.address(),
        text_address: obj.section_by_name(".text").map(|s| s.address()),
        got_address: obj.section_by_name(".got").map(|s| s.address()),
        architecture,
        endian,
        pointer_width: pointer_width(architecture),
        base_vaddr,
    })
}
