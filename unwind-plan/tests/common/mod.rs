#![allow(dead_code)]

use std::fs;
use std::path::Path;

use gimli::write::{
    Address, CallFrameInstruction, CommonInformationEntry, DebugFrame, EhFrame, EndianVec,
    FrameDescriptionEntry, FrameTable,
};
use gimli::{Encoding, Format, LittleEndian, Register};
use object::{write, Architecture, BinaryFormat, Endianness, SectionKind};
use unwind_plan::maps::{Mapping, MappingProvider};
use unwind_plan::{Error, Result};

pub const RBP: Register = Register(6);
pub const RSP: Register = Register(7);
pub const RA: Register = Register(16);

/// x86_64 CIE: CFA = rsp + 8, return address at CFA - 8
pub fn x86_64_cie() -> CommonInformationEntry {
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 1,
        address_size: 8,
    };
    let mut cie = CommonInformationEntry::new(encoding, 1, -8, RA);
    cie.add_instruction(CallFrameInstruction::Cfa(RSP, 8));
    cie.add_instruction(CallFrameInstruction::Offset(RA, -8));
    cie
}

pub fn eh_frame_bytes(table: &FrameTable) -> Vec<u8> {
    let mut eh_frame = EhFrame::from(EndianVec::new(LittleEndian));
    table.write_eh_frame(&mut eh_frame).unwrap();
    eh_frame.0.into_vec()
}

pub fn debug_frame_bytes(table: &FrameTable) -> Vec<u8> {
    let mut debug_frame = DebugFrame::from(EndianVec::new(LittleEndian));
    table.write_debug_frame(&mut debug_frame).unwrap();
    debug_frame.0.into_vec()
}

/// `.eh_frame` with one frame-pointer function per start address
pub fn functions_eh_frame(starts: &[u64], len: u32) -> Vec<u8> {
    eh_frame_bytes(&functions_table(starts, len))
}

/// `.debug_frame` with one frame-pointer function per start address
pub fn functions_debug_frame(starts: &[u64], len: u32) -> Vec<u8> {
    debug_frame_bytes(&functions_table(starts, len))
}

fn functions_table(starts: &[u64], len: u32) -> FrameTable {
    let mut table = FrameTable::default();
    let cie_id = table.add_cie(x86_64_cie());
    for &start in starts {
        let mut fde = FrameDescriptionEntry::new(Address::Constant(start), len);
        fde.add_instruction(1, CallFrameInstruction::CfaOffset(16));
        fde.add_instruction(1, CallFrameInstruction::Offset(RBP, -16));
        fde.add_instruction(4, CallFrameInstruction::CfaRegister(RBP));
        table.add_fde(cie_id, fde);
    }
    table
}

/// Relocatable ELF with the given sections
pub fn elf_image(arch: Architecture, sections: &[(&str, &[u8])]) -> Vec<u8> {
    let mut obj = write::Object::new(BinaryFormat::Elf, arch, Endianness::Little);
    for (name, data) in sections {
        let id = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::ReadOnlyData);
        obj.append_section_data(id, data, 8);
    }
    obj.write().unwrap()
}

pub fn x86_64_image(eh_frame: &[u8]) -> Vec<u8> {
    elf_image(Architecture::X86_64, &[(".eh_frame", eh_frame)])
}

/// Writes `bytes` to `<proc_root>/<pid>/root/<path>`
pub fn install(proc_root: &Path, pid: u32, path: &str, bytes: &[u8]) {
    let target = proc_root
        .join(pid.to_string())
        .join("root")
        .join(path.trim_start_matches('/'));
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(target, bytes).unwrap();
}

pub fn mapping(start: u64, path: &str) -> Mapping {
    Mapping {
        start,
        end: start + 0x10000,
        offset: 0,
        path: path.into(),
    }
}

/// Fixed mapping list, the same for every pid
pub struct StaticMappings(pub Vec<Mapping>);

impl MappingProvider for StaticMappings {
    fn mappings_for_process(&self, _pid: u32) -> Result<Vec<Mapping>> {
        Ok(self.0.clone())
    }
}

/// Behaves like a process that already exited
pub struct ExitedProcess;

impl MappingProvider for ExitedProcess {
    fn mappings_for_process(&self, pid: u32) -> Result<Vec<Mapping>> {
        Err(Error::MappingResolution {
            pid,
            reason: "No such process".to_string(),
        })
    }
}
