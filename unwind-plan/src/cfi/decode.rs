use std::collections::HashMap;

use gimli::{
    BaseAddresses, CieOrFde, CommonInformationEntry, DebugFrame, EhFrame, EndianSlice,
    RunTimeEndian, UnwindSection,
};

use super::execute::Executor;
use super::rules::{Rule, RuleSet};
use crate::elf_section::{ImageSection, SectionKind};
use crate::error::{Error, Result};

type SectionReader<'a> = EndianSlice<'a, RunTimeEndian>;

/// Rules in effect for the address range `[begin, end)` of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiRecord {
    pub begin: u64,
    pub end: u64,
    pub rules: RuleSet,
    /// Register number holding the return address, taken from the CIE
    pub return_address_register: u16,
}

impl CfiRecord {
    pub fn return_address_rule(&self) -> Option<Rule> {
        self.rules.register(self.return_address_register)
    }
}

/// Addresses used to resolve relative pointer encodings
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionAddresses {
    pub section: u64,
    pub text: Option<u64>,
    pub got: Option<u64>,
}

impl SectionAddresses {
    fn bases(&self, kind: SectionKind) -> BaseAddresses {
        let mut bases = BaseAddresses::default();
        if kind == SectionKind::EhFrame {
            bases = bases.set_eh_frame(self.section);
        }
        if let Some(text) = self.text {
            bases = bases.set_text(text);
        }
        if let Some(got) = self.got {
            bases = bases.set_got(got);
        }
        bases
    }
}

/// Decodes and executes every FDE of a located section
pub fn decode_image_section(section: &ImageSection, base: u64) -> Result<Vec<CfiRecord>> {
    let addresses = SectionAddresses {
        section: section.address,
        text: section.text_address,
        got: section.got_address,
    };
    decode(
        &section.data,
        section.endian,
        base,
        section.pointer_width,
        section.kind,
        &addresses,
    )
}

/// Decodes CFI records from raw section bytes.
///
/// `base` is added to every FDE's initial address. Records come back in
/// section order; zero-length FDEs are dropped.
pub fn decode(
    data: &[u8],
    endian: RunTimeEndian,
    base: u64,
    pointer_width: u8,
    kind: SectionKind,
    addresses: &SectionAddresses,
) -> Result<Vec<CfiRecord>> {
    if !matches!(pointer_width, 4 | 8) {
        return Err(Error::UnsupportedArchitecture(format!(
            "pointer width {}",
            pointer_width
        )));
    }
    if data.is_empty() {
        return Err(Error::MalformedSection(format!("empty {} section", kind.name())));
    }

    let bases = addresses.bases(kind);
    let records = match kind {
        SectionKind::EhFrame => {
            let mut eh_frame = EhFrame::new(data, endian);
            eh_frame.set_address_size(pointer_width);
            decode_entries(&eh_frame, &bases, base)?
        }
        SectionKind::DebugFrame => {
            let mut debug_frame = DebugFrame::new(data, endian);
            debug_frame.set_address_size(pointer_width);
            decode_entries(&debug_frame, &bases, base)?
        }
    };

    if records.is_empty() {
        return Err(Error::MalformedSection(format!(
            "no frame description entries in {}",
            kind.name()
        )));
    }
    Ok(records)
}

/// End state of a CIE's initial instructions, shared by all its FDEs
#[derive(Clone)]
struct CieState {
    rules: RuleSet,
    return_address_register: u16,
}

fn execute_cie<'a, S>(
    section: &S,
    bases: &BaseAddresses,
    cie: &CommonInformationEntry<SectionReader<'a>>,
) -> Result<CieState>
where
    S: UnwindSection<SectionReader<'a>>,
{
    let empty = RuleSet::default();
    let executor = Executor::new(&empty, RuleSet::default(), cie.data_alignment_factor());
    let rules = executor.run(cie.instructions(section, bases))?;
    Ok(CieState {
        rules,
        return_address_register: cie.return_address_register().0,
    })
}

fn decode_entries<'a, S>(section: &S, bases: &BaseAddresses, base: u64) -> Result<Vec<CfiRecord>>
where
    S: UnwindSection<SectionReader<'a>>,
{
    let mut cies: HashMap<usize, CieState> = HashMap::new();
    let mut records = Vec::new();

    let mut entries = section.entries(bases);
    while let Some(entry) = entries.next()? {
        match entry {
            CieOrFde::Cie(cie) => {
                if !cies.contains_key(&cie.offset()) {
                    let state = execute_cie(section, bases, &cie)?;
                    cies.insert(cie.offset(), state);
                }
            }
            CieOrFde::Fde(partial) => {
                let fde = partial
                    .parse(|section, bases, offset| section.cie_from_offset(bases, offset))?;

                let cie = fde.cie();
                let cie_state = match cies.get(&cie.offset()) {
                    Some(state) => state.clone(),
                    None => {
                        let state = execute_cie(section, bases, cie)?;
                        cies.insert(cie.offset(), state.clone());
                        state
                    }
                };

                let begin = base.wrapping_add(fde.initial_address());
                let end = match begin.checked_add(fde.len()) {
                    Some(end) if end > begin => end,
                    _ => {
                        tracing::trace!(
                            "Dropping FDE at {:#x} with length {:#x}",
                            begin,
                            fde.len()
                        );
                        continue;
                    }
                };

                let executor = Executor::new(
                    &cie_state.rules,
                    cie_state.rules.clone(),
                    cie.data_alignment_factor(),
                );
                let rules = executor.run(fde.instructions(section, bases))?;

                records.push(CfiRecord {
                    begin,
                    end,
                    rules,
                    return_address_register: cie_state.return_address_register,
                });
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfi::rules::CfaRule;
    use gimli::write::{
        Address, CallFrameInstruction, CommonInformationEntry, DebugFrame as DebugFrameWriter,
        EhFrame as EhFrameWriter, EndianVec, FrameDescriptionEntry, FrameTable,
    };
    use gimli::{Encoding, Format, LittleEndian, Register};

    const RSP: Register = Register(7);
    const RBP: Register = Register(6);
    const RA: Register = Register(16);

    fn x86_64_cie() -> CommonInformationEntry {
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

    fn write_eh_frame(table: &FrameTable) -> Vec<u8> {
        let mut eh_frame = EhFrameWriter::from(EndianVec::new(LittleEndian));
        table.write_eh_frame(&mut eh_frame).unwrap();
        eh_frame.0.into_vec()
    }

    fn write_debug_frame(table: &FrameTable) -> Vec<u8> {
        let mut debug_frame = DebugFrameWriter::from(EndianVec::new(LittleEndian));
        table.write_debug_frame(&mut debug_frame).unwrap();
        debug_frame.0.into_vec()
    }

    /// Two functions: a frame-pointer function and a leaf
    fn sample_section() -> Vec<u8> {
        let mut table = FrameTable::default();
        let cie_id = table.add_cie(x86_64_cie());

        let mut fde = FrameDescriptionEntry::new(Address::Constant(0x1000), 0x40);
        fde.add_instruction(1, CallFrameInstruction::CfaOffset(16));
        fde.add_instruction(1, CallFrameInstruction::Offset(RBP, -16));
        fde.add_instruction(4, CallFrameInstruction::CfaRegister(RBP));
        table.add_fde(cie_id, fde);

        let leaf = FrameDescriptionEntry::new(Address::Constant(0x1040), 0x10);
        table.add_fde(cie_id, leaf);

        write_eh_frame(&table)
    }

    fn decode_eh_frame(data: &[u8], base: u64) -> Result<Vec<CfiRecord>> {
        decode(
            data,
            RunTimeEndian::Little,
            base,
            8,
            SectionKind::EhFrame,
            &SectionAddresses::default(),
        )
    }

    #[test]
    fn test_decode_records() {
        let data = sample_section();
        let records = decode_eh_frame(&data, 0).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!((first.begin, first.end), (0x1000, 0x1040));
        assert_eq!(first.return_address_register, 16);
        assert_eq!(first.return_address_rule(), Some(Rule::Offset(-8)));
        assert_eq!(first.rules.register(6), Some(Rule::Offset(-16)));
        assert_eq!(
            first.rules.cfa(),
            CfaRule::RegisterAndOffset {
                register: 6,
                offset: 16
            }
        );

        let leaf = &records[1];
        assert_eq!((leaf.begin, leaf.end), (0x1040, 0x1050));
        assert_eq!(
            leaf.rules.cfa(),
            CfaRule::RegisterAndOffset {
                register: 7,
                offset: 8
            }
        );
        assert_eq!(leaf.rules.register(6), None);
        assert_eq!(leaf.return_address_rule(), Some(Rule::Offset(-8)));
        assert!(!leaf.rules.shares_registers_with(&first.rules));
    }

    #[test]
    fn test_base_is_added() {
        let data = sample_section();
        let records = decode_eh_frame(&data, 0x7f00_0000_0000).unwrap();
        assert_eq!(records[0].begin, 0x7f00_0000_1000);
        assert_eq!(records[1].end, 0x7f00_0000_1050);
    }

    #[test]
    fn test_zero_length_fde_is_dropped() {
        let mut table = FrameTable::default();
        let cie_id = table.add_cie(x86_64_cie());
        table.add_fde(cie_id, FrameDescriptionEntry::new(Address::Constant(0x2000), 0));
        table.add_fde(cie_id, FrameDescriptionEntry::new(Address::Constant(0x2000), 8));
        let data = write_eh_frame(&table);

        let records = decode_eh_frame(&data, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].begin, records[0].end), (0x2000, 0x2008));
    }

    #[test]
    fn test_empty_section() {
        let err = decode_eh_frame(&[], 0).unwrap_err();
        assert!(matches!(err, Error::MalformedSection(_)));
    }

    #[test]
    fn test_section_without_fdes() {
        let mut table = FrameTable::default();
        table.add_cie(x86_64_cie());
        let data = write_eh_frame(&table);
        let err = decode_eh_frame(&data, 0).unwrap_err();
        assert!(matches!(err, Error::MalformedSection(_)));
    }

    #[test]
    fn test_unsupported_pointer_width() {
        let data = sample_section();
        for width in [0, 2, 16] {
            let err = decode(
                &data,
                RunTimeEndian::Little,
                0,
                width,
                SectionKind::EhFrame,
                &SectionAddresses::default(),
            )
            .unwrap_err();
            assert!(matches!(err, Error::UnsupportedArchitecture(_)));
        }
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let data = sample_section();
        for cut in [1, 3, 7, data.len() - 1, data.len() - 5] {
            let err = decode_eh_frame(&data[..cut], 0).unwrap_err();
            assert!(
                matches!(err, Error::MalformedSection(_)),
                "cut at {}: {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_undefined_return_address() {
        let mut table = FrameTable::default();
        let cie_id = table.add_cie(x86_64_cie());
        let mut start = FrameDescriptionEntry::new(Address::Constant(0x3000), 0x20);
        start.add_instruction(0, CallFrameInstruction::Undefined(RA));
        table.add_fde(cie_id, start);
        let data = write_eh_frame(&table);

        let records = decode_eh_frame(&data, 0).unwrap();
        assert_eq!(records[0].return_address_rule(), Some(Rule::Undefined));
    }

    #[test]
    fn test_decode_debug_frame() {
        let mut table = FrameTable::default();
        let cie_id = table.add_cie(x86_64_cie());
        let mut fde = FrameDescriptionEntry::new(Address::Constant(0x1000), 0x40);
        fde.add_instruction(1, CallFrameInstruction::CfaOffset(16));
        table.add_fde(cie_id, fde);
        let data = write_debug_frame(&table);

        let records = decode(
            &data,
            RunTimeEndian::Little,
            0x10,
            8,
            SectionKind::DebugFrame,
            &SectionAddresses::default(),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].begin, records[0].end), (0x1010, 0x1050));
        assert_eq!(
            records[0].rules.cfa(),
            CfaRule::RegisterAndOffset {
                register: 7,
                offset: 16
            }
        );
        assert_eq!(records[0].return_address_rule(), Some(Rule::Offset(-8)));
    }
}
