use crate::ScriptKind;
use crate::constants::ConstantTable;
use crate::cursor::InstructionCursor;
use crate::tables;

use super::{Entry, Framing, InstructionSet, Revision, Tables, event_trigger_procedure, find_extended, find_opcode};

const EVT_END: u8 = 0x01;
const AOT_SET: u8 = 0x28;
pub const EXTENDED_PREFIX: u8 = 0x90;

static CONSTANTS: ConstantTable = ConstantTable::new(tables::BIOCV_SYMBOLS);

/// Offset tables use 32-bit words; opcode `0x90` selects a second table through
/// the byte that follows it.
pub struct BioCv;

impl InstructionSet for BioCv {
    fn revision(&self) -> Revision {
        Revision::BioCv
    }

    fn tables(&self) -> Tables {
        Tables {
            opcodes: tables::BIOCV_OPCODES,
            events: tables::BIOCV_EVENTS,
            extended: tables::BIOCV_EXTENDED,
        }
    }

    fn constants(&self) -> &'static ConstantTable {
        &CONSTANTS
    }

    fn framing(&self, _kind: ScriptKind) -> Framing {
        Framing::OffsetTable { word_size: 4 }
    }

    fn terminal_opcode(&self) -> Option<u8> {
        Some(EVT_END)
    }

    fn instruction_length(&self, opcode: u8, lookahead: Option<u8>, is_event: bool) -> Option<usize> {
        if is_event {
            return None;
        }
        if opcode == EXTENDED_PREFIX {
            let ext = find_extended(tables::BIOCV_EXTENDED, opcode, lookahead?)?;
            return ext.size.map(|s| s as usize);
        }
        find_opcode(tables::BIOCV_OPCODES, opcode).map(|d| d.size as usize)
    }

    fn entry(&self, bytes: &[u8], is_event: bool) -> Option<Entry> {
        if is_event {
            return None;
        }
        let opcode = *bytes.first()?;
        if opcode == EXTENDED_PREFIX {
            return find_extended(tables::BIOCV_EXTENDED, opcode, *bytes.get(1)?).map(Entry::from);
        }
        find_opcode(tables::BIOCV_OPCODES, opcode).map(Entry::from)
    }

    fn resolve_operand(
        &self,
        kind: ScriptKind,
        opcode: u8,
        operand: usize,
        cursor: &mut InstructionCursor<'_>,
    ) -> Option<String> {
        match (opcode, operand) {
            (AOT_SET, 12) => event_trigger_procedure(self, kind, 1, cursor),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Flow;

    #[test]
    fn extended_codes_select_secondary_table() {
        let isa = BioCv;
        assert_eq!(isa.instruction_length(EXTENDED_PREFIX, Some(0x00), false), Some(8));
        assert_eq!(isa.instruction_length(EXTENDED_PREFIX, Some(0x03), false), Some(6));
        assert_eq!(isa.signature(&[0x90, 0x03], false).unwrap().mnemonic, "ext_subtitle");
        assert_eq!(isa.flow(&[0x90, 0x0b], false), Flow::Condition);
    }

    #[test]
    fn unknown_extended_lengths_are_never_guessed() {
        let isa = BioCv;
        assert_eq!(isa.instruction_length(EXTENDED_PREFIX, Some(0x05), false), None);
        // the entry exists but has no size
        let entry = isa.entry(&[0x90, 0x05], false).unwrap();
        assert_eq!(entry.size, None);
        assert_eq!(entry.signature.mnemonic, "ext_unknown_05");
        // selector missing from the table, or no selector at all
        assert_eq!(isa.instruction_length(EXTENDED_PREFIX, Some(0x7f), false), None);
        assert_eq!(isa.instruction_length(EXTENDED_PREFIX, None, false), None);
    }

    #[test]
    fn aot_set_names_event_procedure() {
        let mut bytes = vec![0u8; 22];
        bytes[0] = AOT_SET;
        bytes[2] = 0x05;
        // byte 18 is the trigger's own u8, the procedure index follows it
        bytes[18] = 0x07;
        bytes[19] = 0x02;
        let sig = BioCv.signature(&bytes, false).unwrap();
        let mut c = InstructionCursor::new(&bytes);
        c.seek(sig.operand_offset(12));
        assert_eq!(c.position(), 19);
        let name = BioCv.resolve_operand(ScriptKind::Main, AOT_SET, 12, &mut c);
        assert_eq!(name.as_deref(), Some("main_02"));
        assert_eq!(c.position(), 20);

        let mut c = InstructionCursor::new(&bytes);
        c.seek(sig.operand_offset(11));
        assert_eq!(BioCv.resolve_operand(ScriptKind::Main, AOT_SET, 11, &mut c), None);
        assert_eq!(c.position(), 18);
    }
}
