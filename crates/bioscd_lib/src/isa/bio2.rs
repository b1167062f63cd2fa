use crate::ScriptKind;
use crate::constants::ConstantTable;
use crate::cursor::InstructionCursor;
use crate::tables;

use super::{Framing, InstructionSet, Revision, Tables, event_trigger_procedure};

const EVT_END: u8 = 0x01;
const AOT_SET: u8 = 0x2c;
const AOT_RESET: u8 = 0x46;

static CONSTANTS: ConstantTable = ConstantTable::new(tables::BIO2_SYMBOLS);

pub struct Bio2;

impl InstructionSet for Bio2 {
    fn revision(&self) -> Revision {
        Revision::Bio2
    }

    fn tables(&self) -> Tables {
        Tables {
            opcodes: tables::BIO2_OPCODES,
            events: tables::BIO2_EVENTS,
            extended: tables::BIO2_EXTENDED,
        }
    }

    fn constants(&self) -> &'static ConstantTable {
        &CONSTANTS
    }

    fn framing(&self, _kind: ScriptKind) -> Framing {
        Framing::OffsetTable { word_size: 2 }
    }

    fn terminal_opcode(&self) -> Option<u8> {
        Some(EVT_END)
    }

    fn resolve_operand(
        &self,
        kind: ScriptKind,
        opcode: u8,
        operand: usize,
        cursor: &mut InstructionCursor<'_>,
    ) -> Option<String> {
        match (opcode, operand) {
            // aot_set: the u8 after data1 is the procedure run by an event trigger
            (AOT_SET, 11) => event_trigger_procedure(self, kind, 1, cursor),
            // aot_reset: data0 takes the same role, with a clear high byte
            (AOT_RESET, 3) => cursor.transaction(|c| {
                let name = event_trigger_procedure(self, kind, 1, c)?;
                (c.read_u8().ok()? == 0).then_some(name)
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Flow;

    #[test]
    fn golden_opcodes() {
        let isa = Bio2;
        assert_eq!(isa.instruction_length(0x09, Some(0x0a), false), Some(4));
        assert_eq!(isa.signature(&[0x09], false).unwrap().mnemonic, "sleep");
        assert_eq!(isa.flow(&[0x01, 0x00], false), Flow::End);
        assert_eq!(isa.flow(&[0x21], false), Flow::Condition);
        assert_eq!(isa.instruction_length(0x2c, None, false), Some(20));
    }

    #[test]
    fn symbols_round_trip() {
        let t = Bio2.constants();
        assert_eq!(t.resolve_name("ITEM_KNIFE"), Some(0x01));
        assert_eq!(t.resolve_name("SCE_EVENT"), Some(0x05));
        assert_eq!(t.resolve(crate::SymbolClass::Item, 0x26).as_deref(), Some("ITEM_HERB_G"));
    }

    fn aot_set(sce: u8, proc_index: u8) -> Vec<u8> {
        let mut b = vec![0u8; 20];
        b[0] = AOT_SET;
        b[1] = 0x03;
        b[2] = sce;
        b[3] = 0x01;
        b[17] = proc_index;
        b
    }

    #[test]
    fn aot_set_names_event_procedure() {
        let bytes = aot_set(0x05, 0x03);
        let sig = Bio2.signature(&bytes, false).unwrap();
        let mut c = InstructionCursor::new(&bytes);
        c.seek(sig.operand_offset(11));
        assert_eq!(c.position(), 17);
        let name = Bio2.resolve_operand(ScriptKind::Main, AOT_SET, 11, &mut c);
        assert_eq!(name.as_deref(), Some("main_03"));
        assert_eq!(c.position(), 18);
    }

    #[test]
    fn aot_set_declines_for_other_triggers() {
        let bytes = aot_set(0x01, 0x03);
        let mut c = InstructionCursor::new(&bytes);
        c.seek(17);
        assert_eq!(Bio2.resolve_operand(ScriptKind::Main, AOT_SET, 11, &mut c), None);
        assert_eq!(c.position(), 17);
        assert_eq!(Bio2.resolve_operand(ScriptKind::Main, AOT_SET, 10, &mut c), None);
        assert_eq!(c.position(), 17);
    }

    #[test]
    fn aot_reset_requires_clear_high_byte() {
        let mut bytes = vec![AOT_RESET, 0x02, 0x05, 0x00, 0x04, 0x00, 0, 0, 0, 0];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(4);
        assert_eq!(Bio2.resolve_operand(ScriptKind::Main, AOT_RESET, 3, &mut c).as_deref(), Some("main_04"));
        assert_eq!(c.position(), 6);

        bytes[5] = 0x01;
        let mut c = InstructionCursor::new(&bytes);
        c.seek(4);
        assert_eq!(Bio2.resolve_operand(ScriptKind::Main, AOT_RESET, 3, &mut c), None);
        assert_eq!(c.position(), 4);
    }
}
