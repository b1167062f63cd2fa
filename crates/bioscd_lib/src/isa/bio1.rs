use crate::ScriptKind;
use crate::constants::{ConstantTable, SymbolClass};
use crate::cursor::InstructionCursor;
use crate::tables;

use super::{Framing, InstructionSet, Revision, Tables};

const AOT_SET: u8 = 0x12;
const AOT_RESET: u8 = 0x17;

static CONSTANTS: ConstantTable = ConstantTable::new(tables::BIO1_SYMBOLS);

/// First generation scripts: a length-prefixed init/main blob and event scripts
/// built from nested event opcodes.
pub struct Bio1;

impl InstructionSet for Bio1 {
    fn revision(&self) -> Revision {
        Revision::Bio1
    }

    fn tables(&self) -> Tables {
        Tables {
            opcodes: tables::BIO1_OPCODES,
            events: tables::BIO1_EVENTS,
            extended: tables::BIO1_EXTENDED,
        }
    }

    fn constants(&self) -> &'static ConstantTable {
        &CONSTANTS
    }

    fn framing(&self, kind: ScriptKind) -> Framing {
        match kind {
            ScriptKind::Init | ScriptKind::Main => Framing::Flat,
            ScriptKind::Event => Framing::Events,
        }
    }

    fn resolve_operand(
        &self,
        _kind: ScriptKind,
        opcode: u8,
        operand: usize,
        cursor: &mut InstructionCursor<'_>,
    ) -> Option<String> {
        if !matches!((opcode, operand), (AOT_SET | AOT_RESET, 5)) {
            return None;
        }
        // item triggers carry the item type in their data byte
        cursor.transaction(|c| {
            let sce = c.byte_at(2)? as u16;
            if Some(sce) != CONSTANTS.resolve_name("SCE_ITEM") {
                return None;
            }
            let value = c.read_u8().ok()?;
            CONSTANTS.resolve(SymbolClass::Item, value as u16)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Flow;

    #[test]
    fn event_lengths_use_lookahead() {
        let isa = Bio1;
        // evt_block with a 6 byte run
        assert_eq!(isa.instruction_length(0xf8, Some(6), true), Some(8));
        assert_eq!(isa.instruction_length(0xf8, None, true), None);
        // evt_do: header of three bytes
        assert_eq!(isa.instruction_length(0xfc, Some(4), true), Some(7));
        assert_eq!(isa.instruction_length(0xff, None, true), Some(1));
        // ordinary opcodes are not event opcodes
        assert_eq!(isa.instruction_length(0x01, Some(2), true), None);
        assert_eq!(isa.instruction_length(0xf8, Some(6), false), None);
    }

    #[test]
    fn event_flows() {
        assert_eq!(Bio1.flow(&[0xf8], true), Flow::Block);
        assert_eq!(Bio1.flow(&[0xfa], true), Flow::Single);
        assert_eq!(Bio1.flow(&[0xfc], true), Flow::Loop);
        assert_eq!(Bio1.flow(&[0xff], true), Flow::End);
        assert_eq!(Bio1.flow(&[0x01], false), Flow::If);
    }

    #[test]
    fn item_trigger_data_names_item() {
        // aot_set id=1 SCE_ITEM SAT_PL x=0 z=0 data=ITEM_BERETTA
        let bytes = [AOT_SET, 0x01, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(8);
        let name = Bio1.resolve_operand(ScriptKind::Main, AOT_SET, 5, &mut c);
        assert_eq!(name.as_deref(), Some("ITEM_BERETTA"));
        assert_eq!(c.position(), 9);

        let door = [AOT_SET, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00];
        let mut c = InstructionCursor::new(&door);
        c.seek(8);
        assert_eq!(Bio1.resolve_operand(ScriptKind::Main, AOT_SET, 5, &mut c), None);
        assert_eq!(c.position(), 8);
    }
}
