use crate::ScriptKind;
use crate::constants::{ConstantTable, SymbolClass};
use crate::cursor::InstructionCursor;
use crate::tables;

use super::{Framing, InstructionSet, Revision, Tables, event_trigger_procedure};

const EVT_END: u8 = 0x01;
const AOT_SET: u8 = 0x28;
const AOT_RESET: u8 = 0x2a;
const MEMBER_SET: u8 = 0x57;

static CONSTANTS: ConstantTable = ConstantTable::new(tables::BIO3_SYMBOLS);

pub struct Bio3;

impl InstructionSet for Bio3 {
    fn revision(&self) -> Revision {
        Revision::Bio3
    }

    fn tables(&self) -> Tables {
        Tables {
            opcodes: tables::BIO3_OPCODES,
            events: tables::BIO3_EVENTS,
            extended: tables::BIO3_EXTENDED,
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
            (AOT_SET, 11) => event_trigger_procedure(self, kind, 1, cursor),
            (AOT_RESET, 3) => cursor.transaction(|c| {
                let name = event_trigger_procedure(self, kind, 1, c)?;
                (c.read_u8().ok()? == 0).then_some(name)
            }),
            // member_set M_TYPE, n: n is an enemy type
            (MEMBER_SET, 1) => cursor.transaction(|c| {
                let member = c.byte_at(1)?;
                if Some(member as u16) != CONSTANTS.resolve_name("M_TYPE") {
                    return None;
                }
                let value = c.read_i16().ok()?;
                let value = u16::try_from(value).ok()?;
                CONSTANTS.resolve(SymbolClass::Enemy, value)
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
    fn control_flow_layout() {
        let isa = Bio3;
        assert_eq!(isa.flow(&[0x0e], false), Flow::For);
        assert_eq!(isa.flow(&[0x0f], false), Flow::Next);
        assert_eq!(isa.flow(&[0x4c], false), Flow::Condition);
        assert_eq!(isa.signature(&[0x4c], false).unwrap().mnemonic, "ck");
        assert_eq!(isa.instruction_length(0x68, None, false), Some(40));
    }

    #[test]
    fn member_set_type_names_enemy() {
        let bytes = [MEMBER_SET, 0x0a, 0x2c, 0x00];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(2);
        let name = Bio3.resolve_operand(ScriptKind::Main, MEMBER_SET, 1, &mut c);
        assert_eq!(name.as_deref(), Some("ENEMY_NEMESIS_T_TYPE"));
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn member_set_other_members_decline() {
        let bytes = [MEMBER_SET, 0x01, 0x2c, 0x00];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(2);
        assert_eq!(Bio3.resolve_operand(ScriptKind::Main, MEMBER_SET, 1, &mut c), None);
        assert_eq!(c.position(), 2);

        // unnamed enemy type
        let bytes = [MEMBER_SET, 0x0a, 0x7f, 0x00];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(2);
        assert_eq!(Bio3.resolve_operand(ScriptKind::Main, MEMBER_SET, 1, &mut c), None);
        assert_eq!(c.position(), 2);
    }
}
