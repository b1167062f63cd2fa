use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{ConstantTable, Symbol, SymbolClass};
use crate::cursor::{BitCursor, InstructionCursor};
use crate::{ScdError, ScriptKind};

mod bio1;
mod bio2;
mod bio3;
mod biocv;

pub use bio1::Bio1;
pub use bio2::Bio2;
pub use bio3::Bio3;
pub use biocv::BioCv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Revision {
    Bio1,
    Bio2,
    Bio3,
    BioCv,
}

impl Revision {
    pub const ALL: &'static [Revision] = &[Revision::Bio1, Revision::Bio2, Revision::Bio3, Revision::BioCv];

    pub fn name(self) -> &'static str {
        match self {
            Revision::Bio1 => "bio1",
            Revision::Bio2 => "bio2",
            Revision::Bio3 => "bio3",
            Revision::BioCv => "biocv",
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the bytes following the opcode are consumed and displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    U8,
    U16,
    I16,
    /// Alignment byte, always zero in well formed scripts.
    Pad,
    /// Block length counted from the next instruction.
    Br8,
    /// Block length counted from the start of the instruction.
    Br16,
    /// Signed distance from the next instruction.
    Rel16,
    /// Offset from the start of the script buffer.
    Abs16,
    /// Byte length of the condition run that follows.
    CondSize,
    /// Byte length of the inner opcode run of an event opcode.
    Run8,
    Bits,
    Nibbles,
    Angles,
    Sym8(SymbolClass),
    Sym16(SymbolClass),
}

impl OperandKind {
    pub const fn size(self) -> usize {
        match self {
            OperandKind::U8
            | OperandKind::Pad
            | OperandKind::Br8
            | OperandKind::CondSize
            | OperandKind::Run8
            | OperandKind::Bits
            | OperandKind::Nibbles
            | OperandKind::Sym8(_) => 1,
            OperandKind::U16
            | OperandKind::I16
            | OperandKind::Br16
            | OperandKind::Rel16
            | OperandKind::Abs16
            | OperandKind::Sym16(_) => 2,
            OperandKind::Angles => 3,
        }
    }

    pub const fn is_branch(self) -> bool {
        matches!(self, OperandKind::Br8 | OperandKind::Br16 | OperandKind::Rel16 | OperandKind::Abs16)
    }

    /// Framing bytes that structured output leaves out.
    pub const fn is_framing(self) -> bool {
        matches!(self, OperandKind::Pad | OperandKind::CondSize | OperandKind::Run8) || self.is_branch()
    }
}

/// Control-flow role of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flow {
    Plain,
    Condition,
    If,
    Else,
    EndIf,
    While,
    EndWhile,
    Do,
    EndDo,
    Switch,
    Case,
    Default,
    EndSwitch,
    For,
    Next,
    Goto,
    Gosub,
    Return,
    Fork,
    Break,
    End,
    Block,
    Single,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub mnemonic: &'static str,
    /// Opcode bytes preceding the operands.
    pub header_len: u8,
    pub operands: &'static [OperandKind],
}

impl Signature {
    pub fn encoded_len(&self) -> usize {
        self.header_len as usize + self.operands.iter().map(|k| k.size()).sum::<usize>()
    }

    /// Byte position of operand `index` within the instruction.
    pub fn operand_offset(&self, index: usize) -> usize {
        self.header_len as usize + self.operands.iter().take(index).map(|k| k.size()).sum::<usize>()
    }

    pub fn find(&self, pred: impl Fn(OperandKind) -> bool) -> Option<(usize, OperandKind)> {
        self.operands.iter().copied().enumerate().find(|(_, k)| pred(*k))
    }

    pub fn read_operand(&self, index: usize, bytes: &[u8]) -> Option<Value> {
        let kind = *self.operands.get(index)?;
        let mut c = InstructionCursor::new(bytes);
        c.seek(self.operand_offset(index));
        read_value(kind, &mut c).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDef {
    pub code: u8,
    pub size: u8,
    pub flow: Flow,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtDef {
    pub prefix: u8,
    pub code: u8,
    /// `None` for extended codes whose length is not known.
    pub size: Option<u8>,
    pub flow: Flow,
    pub signature: Signature,
}

/// Everything known about one opcode, whichever table it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub size: Option<usize>,
    pub flow: Flow,
    pub signature: &'static Signature,
}

impl From<&'static OpDef> for Entry {
    fn from(d: &'static OpDef) -> Self {
        Entry {
            size: Some(d.size as usize),
            flow: d.flow,
            signature: &d.signature,
        }
    }
}

impl From<&'static ExtDef> for Entry {
    fn from(d: &'static ExtDef) -> Self {
        Entry {
            size: d.size.map(|s| s as usize),
            flow: d.flow,
            signature: &d.signature,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tables {
    pub opcodes: &'static [OpDef],
    pub events: &'static [OpDef],
    pub extended: &'static [ExtDef],
}

/// How a script buffer is split into subroutines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framing {
    /// Leading table of subroutine offsets, `word_size` bytes per entry.
    OffsetTable { word_size: usize },
    /// A length word followed by one subroutine.
    Flat,
    /// One subroutine of event opcodes with nested runs.
    Events,
}

/// A decoded operand value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Unsigned(u16),
    Signed(i16),
    Pair(i16, i16),
    Symbol(Symbol),
}

impl Value {
    pub fn as_u16(self) -> Option<u16> {
        match self {
            Value::Unsigned(v) => Some(v),
            Value::Signed(v) => Some(v as u16),
            Value::Symbol(s) => Some(s.value),
            Value::Pair(..) => None,
        }
    }
}

pub(crate) fn read_value(kind: OperandKind, c: &mut InstructionCursor<'_>) -> Result<Value, ScdError> {
    Ok(match kind {
        OperandKind::U8
        | OperandKind::Pad
        | OperandKind::Br8
        | OperandKind::CondSize
        | OperandKind::Run8
        | OperandKind::Bits => Value::Unsigned(c.read_u8()? as u16),
        OperandKind::U16 | OperandKind::Br16 | OperandKind::Abs16 => Value::Unsigned(c.read_u16()?),
        OperandKind::I16 | OperandKind::Rel16 => Value::Signed(c.read_i16()?),
        OperandKind::Nibbles => {
            let raw = c.read_bytes(1)?;
            let mut b = BitCursor::new(raw);
            Value::Pair(b.read_nibble()? as i16, b.read_nibble()? as i16)
        }
        OperandKind::Angles => {
            let raw = c.read_bytes(3)?;
            let mut b = BitCursor::new(raw);
            Value::Pair(b.read_int12()?, b.read_int12()?)
        }
        OperandKind::Sym8(class) => Value::Symbol(Symbol { class, value: c.read_u8()? as u16 }),
        OperandKind::Sym16(class) => Value::Symbol(Symbol { class, value: c.read_u16()? }),
    })
}

/// Target of the first branch operand of an instruction at `offset`.
///
/// `base_offset` is the position of the script buffer start in the caller's
/// coordinate space and only matters for absolute branches.
pub fn branch_target(sig: &Signature, offset: usize, bytes: &[u8], base_offset: usize) -> Option<usize> {
    let (index, kind) = sig.find(OperandKind::is_branch)?;
    let value = sig.read_operand(index, bytes)?;
    let next = offset + bytes.len();
    match (kind, value) {
        (OperandKind::Br8, Value::Unsigned(v)) => Some(next + v as usize),
        (OperandKind::Br16, Value::Unsigned(v)) => Some(offset + v as usize),
        (OperandKind::Rel16, Value::Signed(v)) => next.checked_add_signed(v as isize),
        (OperandKind::Abs16, Value::Unsigned(v)) => Some(base_offset + v as usize),
        _ => None,
    }
}

/// End of the condition run announced by a `csz` operand.
pub fn condition_end(sig: &Signature, offset: usize, bytes: &[u8]) -> Option<usize> {
    let (index, _) = sig.find(|k| k == OperandKind::CondSize)?;
    let v = sig.read_operand(index, bytes)?.as_u16()?;
    Some(offset + bytes.len() + v as usize)
}

pub(crate) fn find_opcode(table: &'static [OpDef], code: u8) -> Option<&'static OpDef> {
    table.binary_search_by_key(&code, |d| d.code).ok().map(|i| &table[i])
}

pub(crate) fn find_extended(table: &'static [ExtDef], prefix: u8, code: u8) -> Option<&'static ExtDef> {
    table
        .binary_search_by_key(&(prefix, code), |d| (d.prefix, d.code))
        .ok()
        .map(|i| &table[i])
}

/// Length of an event opcode: the header plus the inner run it announces.
pub(crate) fn event_length(def: &OpDef, lookahead: Option<u8>) -> Option<usize> {
    match def.signature.operands.first() {
        Some(OperandKind::Run8) => Some(def.size as usize + lookahead? as usize),
        _ => Some(def.size as usize),
    }
}

/// Per-revision description of the instruction set.
pub trait InstructionSet: Sync {
    fn revision(&self) -> Revision;

    fn tables(&self) -> Tables;

    fn constants(&self) -> &'static ConstantTable;

    fn framing(&self, kind: ScriptKind) -> Framing;

    /// Opcode ending the last subroutine of an offset-table script.
    fn terminal_opcode(&self) -> Option<u8> {
        None
    }

    /// Total byte length of the instruction starting with `opcode`.
    ///
    /// `lookahead` is the following byte when one exists. `None` means the length
    /// cannot be determined and decoding of the subroutine has to stop.
    fn instruction_length(&self, opcode: u8, lookahead: Option<u8>, is_event: bool) -> Option<usize> {
        let tables = self.tables();
        if is_event {
            return event_length(find_opcode(tables.events, opcode)?, lookahead);
        }
        find_opcode(tables.opcodes, opcode).map(|d| d.size as usize)
    }

    fn entry(&self, bytes: &[u8], is_event: bool) -> Option<Entry> {
        let tables = self.tables();
        let table = if is_event { tables.events } else { tables.opcodes };
        find_opcode(table, *bytes.first()?).map(Entry::from)
    }

    fn signature(&self, bytes: &[u8], is_event: bool) -> Option<&'static Signature> {
        self.entry(bytes, is_event).map(|e| e.signature)
    }

    fn flow(&self, bytes: &[u8], is_event: bool) -> Flow {
        self.entry(bytes, is_event).map_or(Flow::Plain, |e| e.flow)
    }

    /// Context-sensitive naming of operand `operand` of `opcode`.
    ///
    /// The cursor is parked at the operand. On `Some` the operand has been consumed;
    /// on `None` the cursor is where it was.
    fn resolve_operand(
        &self,
        _kind: ScriptKind,
        _opcode: u8,
        _operand: usize,
        _cursor: &mut InstructionCursor<'_>,
    ) -> Option<String> {
        None
    }

    fn procedure_name(&self, kind: ScriptKind, index: usize) -> String {
        let stem = match kind {
            ScriptKind::Init => "init",
            ScriptKind::Main => "main",
            ScriptKind::Event => "event",
        };
        if index == 0 {
            stem.to_string()
        } else {
            format!("{stem}_{index:02X}")
        }
    }

    fn validate(&self) -> Result<(), ScdError> {
        let tables = self.tables();
        let check = |declared: usize, sig: &Signature, header: u8| {
            if declared != sig.encoded_len() || sig.header_len != header {
                return Err(ScdError::SignatureMismatch {
                    revision: self.revision(),
                    mnemonic: sig.mnemonic,
                    declared,
                    signature: sig.encoded_len(),
                });
            }
            Ok(())
        };
        for d in tables.opcodes.iter().chain(tables.events) {
            check(d.size as usize, &d.signature, 1)?;
        }
        for d in tables.extended {
            if let Some(size) = d.size {
                check(size as usize, &d.signature, 2)?;
            }
        }
        Ok(())
    }
}

pub fn instruction_set(revision: Revision) -> &'static dyn InstructionSet {
    match revision {
        Revision::Bio1 => &Bio1,
        Revision::Bio2 => &Bio2,
        Revision::Bio3 => &Bio3,
        Revision::BioCv => &BioCv,
    }
}

/// Resolves operand `target` as a procedure reference when the `Sce8` operand at
/// `sce_operand` names an event trigger.
pub(crate) fn event_trigger_procedure(
    isa: &dyn InstructionSet,
    kind: ScriptKind,
    sce_operand: usize,
    cursor: &mut InstructionCursor<'_>,
) -> Option<String> {
    let sce_event = isa.constants().resolve_name("SCE_EVENT")?;
    let bytes = cursor.bytes();
    let sig = isa.signature(bytes, false)?;
    let sce = sig.read_operand(sce_operand, bytes)?.as_u16()?;
    if sce != sce_event {
        return None;
    }
    cursor.transaction(|c| {
        let index = c.read_u8().ok()?;
        Some(isa.procedure_name(kind, index as usize))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_revision_validates() {
        for &rev in Revision::ALL {
            let isa = instruction_set(rev);
            assert_eq!(isa.revision(), rev);
            isa.validate().unwrap();
        }
    }

    #[test]
    fn symbol_names_invert() {
        for &rev in Revision::ALL {
            let table = instruction_set(rev).constants();
            for e in table.entries() {
                assert_eq!(table.resolve(e.class, e.value).as_deref(), Some(e.name), "{rev}");
                assert_eq!(table.resolve_name(e.name), Some(e.value), "{rev} {}", e.name);
            }
        }
    }

    #[test]
    fn mismatched_table_is_reported() {
        struct Broken;
        static BROKEN_OPS: &[OpDef] = &[OpDef {
            code: 0x00,
            size: 3,
            flow: Flow::Plain,
            signature: Signature { mnemonic: "broken", header_len: 1, operands: &[OperandKind::U8] },
        }];
        static EMPTY: ConstantTable = ConstantTable::new(&[]);
        impl InstructionSet for Broken {
            fn revision(&self) -> Revision {
                Revision::Bio2
            }
            fn tables(&self) -> Tables {
                Tables { opcodes: BROKEN_OPS, events: &[], extended: &[] }
            }
            fn constants(&self) -> &'static ConstantTable {
                &EMPTY
            }
            fn framing(&self, _kind: ScriptKind) -> Framing {
                Framing::Flat
            }
        }
        match Broken.validate() {
            Err(ScdError::SignatureMismatch { mnemonic, declared, signature, .. }) => {
                assert_eq!(mnemonic, "broken");
                assert_eq!(declared, 3);
                assert_eq!(signature, 2);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn branch_targets_follow_operand_kind() {
        let isa = instruction_set(Revision::Bio2);
        // ifel_ck 0, 12 at 0x10: counted from the opcode
        let ifel = [0x06, 0x00, 0x0c, 0x00];
        let sig = isa.signature(&ifel, false).unwrap();
        assert_eq!(branch_target(sig, 0x10, &ifel, 0), Some(0x1c));

        // goto -6 at 0x20: counted from the next instruction
        let goto = [0x17, 0x00, 0x00, 0x00, 0xfa, 0xff];
        let sig = isa.signature(&goto, false).unwrap();
        assert_eq!(branch_target(sig, 0x20, &goto, 0), Some(0x20));

        let bio1 = instruction_set(Revision::Bio1);
        let iff = [0x01, 0x04];
        let sig = bio1.signature(&iff, false).unwrap();
        assert_eq!(branch_target(sig, 0x02, &iff, 0), Some(0x08));

        let cv = instruction_set(Revision::BioCv);
        let goto = [0x17, 0x00, 0x40, 0x00];
        let sig = cv.signature(&goto, false).unwrap();
        assert_eq!(branch_target(sig, 0x90, &goto, 0x100), Some(0x140));
    }

    #[test]
    fn while_condition_end() {
        let isa = instruction_set(Revision::Bio2);
        let w = [0x0f, 0x04, 0x10, 0x00];
        let sig = isa.signature(&w, false).unwrap();
        assert_eq!(condition_end(sig, 0x30, &w), Some(0x38));
        assert_eq!(branch_target(sig, 0x30, &w, 0), Some(0x40));
    }

    #[test]
    fn unknown_opcodes_have_no_length() {
        let isa = instruction_set(Revision::Bio2);
        assert_eq!(isa.instruction_length(0xf0, None, false), None);
        assert_eq!(isa.instruction_length(0x09, Some(0x0a), false), Some(4));
        assert_eq!(isa.flow(&[0xf0], false), Flow::Plain);
        assert!(isa.signature(&[0xf0], false).is_none());
    }

    #[test]
    fn procedure_names() {
        let isa = instruction_set(Revision::Bio2);
        assert_eq!(isa.procedure_name(ScriptKind::Init, 0), "init");
        assert_eq!(isa.procedure_name(ScriptKind::Main, 0), "main");
        assert_eq!(isa.procedure_name(ScriptKind::Main, 3), "main_03");
        assert_eq!(isa.procedure_name(ScriptKind::Event, 0x1a), "event_1A");
    }
}
