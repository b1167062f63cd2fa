use serde::{Deserialize, Serialize};

use crate::ScriptKind;
use crate::cursor::InstructionCursor;
use crate::isa::{Flow, Framing, InstructionSet, Revision, branch_target, instruction_set};

/// Callbacks produced while walking a script buffer. Every method defaults to a no-op.
///
/// Offsets are absolute: the decoder adds its base offset to buffer positions.
pub trait ScriptVisitor {
    fn visit_version(&mut self, _revision: Revision) {}
    fn visit_begin_script(&mut self, _kind: ScriptKind) {}
    fn visit_begin_subroutine(&mut self, _index: usize, _offset: usize) {}
    fn visit_opcode(&mut self, _offset: usize, _bytes: &[u8]) {}
    /// `bytes` is the event header only; the inner run follows as `visit_opcode` calls.
    fn visit_begin_event_opcode(&mut self, _offset: usize, _bytes: &[u8]) {}
    fn visit_end_event_opcode(&mut self) {}
    /// Bytes of the current subroutine that were not decoded.
    fn visit_trailing_data(&mut self, _offset: usize, _bytes: &[u8]) {}
    fn visit_end_subroutine(&mut self, _index: usize) {}
    fn visit_end_script(&mut self, _kind: ScriptKind) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeRecord<'a> {
    pub offset: usize,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every byte of the subroutine was decoded.
    Exhausted,
    /// The terminal opcode at `offset` ended the last subroutine.
    Terminated { offset: usize },
    UnknownOpcode { offset: usize, opcode: u8 },
    /// The instruction at `offset` claims `length` bytes past the subroutine bound.
    Truncated { offset: usize, length: usize },
}

/// Result of decoding one byte range.
#[derive(Debug, Clone)]
pub struct SubroutineDecode<'a> {
    pub records: Vec<OpcodeRecord<'a>>,
    pub stop: StopReason,
    /// Buffer position where decoding stopped.
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubroutineReport {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub opcodes: usize,
    pub trailing: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptReport {
    pub revision: Revision,
    pub kind: ScriptKind,
    pub subroutines: Vec<SubroutineReport>,
}

pub struct ScriptDecoder {
    isa: &'static dyn InstructionSet,
    base_offset: usize,
}

impl ScriptDecoder {
    pub fn new(revision: Revision, base_offset: usize) -> Self {
        Self {
            isa: instruction_set(revision),
            base_offset,
        }
    }

    pub fn decode(&self, bytes: &[u8], kind: ScriptKind, visitor: &mut dyn ScriptVisitor) -> ScriptReport {
        let mut report = ScriptReport {
            revision: self.isa.revision(),
            kind,
            subroutines: Vec::new(),
        };
        visitor.visit_version(self.isa.revision());
        visitor.visit_begin_script(kind);
        match self.isa.framing(kind) {
            Framing::OffsetTable { word_size } => self.decode_offset_table(bytes, word_size, visitor, &mut report),
            Framing::Flat => self.decode_flat(bytes, visitor, &mut report),
            Framing::Events => self.decode_events(bytes, visitor, &mut report),
        }
        visitor.visit_end_script(kind);
        report
    }

    /// Decodes ordinary opcodes in `bytes[start..end]`.
    ///
    /// With `early_exit` the range is the last subroutine of an offset table: a
    /// watermark tracks the furthest `if`/`else` block end seen so far and the terminal opcode at
    /// or past it ends the subroutine.
    pub fn decode_run<'a>(&self, bytes: &'a [u8], start: usize, end: usize, early_exit: bool) -> SubroutineDecode<'a> {
        let end = end.min(bytes.len());
        let terminal = if early_exit { self.isa.terminal_opcode() } else { None };
        let mut records = Vec::new();
        let mut watermark = start;
        let mut pos = start;
        let mut stop = StopReason::Exhausted;

        while pos < end {
            let opcode = bytes[pos];
            let lookahead = if pos + 1 < end { Some(bytes[pos + 1]) } else { None };
            let len = match self.isa.instruction_length(opcode, lookahead, false) {
                Some(len) if len > 0 => len,
                _ => {
                    stop = StopReason::UnknownOpcode { offset: self.base_offset + pos, opcode };
                    break;
                }
            };
            if len > end - pos {
                stop = StopReason::Truncated { offset: self.base_offset + pos, length: len };
                break;
            }
            let ins = &bytes[pos..pos + len];
            records.push(OpcodeRecord { offset: self.base_offset + pos, bytes: ins });

            if let Some(terminal) = terminal {
                if let Some(entry) = self.isa.entry(ins, false) {
                    if matches!(entry.flow, Flow::If | Flow::Else) {
                        if let Some(target) = branch_target(entry.signature, pos, ins, 0) {
                            watermark = watermark.max(target);
                        }
                    }
                }
                if opcode == terminal && pos >= watermark {
                    stop = StopReason::Terminated { offset: self.base_offset + pos };
                    pos += len;
                    break;
                }
            }
            pos += len;
        }

        SubroutineDecode { records, stop, pos }
    }

    fn finish_subroutine(
        &self,
        bytes: &[u8],
        index: usize,
        (start, end): (usize, usize),
        decoded: SubroutineDecode<'_>,
        visitor: &mut dyn ScriptVisitor,
        report: &mut ScriptReport,
    ) {
        for r in &decoded.records {
            visitor.visit_opcode(r.offset, r.bytes);
        }
        let trailing = end.saturating_sub(decoded.pos);
        if trailing > 0 {
            visitor.visit_trailing_data(self.base_offset + decoded.pos, &bytes[decoded.pos..end]);
        }
        visitor.visit_end_subroutine(index);
        if decoded.stop != StopReason::Exhausted {
            log::debug!("subroutine {index} stopped: {:?}, {trailing} trailing bytes", decoded.stop);
        }
        report.subroutines.push(SubroutineReport {
            index,
            start: self.base_offset + start,
            end: self.base_offset + end,
            opcodes: decoded.records.len(),
            trailing,
            stop: decoded.stop,
        });
    }

    fn decode_offset_table(
        &self,
        bytes: &[u8],
        word_size: usize,
        visitor: &mut dyn ScriptVisitor,
        report: &mut ScriptReport,
    ) {
        let mut table = InstructionCursor::new(bytes);
        let mut read_word = || -> Option<usize> {
            match word_size {
                4 => table.read_u32().ok().map(|w| w as usize),
                _ => table.read_u16().ok().map(|w| w as usize),
            }
        };
        let Some(first) = read_word() else {
            log::debug!("script of {} bytes has no offset table", bytes.len());
            return;
        };

        // the first entry is also the byte size of the table
        let count = first / word_size;
        let mut starts = Vec::new();
        let mut word = Some(first);
        while starts.len() < count {
            let Some(start) = word else {
                log::warn!("offset table claims {count} entries, only {} fit in the buffer", starts.len());
                break;
            };
            starts.push(start);
            word = read_word();
        }

        for (i, &start) in starts.iter().enumerate() {
            if start > bytes.len() {
                log::warn!("subroutine {i} starts at 0x{start:x}, past the end of the buffer");
            }
            let start = start.min(bytes.len());
            let end = starts
                .get(i + 1)
                .copied()
                .unwrap_or(bytes.len())
                .clamp(start, bytes.len());
            let is_last = i + 1 == starts.len();

            visitor.visit_begin_subroutine(i, self.base_offset + start);
            let decoded = self.decode_run(bytes, start, end, is_last);
            self.finish_subroutine(bytes, i, (start, end), decoded, visitor, report);
        }
    }

    fn decode_flat(&self, bytes: &[u8], visitor: &mut dyn ScriptVisitor, report: &mut ScriptReport) {
        let declared = InstructionCursor::new(bytes).read_u16().map_or(0, |w| w as usize);
        let start = bytes.len().min(2);
        let end = (start + declared).min(bytes.len());
        if start + declared > bytes.len() {
            log::warn!("script declares {declared} bytes, {} available", bytes.len() - start);
        }

        visitor.visit_begin_subroutine(0, self.base_offset + start);
        let decoded = self.decode_run(bytes, start, end, false);
        // bytes past the declared length belong to whatever follows the script
        self.finish_subroutine(bytes, 0, (start, bytes.len()), decoded, visitor, report);
    }

    fn decode_events(&self, bytes: &[u8], visitor: &mut dyn ScriptVisitor, report: &mut ScriptReport) {
        let end = bytes.len();
        let mut pos = 0;
        let mut opcodes = 0;
        let mut stop = StopReason::Exhausted;

        visitor.visit_begin_subroutine(0, self.base_offset);
        while pos < end {
            let opcode = bytes[pos];
            let lookahead = bytes.get(pos + 1).copied();
            let (len, entry) = match (
                self.isa.instruction_length(opcode, lookahead, true),
                self.isa.entry(&bytes[pos..], true),
            ) {
                (Some(len), Some(entry)) if len > 0 => (len, entry),
                _ => {
                    stop = StopReason::UnknownOpcode { offset: self.base_offset + pos, opcode };
                    break;
                }
            };
            if len > end - pos {
                stop = StopReason::Truncated { offset: self.base_offset + pos, length: len };
                break;
            }

            let header = entry.signature.encoded_len().min(len);
            visitor.visit_begin_event_opcode(self.base_offset + pos, &bytes[pos..pos + header]);
            opcodes += 1;
            if len > header {
                let inner = &bytes[pos + header..pos + len];
                let child = ScriptDecoder {
                    isa: self.isa,
                    base_offset: self.base_offset + pos + header,
                };
                let decoded = child.decode_run(inner, 0, inner.len(), false);
                for r in &decoded.records {
                    visitor.visit_opcode(r.offset, r.bytes);
                }
                opcodes += decoded.records.len();
                if decoded.pos < inner.len() {
                    log::debug!("event run at 0x{:x} stopped: {:?}", child.base_offset, decoded.stop);
                    visitor.visit_trailing_data(child.base_offset + decoded.pos, &inner[decoded.pos..]);
                }
            }
            visitor.visit_end_event_opcode();
            pos += len;

            if entry.flow == Flow::End {
                stop = StopReason::Terminated { offset: self.base_offset + pos - len };
                break;
            }
        }

        let trailing = end - pos;
        if trailing > 0 {
            visitor.visit_trailing_data(self.base_offset + pos, &bytes[pos..]);
        }
        visitor.visit_end_subroutine(0);
        report.subroutines.push(SubroutineReport {
            index: 0,
            start: self.base_offset,
            end: self.base_offset + end,
            opcodes,
            trailing,
            stop,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOpcode {
    pub subroutine: usize,
    pub offset: usize,
    pub bytes: Vec<u8>,
    pub event: bool,
}

/// Visitor that keeps a flat listing of everything decoded.
#[derive(Debug, Clone, Default)]
pub struct OpcodeCollector {
    pub subroutines: Vec<usize>,
    pub opcodes: Vec<CollectedOpcode>,
    pub trailing: Vec<(usize, Vec<u8>)>,
    current: usize,
}

impl OpcodeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mnemonics(&self, revision: Revision) -> Vec<&'static str> {
        let isa = instruction_set(revision);
        self.opcodes
            .iter()
            .map(|op| isa.signature(&op.bytes, op.event).map_or("?", |s| s.mnemonic))
            .collect()
    }
}

impl ScriptVisitor for OpcodeCollector {
    fn visit_begin_subroutine(&mut self, index: usize, offset: usize) {
        self.current = index;
        self.subroutines.push(offset);
    }

    fn visit_opcode(&mut self, offset: usize, bytes: &[u8]) {
        self.opcodes.push(CollectedOpcode {
            subroutine: self.current,
            offset,
            bytes: bytes.to_vec(),
            event: false,
        });
    }

    fn visit_begin_event_opcode(&mut self, offset: usize, bytes: &[u8]) {
        self.opcodes.push(CollectedOpcode {
            subroutine: self.current,
            offset,
            bytes: bytes.to_vec(),
            event: true,
        });
    }

    fn visit_trailing_data(&mut self, offset: usize, bytes: &[u8]) {
        self.trailing.push((offset, bytes.to_vec()));
    }
}
