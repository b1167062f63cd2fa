use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod constants;
mod cursor;
mod decoder;
mod isa;
mod renderer;

mod tables {
    use crate::constants::SymDef;
    use crate::isa::{ExtDef, Flow, OpDef, OperandKind, Signature};

    include!(concat!(env!("OUT_DIR"), "/isa_tables.rs"));
}

pub use constants::{ConstantTable, SymDef, Symbol, SymbolClass};
pub use cursor::{BitCursor, InstructionCursor};
pub use decoder::{
    CollectedOpcode, OpcodeCollector, OpcodeRecord, ScriptDecoder, ScriptReport, ScriptVisitor, StopReason,
    SubroutineDecode, SubroutineReport,
};
pub use isa::{
    Bio1, Bio2, Bio3, BioCv, Entry, ExtDef, Flow, Framing, InstructionSet, OpDef, OperandKind, Revision, Signature,
    Tables, Value, branch_target, condition_end, instruction_set,
};
pub use renderer::ScriptRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptKind {
    Init,
    Main,
    Event,
}

impl ScriptKind {
    pub fn name(self) -> &'static str {
        match self {
            ScriptKind::Init => "init",
            ScriptKind::Main => "main",
            ScriptKind::Event => "event",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    /// C-like pseudocode with framing bytes left out.
    Structured,
    /// One line per opcode with every operand and the raw bytes.
    Assembly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub revision: Revision,
    pub kind: ScriptKind,
    pub mode: DecompileMode,
    /// Position of the script buffer inside the file it was cut from.
    pub base_offset: usize,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            revision: Revision::Bio2,
            kind: ScriptKind::Main,
            mode: DecompileMode::Structured,
            base_offset: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScdError {
    #[error("unexpected end of input")]
    Eof,

    #[error("empty script")]
    EmptyScript,

    #[error("script slice out of range (offset={offset}, length={length}, available={available})")]
    OutOfRange { offset: usize, length: usize, available: usize },

    #[error("{revision} opcode {mnemonic} declares {declared} bytes but its signature consumes {signature}")]
    SignatureMismatch {
        revision: Revision,
        mnemonic: &'static str,
        declared: usize,
        signature: usize,
    },
}

/// Walks `bytes` under the framing rules of `revision` and `kind`, reporting to `visitor`.
pub fn decode(
    bytes: &[u8],
    revision: Revision,
    kind: ScriptKind,
    base_offset: usize,
    visitor: &mut dyn ScriptVisitor,
) -> ScriptReport {
    ScriptDecoder::new(revision, base_offset).decode(bytes, kind, visitor)
}

/// Cuts `[skip, skip + length)` out of `bytes`; `None` takes everything after `skip`.
pub fn script_slice(bytes: &[u8], skip: usize, length: Option<usize>) -> Result<&[u8], ScdError> {
    let available = bytes.len().saturating_sub(skip);
    let length = length.unwrap_or(available);
    if skip > bytes.len() || length > available {
        return Err(ScdError::OutOfRange { offset: skip, length, available });
    }
    Ok(&bytes[skip..skip + length])
}

pub fn decompile_with_mode(
    bytes: &[u8],
    revision: Revision,
    kind: ScriptKind,
    mode: DecompileMode,
) -> Result<String, ScdError> {
    decompile_with_options(
        bytes,
        DecompileOptions {
            revision,
            kind,
            mode,
            base_offset: 0,
        },
    )
}

pub fn decompile_with_options(bytes: &[u8], options: DecompileOptions) -> Result<String, ScdError> {
    instruction_set(options.revision).validate()?;
    if bytes.is_empty() {
        return Err(ScdError::EmptyScript);
    }

    let mut renderer = ScriptRenderer::new(options.revision, options.kind, options.mode == DecompileMode::Assembly)
        .with_base_offset(options.base_offset);
    let report = decode(bytes, options.revision, options.kind, options.base_offset, &mut renderer);
    log::debug!(
        "decoded {} {} script: {} subroutines",
        options.revision,
        options.kind,
        report.subroutines.len()
    );
    Ok(renderer.finish())
}

pub fn decompile(bytes: &[u8], revision: Revision, kind: ScriptKind) -> Result<String, ScdError> {
    decompile_with_options(
        bytes,
        DecompileOptions {
            revision,
            kind,
            ..DecompileOptions::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn golden_init_script() {
        let out = decompile(&bytes("02 00 09 0a 32 00 01 00"), Revision::Bio2, ScriptKind::Init).unwrap();
        assert_eq!(out, "#version bio2\n\nproc init() {\n  sleep(10, 50);\n}\n");
    }

    #[test]
    fn golden_trailing_data() {
        let data = bytes("02 00 09 0a 32 00 01 00 04 00 06 00 01 00 01 00");
        let out = decompile(&data, Revision::Bio2, ScriptKind::Init).unwrap();
        assert!(out.contains("  sleep(10, 50);\n"));
        assert!(out.contains("// trailing data at 0x0008: 04 00 06 00 01 00 01 00"));

        let mut c = OpcodeCollector::new();
        let report = decode(&data, Revision::Bio2, ScriptKind::Init, 0, &mut c);
        assert_eq!(report.subroutines[0].trailing, 8);
    }

    #[test]
    fn assembly_lists_offsets() {
        let out = decompile_with_options(
            &bytes("02 00 09 0a 32 00 01 00"),
            DecompileOptions {
                kind: ScriptKind::Init,
                mode: DecompileMode::Assembly,
                base_offset: 0x100,
                ..DecompileOptions::default()
            },
        )
        .unwrap();
        assert!(out.starts_with(".version bio2\n"));
        assert!(out.contains("; 0102: 09 0A 32 00"));
        assert!(out.contains("; 0106: 01 00"));
    }

    #[test]
    fn empty_script_is_an_error() {
        assert!(matches!(
            decompile(&[], Revision::Bio3, ScriptKind::Main),
            Err(ScdError::EmptyScript)
        ));
    }

    #[test]
    fn slices_are_bounds_checked() {
        let data = [0u8, 1, 2, 3, 4];
        assert_eq!(script_slice(&data, 1, Some(3)).unwrap(), &[1, 2, 3]);
        assert_eq!(script_slice(&data, 2, None).unwrap(), &[2, 3, 4]);
        assert!(matches!(
            script_slice(&data, 4, Some(2)),
            Err(ScdError::OutOfRange { offset: 4, length: 2, available: 1 })
        ));
        assert!(script_slice(&data, 9, None).is_err());
    }

    #[test]
    fn default_options() {
        let o = DecompileOptions::default();
        assert_eq!(o.revision, Revision::Bio2);
        assert_eq!(o.kind, ScriptKind::Main);
        assert_eq!(o.mode, DecompileMode::Structured);
    }
}
