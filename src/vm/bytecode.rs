//! Emitting and listing von instruction streams.
//!
//! The engine only ever decodes; this module is the other half of the codec:
//! - `Assembler`: builds a program image, resolving JMP/CALL deltas from labels
//! - `disassemble`: linear sweep back to `(offset, Instr)` pairs

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use super::fault::FaultKind;
use super::ops::Instr;

/// Error type for bytecode operations
#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("label '{0}' is defined twice")]
    DuplicateLabel(String),
    #[error("label '{0}' is never defined")]
    UndefinedLabel(String),
    #[error("PUSHS payload of {0} bytes exceeds 65535")]
    PayloadTooLarge(usize),
    #[error("invalid instruction at {offset:#x}: {source}")]
    Invalid {
        offset: u64,
        #[source]
        source: FaultKind,
    },
}

/// A JMP/CALL whose delta is patched once every label is known.
#[derive(Debug)]
struct Fixup {
    /// Offset of the jumping instruction; deltas are relative to it.
    origin: u64,
    label: String,
}

/// Builds a program image one instruction at a time.
///
/// Errors are deferred to [`Assembler::finish`] so emission can be chained.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<String, u64>,
    fixups: Vec<Fixup>,
    error: Option<BytecodeError>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will be emitted at.
    pub fn offset(&self) -> u64 {
        self.code.len() as u64
    }

    /// Bind `name` to the current offset.
    pub fn label(&mut self, name: &str) -> &mut Self {
        let here = self.offset();
        if self.labels.insert(name.to_string(), here).is_some() {
            self.fail(BytecodeError::DuplicateLabel(name.to_string()));
        }
        self
    }

    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        if let Instr::PushS(data) = &instr {
            if data.len() > usize::from(u16::MAX) {
                self.fail(BytecodeError::PayloadTooLarge(data.len()));
                return self;
            }
        }
        instr.encode_into(&mut self.code);
        self
    }

    pub fn noop(&mut self) -> &mut Self {
        self.emit(Instr::Noop)
    }

    pub fn add(&mut self) -> &mut Self {
        self.emit(Instr::Add)
    }

    pub fn sub(&mut self) -> &mut Self {
        self.emit(Instr::Sub)
    }

    pub fn mul(&mut self) -> &mut Self {
        self.emit(Instr::Mul)
    }

    pub fn div(&mut self) -> &mut Self {
        self.emit(Instr::Div)
    }

    pub fn rem(&mut self) -> &mut Self {
        self.emit(Instr::Mod)
    }

    pub fn neg(&mut self) -> &mut Self {
        self.emit(Instr::Neg)
    }

    pub fn read(&mut self, port: u16) -> &mut Self {
        self.emit(Instr::Read(port))
    }

    pub fn write(&mut self, port: u16) -> &mut Self {
        self.emit(Instr::Write(port))
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.emit(Instr::PushI(value))
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.emit(Instr::PushS(data.to_vec()))
    }

    pub fn push_arg(&mut self, index: i16) -> &mut Self {
        self.emit(Instr::PushA(index))
    }

    pub fn set_arg(&mut self, index: i16) -> &mut Self {
        self.emit(Instr::SetA(index))
    }

    /// Jump to `label`, which may be defined before or after this point.
    pub fn jmp(&mut self, label: &str) -> &mut Self {
        self.fixup(label);
        self.emit(Instr::Jmp(0))
    }

    /// Call the subroutine at `label`.
    pub fn call(&mut self, label: &str) -> &mut Self {
        self.fixup(label);
        self.emit(Instr::Call(0))
    }

    pub fn ret(&mut self, narg: u16) -> &mut Self {
        self.emit(Instr::Ret(narg))
    }

    pub fn halt(&mut self) -> &mut Self {
        self.emit(Instr::Halt)
    }

    /// Resolve labels and return the program image.
    pub fn finish(&mut self) -> Result<Vec<u8>, BytecodeError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| BytecodeError::UndefinedLabel(fixup.label.clone()))?;
            let delta = target as i64 - fixup.origin as i64;
            // Delta follows the 2-byte opcode.
            let at = fixup.origin as usize + 2;
            self.code[at..at + 8].copy_from_slice(&delta.to_le_bytes());
        }
        Ok(std::mem::take(&mut self.code))
    }

    fn fixup(&mut self, label: &str) {
        self.fixups.push(Fixup {
            origin: self.offset(),
            label: label.to_string(),
        });
    }

    fn fail(&mut self, err: BytecodeError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Decode every instruction in `code`, front to back.
pub fn disassemble(code: &[u8]) -> Result<Vec<(u64, Instr)>, BytecodeError> {
    let mut out = Vec::new();
    let mut pc = 0u64;
    while pc < code.len() as u64 {
        let instr = Instr::decode(code, pc)
            .map_err(|source| BytecodeError::Invalid { offset: pc, source })?;
        let width = instr.width();
        out.push((pc, instr));
        pc += width;
    }
    Ok(out)
}

/// Render a listing, one instruction per line, with jump targets resolved.
pub fn format_listing(listing: &[(u64, Instr)]) -> String {
    let mut out = String::new();
    for (pc, instr) in listing {
        match instr {
            Instr::Jmp(delta) | Instr::Call(delta) => {
                let target = pc.wrapping_add_signed(*delta);
                let _ = writeln!(out, "{:08x}  {:<24} ; -> {:08x}", pc, instr.to_string(), target);
            }
            _ => {
                let _ = writeln!(out, "{:08x}  {}", pc, instr);
            }
        }
    }
    out
}
