//! Instruction set of the von engine.
//!
//! Every instruction starts with a little-endian `u16` opcode followed by a fixed
//! operand layout determined by that opcode. Multi-byte operands are little-endian.

use std::fmt;

use super::fault::FaultKind;
use super::memory::{Memory, OutOfBounds};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Noop = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Mod = 5,
    Neg = 6,
    Read = 7,
    Write = 8,
    PushI = 9,
    PushS = 10,
    PushA = 11,
    SetA = 12,
    Jmp = 13,
    Call = 14,
    Ret = 15,
    Halt = 16,
}

impl Opcode {
    pub const ALL: [Opcode; 17] = [
        Opcode::Noop,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::Read,
        Opcode::Write,
        Opcode::PushI,
        Opcode::PushS,
        Opcode::PushA,
        Opcode::SetA,
        Opcode::Jmp,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Halt,
    ];

    pub fn from_u16(code: u16) -> Option<Opcode> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Noop => "NOOP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::Read => "READ",
            Opcode::Write => "WRITE",
            Opcode::PushI => "PUSHI",
            Opcode::PushS => "PUSHS",
            Opcode::PushA => "PUSHA",
            Opcode::SetA => "SETA",
            Opcode::Jmp => "JMP",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Halt => "HALT",
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Noop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    /// Pop a buffer and fill it from the device on `port`; push the count.
    Read(u16),
    /// Pop a buffer and send it to the device on `port`; push the count.
    Write(u16),
    PushI(i64),
    PushS(Vec<u8>),
    /// Push a copy of `stack[bp + index]`.
    PushA(i16),
    /// Pop a value into `stack[bp + index]`.
    SetA(i16),
    /// Relative to the JMP's own address.
    Jmp(i64),
    /// Relative to the CALL's own address.
    Call(i64),
    /// Return, discarding `narg` argument slots.
    Ret(u16),
    Halt,
}

/// Size of the opcode field.
pub const OPCODE_WIDTH: u64 = 2;

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Noop => Opcode::Noop,
            Instr::Add => Opcode::Add,
            Instr::Sub => Opcode::Sub,
            Instr::Mul => Opcode::Mul,
            Instr::Div => Opcode::Div,
            Instr::Mod => Opcode::Mod,
            Instr::Neg => Opcode::Neg,
            Instr::Read(_) => Opcode::Read,
            Instr::Write(_) => Opcode::Write,
            Instr::PushI(_) => Opcode::PushI,
            Instr::PushS(_) => Opcode::PushS,
            Instr::PushA(_) => Opcode::PushA,
            Instr::SetA(_) => Opcode::SetA,
            Instr::Jmp(_) => Opcode::Jmp,
            Instr::Call(_) => Opcode::Call,
            Instr::Ret(_) => Opcode::Ret,
            Instr::Halt => Opcode::Halt,
        }
    }

    /// Encoded size in bytes.
    pub fn width(&self) -> u64 {
        match self {
            Instr::Noop
            | Instr::Add
            | Instr::Sub
            | Instr::Mul
            | Instr::Div
            | Instr::Mod
            | Instr::Neg
            | Instr::Halt => 2,
            Instr::Read(_) | Instr::Write(_) | Instr::PushA(_) | Instr::SetA(_) | Instr::Ret(_) => 4,
            Instr::PushI(_) | Instr::Jmp(_) | Instr::Call(_) => 10,
            Instr::PushS(data) => 4 + data.len() as u64,
        }
    }

    /// Decode the instruction starting at `pc`.
    pub fn decode<M: Memory + ?Sized>(mem: &M, pc: u64) -> Result<Instr, FaultKind> {
        let code = mem.read_u16(pc)?;
        let op = Opcode::from_u16(code).ok_or(FaultKind::Decode(code))?;
        let operand = operand_offset(pc)?;
        let instr = match op {
            Opcode::Noop => Instr::Noop,
            Opcode::Add => Instr::Add,
            Opcode::Sub => Instr::Sub,
            Opcode::Mul => Instr::Mul,
            Opcode::Div => Instr::Div,
            Opcode::Mod => Instr::Mod,
            Opcode::Neg => Instr::Neg,
            Opcode::Read => Instr::Read(mem.read_u16(operand)?),
            Opcode::Write => Instr::Write(mem.read_u16(operand)?),
            Opcode::PushI => Instr::PushI(mem.read_i64(operand)?),
            Opcode::PushS => {
                let len = mem.read_u16(operand)?;
                let data_at = operand_offset(operand)?;
                Instr::PushS(mem.read_bytes(data_at, usize::from(len))?)
            }
            Opcode::PushA => Instr::PushA(mem.read_i16(operand)?),
            Opcode::SetA => Instr::SetA(mem.read_i16(operand)?),
            Opcode::Jmp => Instr::Jmp(mem.read_i64(operand)?),
            Opcode::Call => Instr::Call(mem.read_i64(operand)?),
            Opcode::Ret => Instr::Ret(mem.read_u16(operand)?),
            Opcode::Halt => Instr::Halt,
        };
        Ok(instr)
    }

    /// Append the encoded instruction to `out`.
    ///
    /// `PUSHS` payloads longer than `u16::MAX` cannot be encoded. Callers must
    /// check first, as `Assembler::emit` does.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.opcode() as u16).to_le_bytes());
        match self {
            Instr::Read(port) | Instr::Write(port) => out.extend_from_slice(&port.to_le_bytes()),
            Instr::PushI(v) | Instr::Jmp(v) | Instr::Call(v) => {
                out.extend_from_slice(&v.to_le_bytes())
            }
            Instr::PushS(data) => {
                debug_assert!(
                    data.len() <= usize::from(u16::MAX),
                    "PUSHS payload of {} bytes exceeds 65535",
                    data.len()
                );
                let len = u16::try_from(data.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&data[..usize::from(len)]);
            }
            Instr::PushA(index) | Instr::SetA(index) => out.extend_from_slice(&index.to_le_bytes()),
            Instr::Ret(narg) => out.extend_from_slice(&narg.to_le_bytes()),
            Instr::Noop
            | Instr::Add
            | Instr::Sub
            | Instr::Mul
            | Instr::Div
            | Instr::Mod
            | Instr::Neg
            | Instr::Halt => {}
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width() as usize);
        self.encode_into(&mut out);
        out
    }
}

fn operand_offset(at: u64) -> Result<u64, FaultKind> {
    at.checked_add(OPCODE_WIDTH).ok_or(FaultKind::Memory(OutOfBounds {
        offset: at,
        len: OPCODE_WIDTH as usize,
    }))
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().mnemonic();
        match self {
            Instr::Read(port) | Instr::Write(port) => write!(f, "{} {}", name, port),
            Instr::PushI(v) | Instr::Jmp(v) | Instr::Call(v) => write!(f, "{} {}", name, v),
            Instr::PushS(data) => write!(f, "{} {:?}", name, String::from_utf8_lossy(data)),
            Instr::PushA(index) | Instr::SetA(index) => write!(f, "{} {}", name, index),
            Instr::Ret(narg) => write!(f, "{} {}", name, narg),
            _ => write!(f, "{}", name),
        }
    }
}
