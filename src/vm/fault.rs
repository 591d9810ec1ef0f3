//! Terminal error conditions of a run.

use std::io;

use thiserror::Error;

use super::memory::OutOfBounds;

/// Why a device access failed.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device registered")]
    Unregistered,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The kind of fault that stopped the engine.
#[derive(Debug, Error)]
pub enum FaultKind {
    #[error("memory fault: {0}")]
    Memory(#[from] OutOfBounds),
    #[error("decode fault: unknown opcode {0:#06x}")]
    Decode(u16),
    #[error("type fault: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
    #[error("stack underflow: need {needed} values, depth is {depth}")]
    Underflow { needed: usize, depth: usize },
    #[error("arithmetic fault: division by zero")]
    Arithmetic,
    #[error("device fault on port {port}: {source}")]
    Device {
        port: u16,
        #[source]
        source: DeviceError,
    },
    #[error("frame fault: no call frame at stack[{bp}]")]
    Frame { bp: usize },
    #[error("slot fault: bp{index:+} is outside the stack (bp={bp}, depth={depth})")]
    Slot { bp: usize, index: i16, depth: usize },
    #[error("stack overflow: depth limit of {limit} values exceeded")]
    StackOverflow { limit: usize },
    #[error("execution cancelled")]
    Cancelled,
}

impl FaultKind {
    /// Short stable name, used by the JSON tracer.
    pub fn name(&self) -> &'static str {
        match self {
            FaultKind::Memory(_) => "memory",
            FaultKind::Decode(_) => "decode",
            FaultKind::Type { .. } => "type",
            FaultKind::Underflow { .. } => "underflow",
            FaultKind::Arithmetic => "arithmetic",
            FaultKind::Device { .. } => "device",
            FaultKind::Frame { .. } => "frame",
            FaultKind::Slot { .. } => "slot",
            FaultKind::StackOverflow { .. } => "stack_overflow",
            FaultKind::Cancelled => "cancelled",
        }
    }
}

/// A fault together with the address of the instruction that raised it.
#[derive(Debug, Error)]
#[error("{kind} at pc={pc:#x}")]
pub struct Fault {
    pub pc: u64,
    pub kind: FaultKind,
}

impl Fault {
    pub fn new(pc: u64, kind: FaultKind) -> Self {
        Fault { pc, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_fault_display_includes_pc() {
        let fault = Fault::new(0x1a, FaultKind::Decode(0x99));
        assert_eq!(fault.to_string(), "decode fault: unknown opcode 0x0099 at pc=0x1a");
    }

    #[test]
    fn test_slot_display_is_signed() {
        let kind = FaultKind::Slot { bp: 3, index: -5, depth: 4 };
        assert!(kind.to_string().contains("bp-5"));
    }

    #[test]
    fn test_device_fault_keeps_io_source() {
        let kind = FaultKind::Device {
            port: 1,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into(),
        };
        assert!(kind.source().is_some());
        assert!(kind.to_string().contains("pipe closed"));
    }
}
