//! Von - a minimal stack-based bytecode virtual machine
//!
//! This library provides the von execution engine, its instruction codec,
//! and the memory/device interfaces a host binds it to.

pub mod config;
pub mod package;
pub mod vm;

// Re-export commonly used types
pub use config::{EngineConfig, TraceFormat};
pub use vm::{Device, Engine, Fault, FaultKind, Instr, Memory, Value};
