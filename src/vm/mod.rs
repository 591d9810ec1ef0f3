mod cancel;
mod device;
mod fault;
mod memory;
mod ops;
mod value;
mod vm;
pub mod bytecode;
pub mod trace;

pub use cancel::CancelToken;
pub use device::{Device, IoDevice, LoopbackDevice, NullDevice};
pub use fault::{DeviceError, Fault, FaultKind};
pub use memory::{ByteMemory, Memory, OutOfBounds};
pub use ops::{Instr, Opcode};
pub use value::{Bytes, Frame, Value};
pub use vm::Engine;
