use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::vm::cancel::CancelToken;
use crate::vm::device::Device;
use crate::vm::fault::{DeviceError, Fault, FaultKind};
use crate::vm::memory::Memory;
use crate::vm::ops::Instr;
use crate::vm::trace::{TraceEvent, Tracer};
use crate::vm::value::{Bytes, Frame, Value};

/// What the dispatch loop does after an instruction.
enum ControlFlow {
    /// Continue at this address.
    Continue(u64),
    Halt,
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Two's-complement wrapping; division truncates toward zero.
    fn apply(self, lhs: i64, rhs: i64) -> Result<i64, FaultKind> {
        match self {
            BinOp::Add => Ok(lhs.wrapping_add(rhs)),
            BinOp::Sub => Ok(lhs.wrapping_sub(rhs)),
            BinOp::Mul => Ok(lhs.wrapping_mul(rhs)),
            BinOp::Div if rhs == 0 => Err(FaultKind::Arithmetic),
            BinOp::Div => Ok(lhs.wrapping_div(rhs)),
            BinOp::Mod if rhs == 0 => Err(FaultKind::Arithmetic),
            BinOp::Mod => Ok(lhs.wrapping_rem(rhs)),
        }
    }
}

fn type_fault(expected: &'static str, found: &Value) -> FaultKind {
    FaultKind::Type {
        expected,
        found: found.type_name(),
    }
}

/// The von execution engine.
///
/// Executes the instruction stream in `memory`, calling devices by port.
/// The operand stack is cleared at the start of every [`Engine::run`] and kept
/// afterwards so the host can inspect results.
pub struct Engine<M> {
    memory: M,
    devices: HashMap<u16, Box<dyn Device>>,
    stack: Vec<Value>,
    bp: usize,
    config: EngineConfig,
    tracer: Option<Box<dyn Tracer>>,
    cancel: CancelToken,
}

impl<M: Memory> Engine<M> {
    pub fn new(memory: M) -> Self {
        Self::with_config(memory, EngineConfig::default())
    }

    pub fn with_config(memory: M, config: EngineConfig) -> Self {
        Self {
            memory,
            devices: HashMap::new(),
            stack: Vec::with_capacity(256),
            bp: 0,
            config,
            tracer: None,
            cancel: CancelToken::new(),
        }
    }

    /// Bind `device` to `port`, returning the device it replaces.
    pub fn register_device(
        &mut self,
        port: u16,
        device: Box<dyn Device>,
    ) -> Option<Box<dyn Device>> {
        self.devices.insert(port, device)
    }

    pub fn unregister_device(&mut self, port: u16) -> Option<Box<dyn Device>> {
        self.devices.remove(&port)
    }

    /// Install an observer that sees every executed instruction.
    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = Some(tracer);
    }

    pub fn clear_tracer(&mut self) -> Option<Box<dyn Tracer>> {
        self.tracer.take()
    }

    /// A handle that stops [`Engine::run`] before its next instruction.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Share an externally owned cancellation flag.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    /// The value `depth` cells below the top (0 = top).
    pub fn peek(&self, depth: usize) -> Result<&Value, FaultKind> {
        let len = self.stack.len();
        len.checked_sub(depth)
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.stack.get(i))
            .ok_or(FaultKind::Underflow {
                needed: depth.saturating_add(1),
                depth: len,
            })
    }

    /// Execute from `entry` until `HALT` or a fault.
    pub fn run(&mut self, entry: u64) -> Result<(), Fault> {
        self.stack.clear();
        self.bp = 0;
        let mut pc = entry;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.fault(pc, FaultKind::Cancelled));
            }

            let instr = match Instr::decode(&self.memory, pc) {
                Ok(instr) => instr,
                Err(kind) => return Err(self.fault(pc, kind)),
            };

            match self.execute(pc, &instr) {
                Ok(ControlFlow::Continue(next)) => {
                    if let Some(tracer) = self.tracer.as_mut() {
                        tracer.trace(&TraceEvent::Step {
                            pc,
                            instr: &instr,
                            bp: self.bp,
                            stack: &self.stack,
                        });
                    }
                    pc = next;
                }
                Ok(ControlFlow::Halt) => {
                    if let Some(tracer) = self.tracer.as_mut() {
                        tracer.trace(&TraceEvent::Halt {
                            pc,
                            stack: &self.stack,
                        });
                    }
                    return Ok(());
                }
                Err(kind) => return Err(self.fault(pc, kind)),
            }
        }
    }

    fn fault(&mut self, pc: u64, kind: FaultKind) -> Fault {
        let fault = Fault::new(pc, kind);
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.trace(&TraceEvent::Fault {
                fault: &fault,
                stack: &self.stack,
            });
        }
        fault
    }

    /// Run one instruction. Operands are validated before anything is
    /// mutated, so a fault leaves the stack as it was.
    fn execute(&mut self, pc: u64, instr: &Instr) -> Result<ControlFlow, FaultKind> {
        let next = pc.wrapping_add(instr.width());
        match instr {
            Instr::Noop => {}
            Instr::Add => self.binary(BinOp::Add)?,
            Instr::Sub => self.binary(BinOp::Sub)?,
            Instr::Mul => self.binary(BinOp::Mul)?,
            Instr::Div => self.binary(BinOp::Div)?,
            Instr::Mod => self.binary(BinOp::Mod)?,
            Instr::Neg => {
                let top = self.top_mut()?;
                match top {
                    Value::Int(n) => *n = n.wrapping_neg(),
                    other => return Err(type_fault("int", other)),
                }
            }
            Instr::Read(port) => self.device_io(*port, true)?,
            Instr::Write(port) => self.device_io(*port, false)?,
            Instr::PushI(v) => self.push(Value::Int(*v))?,
            Instr::PushS(data) => self.push(Value::Bytes(Bytes::new(data.clone())))?,
            Instr::PushA(index) => {
                let slot = self.slot(*index, self.stack.len())?;
                let value = self.stack[slot].clone();
                self.push(value)?;
            }
            Instr::SetA(index) => {
                let depth = self.stack.len();
                if depth == 0 {
                    return Err(FaultKind::Underflow { needed: 1, depth });
                }
                // The target must survive the pop.
                let slot = self.slot(*index, depth - 1)?;
                let value = self.pop()?;
                self.stack[slot] = value;
            }
            Instr::Jmp(delta) => return Ok(ControlFlow::Continue(pc.wrapping_add_signed(*delta))),
            Instr::Call(delta) => {
                let frame = Frame {
                    return_pc: next,
                    saved_bp: self.bp,
                };
                let new_bp = self.stack.len();
                self.push(Value::Frame(frame))?;
                self.bp = new_bp;
                return Ok(ControlFlow::Continue(pc.wrapping_add_signed(*delta)));
            }
            Instr::Ret(narg) => {
                let frame = match self.stack.get(self.bp) {
                    Some(Value::Frame(frame)) => *frame,
                    _ => return Err(FaultKind::Frame { bp: self.bp }),
                };
                let narg = usize::from(*narg);
                let base = self.bp.checked_sub(narg).ok_or(FaultKind::Underflow {
                    needed: narg,
                    depth: self.bp,
                })?;
                self.stack.truncate(base);
                self.bp = frame.saved_bp;
                return Ok(ControlFlow::Continue(frame.return_pc));
            }
            Instr::Halt => return Ok(ControlFlow::Halt),
        }
        Ok(ControlFlow::Continue(next))
    }

    fn push(&mut self, value: Value) -> Result<(), FaultKind> {
        if let Some(limit) = self.config.max_stack_depth {
            if self.stack.len() >= limit {
                return Err(FaultKind::StackOverflow { limit });
            }
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, FaultKind> {
        self.stack.pop().ok_or(FaultKind::Underflow {
            needed: 1,
            depth: 0,
        })
    }

    fn top_mut(&mut self) -> Result<&mut Value, FaultKind> {
        self.stack
            .last_mut()
            .ok_or(FaultKind::Underflow { needed: 1, depth: 0 })
    }

    /// Resolve `bp + index` against a stack of `depth` live cells.
    fn slot(&self, index: i16, depth: usize) -> Result<usize, FaultKind> {
        self.bp
            .checked_add_signed(isize::from(index))
            .filter(|&slot| slot < depth)
            .ok_or(FaultKind::Slot {
                bp: self.bp,
                index,
                depth,
            })
    }

    /// Pop rhs and fold it into lhs in place.
    fn binary(&mut self, op: BinOp) -> Result<(), FaultKind> {
        let depth = self.stack.len();
        if depth < 2 {
            return Err(FaultKind::Underflow { needed: 2, depth });
        }
        let rhs = match &self.stack[depth - 1] {
            Value::Int(n) => *n,
            other => return Err(type_fault("int", other)),
        };
        let lhs = match &self.stack[depth - 2] {
            Value::Int(n) => *n,
            other => return Err(type_fault("int", other)),
        };
        let result = op.apply(lhs, rhs)?;
        self.stack.pop();
        self.stack[depth - 2] = Value::Int(result);
        Ok(())
    }

    /// READ/WRITE: the buffer is popped only once the device has succeeded.
    fn device_io(&mut self, port: u16, read: bool) -> Result<(), FaultKind> {
        let buffer = match self.stack.last() {
            Some(Value::Bytes(b)) => b.clone(),
            Some(other) => return Err(type_fault("bytes", other)),
            None => return Err(FaultKind::Underflow { needed: 1, depth: 0 }),
        };
        let device = self.devices.get_mut(&port).ok_or(FaultKind::Device {
            port,
            source: DeviceError::Unregistered,
        })?;
        let result = if read {
            buffer.with_mut(|buf| device.read(buf))
        } else {
            buffer.with(|buf| device.write(buf))
        };
        let count = result.map_err(|e| FaultKind::Device {
            port,
            source: DeviceError::Io(e),
        })?;
        self.stack.pop();
        self.stack.push(Value::Int(count as i64));
        Ok(())
    }
}
