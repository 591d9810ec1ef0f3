//! Execution observers.
//!
//! A tracer is handed to the engine by the host; nothing is traced unless one
//! is installed.

use std::io::{self, Write};

use serde::Serialize;

use super::fault::Fault;
use super::ops::Instr;
use super::value::Value;

/// Something the engine reports to its tracer.
#[derive(Debug)]
pub enum TraceEvent<'a> {
    /// `instr` at `pc` completed; `stack` and `bp` are the state after it.
    Step {
        pc: u64,
        instr: &'a Instr,
        bp: usize,
        stack: &'a [Value],
    },
    Halt {
        pc: u64,
        stack: &'a [Value],
    },
    Fault {
        fault: &'a Fault,
        stack: &'a [Value],
    },
}

pub trait Tracer {
    fn trace(&mut self, event: &TraceEvent<'_>);
}

impl<F: FnMut(&TraceEvent<'_>)> Tracer for F {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        self(event)
    }
}

fn format_stack(stack: &[Value]) -> String {
    let items: Vec<String> = stack.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(" "))
}

/// Human-readable trace, one line per event.
pub struct TextTracer {
    out: Box<dyn Write>,
}

impl TextTracer {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self { out }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }
}

impl Tracer for TextTracer {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        let line = match event {
            TraceEvent::Step {
                pc,
                instr,
                bp,
                stack,
            } => format!(
                "[TRACE] {:08x} {:<16} bp={} {}",
                pc,
                instr.to_string(),
                bp,
                format_stack(stack)
            ),
            TraceEvent::Halt { pc, stack } => {
                format!("[TRACE] {:08x} HALT {}", pc, format_stack(stack))
            }
            TraceEvent::Fault { fault, stack } => {
                format!("[TRACE] FAULT {} {}", fault, format_stack(stack))
            }
        };
        let _ = writeln!(self.out, "{}", line);
    }
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    event: &'static str,
    pc: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bp: Option<usize>,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Machine-readable trace: one JSON object per line.
pub struct JsonTracer<W: Write> {
    out: W,
}

impl<W: Write> JsonTracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Tracer for JsonTracer<W> {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        let record = match event {
            TraceEvent::Step {
                pc,
                instr,
                bp,
                stack,
            } => TraceRecord {
                event: "step",
                pc: *pc,
                op: Some(instr.to_string()),
                bp: Some(*bp),
                depth: stack.len(),
                top: stack.last().map(|v| v.to_string()),
                fault: None,
                message: None,
            },
            TraceEvent::Halt { pc, stack } => TraceRecord {
                event: "halt",
                pc: *pc,
                op: None,
                bp: None,
                depth: stack.len(),
                top: stack.last().map(|v| v.to_string()),
                fault: None,
                message: None,
            },
            TraceEvent::Fault { fault, stack } => TraceRecord {
                event: "fault",
                pc: fault.pc,
                op: None,
                bp: None,
                depth: stack.len(),
                top: stack.last().map(|v| v.to_string()),
                fault: Some(fault.kind.name()),
                message: Some(fault.kind.to_string()),
            },
        };
        if serde_json::to_writer(&mut self.out, &record).is_ok() {
            let _ = self.out.write_all(b"\n");
        }
    }
}
