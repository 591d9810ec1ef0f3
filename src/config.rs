//! Runtime configuration types.

use serde::{Deserialize, Serialize};

/// Trace output mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// No tracing
    #[default]
    Off,
    /// One readable line per instruction on stderr
    Human,
    /// One JSON object per instruction on stderr
    Json,
}

/// Configuration for an engine instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hard limit on operand stack depth (None = unlimited)
    pub max_stack_depth: Option<usize>,
}

impl EngineConfig {
    pub fn with_max_stack_depth(limit: usize) -> Self {
        Self {
            max_stack_depth: Some(limit),
        }
    }
}
