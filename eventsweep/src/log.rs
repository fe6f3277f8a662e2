//! Operator-facing output and tracing setup.
//!
//! Progress, warnings and prompts meant for the person running a projection
//! go through [`OperatorLog`] instead of being printed directly, so they can
//! be routed to `tracing` in production and captured in tests.

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Prefix of every line describing a mutation that safe mode suppressed.
pub const SAFE_MODE_PREFIX: &str = "***SAFE MODE*** ";

/// The channel an operator message was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogChannel {
    /// Progress and results.
    Info,
    /// Recoverable problems.
    Warn,
    /// Questions or instructions for the operator.
    Prompt,
}

impl std::fmt::Display for LogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Prompt => write!(f, "prompt"),
        }
    }
}

/// Sink for operator-facing messages.
pub trait OperatorLog: Send + Sync {
    /// Progress and results.
    fn info(&self, message: &str);

    /// Recoverable problems.
    fn warn(&self, message: &str);

    /// Questions or instructions for the operator.
    fn prompt(&self, message: &str);
}

/// Routes operator messages to `tracing` events tagged with a `channel` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl OperatorLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!(channel = %LogChannel::Info, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(channel = %LogChannel::Warn, "{message}");
    }

    fn prompt(&self, message: &str) {
        tracing::info!(channel = %LogChannel::Prompt, "{message}");
    }
}

/// Captures operator messages in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(LogChannel, String)>>,
}

impl MemoryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message written so far, in order.
    pub fn entries(&self) -> Vec<(LogChannel, String)> {
        self.entries.lock().clone()
    }

    /// Messages written to `channel`, in order.
    pub fn messages(&self, channel: LogChannel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(written_to, _)| *written_to == channel)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Whether any message on any channel contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }

    fn push(&self, channel: LogChannel, message: &str) {
        self.entries.lock().push((channel, message.to_string()));
    }
}

impl OperatorLog for MemoryLog {
    fn info(&self, message: &str) {
        self.push(LogChannel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogChannel::Warn, message);
    }

    fn prompt(&self, message: &str) {
        self.push(LogChannel::Prompt, message);
    }
}

/// Install a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_filter`.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(
    default_filter: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
