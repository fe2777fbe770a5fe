use chrono::{DateTime, Local};
use serde::Serialize;

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of one supervised connection.
///
/// This is the diagnosis surface: the administrative layer (outside this
/// workspace) serves it verbatim, and the `probe` subcommand prints it as
/// JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    // ---
    pub connected: bool,

    /// Supervisor state machine position, lowercase.
    pub state: String,

    pub host: String,
    pub port: u16,

    /// Most recent connect/IO failure, if any. Cleared on a successful
    /// (re)connect.
    pub last_error: Option<String>,

    pub last_connection_attempt: Option<DateTime<Local>>,

    /// Correlation table occupancy — requests sent and not yet resolved,
    /// failed, or expired.
    pub pending_requests: usize,

    pub keep_alive_enabled: bool,
}
