use std::time::Duration;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process switch simulator.
///
/// All fields default to a perfect authorizer — instant approvals, no loss.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Base latency added before every response.
    pub response_delay: Duration,

    /// Probability `[0.0, 1.0]` that a response is silently withheld.
    pub drop_percent: f64,

    /// Probability `[0.0, 1.0]` that a response is delivered twice.
    pub dup_percent: f64,

    /// Swallow every request without answering. Tests total response loss.
    pub mute: bool,

    /// RNG seed for reproducible drop / dup sequences. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            response_delay: Duration::ZERO,
            drop_percent: 0.0,
            dup_percent: 0.0,
            mute: false,
            seed: None,
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Perfect authorizer — no impairments. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Flaky switch: 5 % of responses lost, 1 % duplicated.
    pub fn lossy() -> Self {
        // ---
        Self {
            drop_percent: 0.05,
            dup_percent: 0.01,
            ..Default::default()
        }
    }

    // ---

    /// Switch that accepts the connection but never answers anything.
    pub fn mute() -> Self {
        // ---
        Self {
            mute: true,
            ..Default::default()
        }
    }
}
