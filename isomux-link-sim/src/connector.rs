use std::sync::Arc;

use async_trait::async_trait;

use isomux_domain::{IsoChannelPtr, IsoConnector, Result};

use super::switch::SimSwitch;

// ---------------------------------------------------------------------------
// SimConnector
// ---------------------------------------------------------------------------

/// [`IsoConnector`] over a [`SimSwitch`]. Every `connect()` opens a fresh
/// simulated link, so supervisor reconnect paths work unchanged against the
/// simulator.
pub struct SimConnector {
    // ---
    switch: Arc<SimSwitch>,
}

// ---

impl SimConnector {
    // ---
    pub fn new(switch: Arc<SimSwitch>) -> Self {
        Self { switch }
    }
}

// ---

#[async_trait]
impl IsoConnector for SimConnector {
    // ---
    async fn connect(&self) -> Result<IsoChannelPtr> {
        self.switch.open_link().await
    }

    // ---

    fn endpoint(&self) -> String {
        "sim:0".into()
    }
}
