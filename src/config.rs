//! Radio and overlay configuration types.

use std::time::Duration;

/// Radio client configuration.
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Maximum number of frames queued for the writer thread.
    pub writer_queue_capacity: usize,
    /// Value written to the `AP` parameter when the overlay starts.
    pub api_mode: u8,
    /// How long a frame id waits for a response that ends its request.
    ///
    /// Applies to fire-and-forget frames and first-response requests.
    pub response_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            writer_queue_capacity: 64,
            api_mode: 1,
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl RadioConfig {
    /// Set the writer queue capacity.
    pub fn with_writer_queue_capacity(mut self, capacity: usize) -> Self {
        self.writer_queue_capacity = capacity.max(1);
        self
    }

    /// Set the API mode.
    pub fn with_api_mode(mut self, mode: u8) -> Self {
        self.api_mode = mode;
        self
    }

    /// Set the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Periodic network discovery scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Time between the end of one scan and the start of the next.
    pub interval: Duration,
    /// How long each `ND` query collects responses.
    pub discovery_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(15),
        }
    }
}

impl ScanConfig {
    /// Set the scan interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// Overlay configuration.
#[derive(Debug, Clone, Default)]
pub struct OverlayConfig {
    /// Component names, one item directory each.
    pub components: Vec<String>,
    /// Fixed node identifier. Disables identifier advertising.
    pub node_name: Option<String>,
    /// Component whose local items are advertised in the node identifier.
    pub advertise_component: Option<String>,
    /// Background discovery scan. Requires `advertise_component`.
    pub scan: Option<ScanConfig>,
    /// Radio settings.
    pub radio: RadioConfig,
}

impl OverlayConfig {
    /// Create a configuration declaring the given components.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Add a component.
    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.components.push(name.into());
        self
    }

    /// Set a fixed node identifier.
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    /// Advertise the local items of `component` in the node identifier.
    pub fn with_advertise_component(mut self, component: impl Into<String>) -> Self {
        self.advertise_component = Some(component.into());
        self
    }

    /// Enable the background discovery scan.
    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = Some(scan);
        self
    }

    /// Set the radio configuration.
    pub fn with_radio(mut self, radio: RadioConfig) -> Self {
        self.radio = radio;
        self
    }

    /// Check if the node identifier tracks local items.
    pub fn advertises(&self) -> bool {
        self.node_name.is_none() && self.advertise_component.is_some()
    }
}
