//! Streaming device identity and settings.

use serde::{Deserialize, Serialize};

/// Identifier assigned by the stream manager when a device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const INVALID: DeviceId = DeviceId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// How a streaming device schedules its transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerType {
    /// One blocking transfer at a time.
    Blocking,
    /// Several transfers lined up, completed through callbacks.
    DeferredLinedUp,
}

/// Settings passed when creating a streaming device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub scheduler: SchedulerType,
    /// Transfer granularity in bytes.
    pub granularity: u32,
    /// Maximum number of transfers the stream manager keeps in flight.
    pub max_concurrent_io: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerType::DeferredLinedUp,
            granularity: 32 * 1024,
            max_concurrent_io: 8,
        }
    }
}

/// Description of a device, for profiling displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub device_id: DeviceId,
    pub name: String,
    pub can_read: bool,
    pub can_write: bool,
}
