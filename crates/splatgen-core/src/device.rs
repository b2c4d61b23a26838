//! Host capability probing and the numeric gates derived from it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use crate::error::{Result, SplatError};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Broad class of the host, deciding backend order and point budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    Desktop,
    /// Phones, tablets and headsets.
    MemoryConstrained,
}

impl DeviceClass {
    /// Class implied by the compilation target.
    pub fn for_target() -> Self {
        if cfg!(any(target_os = "ios", target_os = "android", target_os = "visionos")) {
            DeviceClass::MemoryConstrained
        } else {
            DeviceClass::Desktop
        }
    }
}

/// How many points to keep in the written scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputQuality {
    /// Every point the model produced.
    Full,
    /// The memory-based recommendation.
    #[default]
    Balanced,
    /// Half the recommendation.
    Low,
}

impl std::str::FromStr for OutputQuality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(OutputQuality::Full),
            "balanced" => Ok(OutputQuality::Balanced),
            "low" => Ok(OutputQuality::Low),
            other => Err(format!("unknown quality '{other}'")),
        }
    }
}

/// Source of host capabilities.
pub trait DeviceProbe: Send + Sync {
    /// Installed physical memory in bytes.
    fn physical_memory(&self) -> u64;

    /// Free bytes on the volume holding `path`, if it can be determined.
    fn available_disk_space(&self, path: &Path) -> Option<u64>;

    fn device_class(&self) -> DeviceClass;
}

/// [`DeviceProbe`] backed by `sysinfo`.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    class: DeviceClass,
}

impl SystemProbe {
    pub fn new(class: DeviceClass) -> Self {
        Self { class }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(DeviceClass::for_target())
    }
}

impl DeviceProbe for SystemProbe {
    fn physical_memory(&self) -> u64 {
        let mut system = System::new();
        system.refresh_memory();
        system.total_memory()
    }

    fn available_disk_space(&self, path: &Path) -> Option<u64> {
        // Walk up to the nearest existing ancestor so not-yet-created cache
        // directories resolve to their volume.
        let existing = path.ancestors().find(|p| p.exists())?;
        let path = existing.canonicalize().ok()?;

        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    fn device_class(&self) -> DeviceClass {
        self.class
    }
}

/// Refuse local generation on constrained devices below `threshold` bytes.
pub fn check_memory(
    class: DeviceClass,
    physical_memory: u64,
    threshold: u64,
    allow_override: bool,
) -> Result<()> {
    if class != DeviceClass::MemoryConstrained || physical_memory >= threshold {
        return Ok(());
    }
    if allow_override {
        warn!(
            "Physical memory {} bytes is below {} bytes; continuing on override",
            physical_memory, threshold
        );
        return Ok(());
    }
    Err(SplatError::InsufficientDeviceMemory {
        required: threshold,
        available: physical_memory,
    })
}

/// Point budget suggested for a constrained device with `physical_memory` bytes.
pub fn recommended_point_cap(physical_memory: u64) -> Option<usize> {
    match physical_memory {
        m if m < 4 * GIB => Some(150_000),
        m if m < 6 * GIB => Some(300_000),
        m if m < 8 * GIB => Some(600_000),
        _ => None,
    }
}

/// Final point cap for a generation, or `None` to keep every point.
pub fn point_cap(
    class: DeviceClass,
    quality: OutputQuality,
    physical_memory: u64,
    explicit_max: Option<usize>,
) -> Option<usize> {
    let by_quality = match (class, quality) {
        (_, OutputQuality::Full) => None,
        (DeviceClass::MemoryConstrained, OutputQuality::Balanced) => {
            recommended_point_cap(physical_memory)
        }
        (DeviceClass::MemoryConstrained, OutputQuality::Low) => Some(
            recommended_point_cap(physical_memory).map_or(300_000, |cap| (cap / 2).max(50_000)),
        ),
        (DeviceClass::Desktop, OutputQuality::Balanced) => None,
        (DeviceClass::Desktop, OutputQuality::Low) => Some(300_000),
    };

    let cap = match (by_quality, explicit_max) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    debug!("Point cap for {:?}/{:?}: {:?}", class, quality, cap);
    cap
}

/// Index of the `i`-th kept point when keeping `kept` of `total` points.
///
/// Uniform integer stride; strictly increasing when `kept <= total`.
pub fn strided_index(i: usize, total: usize, kept: usize) -> usize {
    if kept >= total {
        return i;
    }
    ((i as u128 * total as u128) / kept as u128) as usize
}
