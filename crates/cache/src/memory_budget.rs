//! Texture memory estimation and pressure detection
//!
//! Per-texture sizes are not tracked. The monitor keeps a running average of
//! estimated texture sizes and multiplies it by the number of occupied units
//! to approximate how much video memory the cache is holding.

use std::collections::HashSet;

use crate::slot::TextureHandle;

/// Extra storage taken by a full mipmap chain, as a multiplier
pub const MIPMAP_OVERHEAD: f64 = 1.33;

/// Pixel formats the size estimate understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba16F,
    Rgba32F,
    Depth24Stencil8,
}

impl TextureFormat {
    /// Bytes per pixel in video memory
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 | TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::Rgba16F => 8,
            TextureFormat::Rgba32F => 16,
        }
    }
}

/// Estimated video memory for a texture including its mip chain
pub fn estimate_size(width: u32, height: u32, format: TextureFormat) -> u64 {
    let base = u64::from(width) * u64::from(height) * u64::from(format.bytes_per_pixel());
    (base as f64 * MIPMAP_OVERHEAD).ceil() as u64
}

/// Memory pressure level indicating cache health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (> 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }
}

/// Point-in-time memory figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    /// Estimated bytes held by every tracked resource, bound or not
    pub allocated_bytes: u64,
    /// Estimated bytes held by resources currently bound to a unit
    pub used_bytes: u64,
    /// Video memory the cache may use
    pub estimated_capacity_bytes: u64,
    /// Number of tracked resources
    pub resource_count: usize,
    /// Running mean of recorded resource sizes
    pub average_size_bytes: f64,
}

impl MemoryStats {
    /// `used_bytes / estimated_capacity_bytes`
    pub fn utilization(&self) -> f64 {
        if self.estimated_capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.estimated_capacity_bytes as f64
        }
    }

    /// Utilization as a percentage
    pub fn utilization_pct(&self) -> f64 {
        self.utilization() * 100.0
    }

    /// Pressure level for the current utilization
    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }
}

/// Tracks estimated video memory against capacity
///
/// # Example
///
/// ```
/// use texslot_cache::{MemoryMonitor, TextureFormat, TextureHandle};
///
/// let mut monitor = MemoryMonitor::new(64 * 1024 * 1024, 0.85);
/// monitor.record_resource(TextureHandle::new(1), 1024, 1024, TextureFormat::Rgba8);
///
/// let stats = monitor.sample(1);
/// assert_eq!(stats.resource_count, 1);
/// assert!(!monitor.is_under_pressure());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryMonitor {
    capacity_bytes: u64,
    pressure_threshold: f64,
    tracked: HashSet<TextureHandle>,
    samples: u64,
    average_size: f64,
    used_bytes: u64,
}

impl MemoryMonitor {
    /// Create a monitor for `capacity_bytes` of video memory that reports
    /// pressure above `pressure_threshold` utilization
    pub fn new(capacity_bytes: u64, pressure_threshold: f64) -> Self {
        Self {
            capacity_bytes,
            pressure_threshold: pressure_threshold.clamp(0.0, 1.0),
            tracked: HashSet::new(),
            samples: 0,
            average_size: 0.0,
            used_bytes: 0,
        }
    }

    /// Record a freshly loaded texture
    ///
    /// Returns the size estimate folded into the running average.
    pub fn record_resource(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> u64 {
        let size = estimate_size(width, height, format);
        self.record_size(handle, size);
        size
    }

    /// Record a texture whose size is already known
    pub fn record_size(&mut self, handle: TextureHandle, bytes: u64) {
        self.samples += 1;
        self.average_size += (bytes as f64 - self.average_size) / self.samples as f64;
        self.tracked.insert(handle);
    }

    /// Stop tracking a released texture
    pub fn release(&mut self, handle: TextureHandle) -> bool {
        self.tracked.remove(&handle)
    }

    /// Recompute usage for `occupied` bound textures
    pub fn sample(&mut self, occupied: usize) -> MemoryStats {
        self.used_bytes = (occupied as f64 * self.average_size).round() as u64;
        self.stats()
    }

    /// Figures from the most recent sample
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            allocated_bytes: (self.tracked.len() as f64 * self.average_size).round() as u64,
            used_bytes: self.used_bytes,
            estimated_capacity_bytes: self.capacity_bytes,
            resource_count: self.tracked.len(),
            average_size_bytes: self.average_size,
        }
    }

    /// Utilization as of the most recent sample
    pub fn utilization(&self) -> f64 {
        self.stats().utilization()
    }

    /// Whether the most recent sample exceeded the pressure threshold
    pub fn is_under_pressure(&self) -> bool {
        self.utilization() > self.pressure_threshold
    }

    /// Utilization above which pressure is reported
    pub fn pressure_threshold(&self) -> f64 {
        self.pressure_threshold
    }

    /// Video memory the cache may use
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Forget every tracked texture and sample
    pub fn reset(&mut self) {
        self.tracked.clear();
        self.samples = 0;
        self.average_size = 0.0;
        self.used_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> TextureHandle {
        TextureHandle::new(id)
    }

    #[test]
    fn test_estimate_size_includes_mip_chain() {
        assert_eq!(estimate_size(256, 256, TextureFormat::Rgba8), 348_652);
        assert_eq!(estimate_size(0, 256, TextureFormat::Rgba8), 0);
        assert!(estimate_size(4, 4, TextureFormat::Rgba32F) > 4 * 4 * 16);
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(TextureFormat::R8.bytes_per_pixel(), 1);
        assert_eq!(TextureFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(TextureFormat::Depth24Stencil8.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba16F.bytes_per_pixel(), 8);
    }

    #[test]
    fn test_pressure_levels() {
        assert_eq!(MemoryPressure::from_utilization(0.0), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.49), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.5), MemoryPressure::Moderate);
        assert_eq!(MemoryPressure::from_utilization(0.8), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_utilization(0.95), MemoryPressure::Critical);
        assert!(MemoryPressure::Critical > MemoryPressure::Low);
    }

    #[test]
    fn test_running_average() {
        let mut monitor = MemoryMonitor::new(10_000, 0.85);
        monitor.record_size(handle(1), 100);
        monitor.record_size(handle(2), 300);

        let stats = monitor.sample(2);
        assert!((stats.average_size_bytes - 200.0).abs() < 1e-9);
        assert_eq!(stats.used_bytes, 400);
        assert_eq!(stats.allocated_bytes, 400);
        assert_eq!(stats.resource_count, 2);
    }

    #[test]
    fn test_used_counts_only_bound() {
        let mut monitor = MemoryMonitor::new(1_000, 0.85);
        for id in 0..4 {
            monitor.record_size(handle(id), 100);
        }

        let stats = monitor.sample(1);
        assert_eq!(stats.used_bytes, 100);
        assert_eq!(stats.allocated_bytes, 400);
        assert!((stats.utilization() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_pressure_threshold_is_exclusive() {
        let mut monitor = MemoryMonitor::new(1_000, 0.85);
        monitor.record_size(handle(1), 85);

        monitor.sample(10);
        assert!(!monitor.is_under_pressure());

        monitor.sample(11);
        assert!(monitor.is_under_pressure());
    }

    #[test]
    fn test_release_untracks() {
        let mut monitor = MemoryMonitor::new(1_000, 0.85);
        monitor.record_size(handle(1), 100);

        assert!(monitor.release(handle(1)));
        assert!(!monitor.release(handle(1)));
        assert_eq!(monitor.stats().resource_count, 0);
        // The running average survives releases
        assert!((monitor.stats().average_size_bytes - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity_reports_no_utilization() {
        let mut monitor = MemoryMonitor::new(0, 0.85);
        monitor.record_size(handle(1), 100);
        monitor.sample(1);
        assert_eq!(monitor.utilization(), 0.0);
        assert!(!monitor.is_under_pressure());
    }

    #[test]
    fn test_reset() {
        let mut monitor = MemoryMonitor::new(1_000, 0.5);
        monitor.record_size(handle(1), 900);
        monitor.sample(1);
        assert!(monitor.is_under_pressure());

        monitor.reset();
        assert_eq!(monitor.stats().used_bytes, 0);
        assert!(!monitor.is_under_pressure());
    }
}
