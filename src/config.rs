//! Host runtime configuration

/// Settings for one host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Contract version reported to native code
    pub boundary_version: u32,
    /// Maximum nesting of host and native calls
    pub max_call_depth: usize,
    /// Handle slots reserved up front
    pub initial_heap_capacity: usize,
}

impl HostConfig {
    /// Newest contract version the reference host speaks
    pub const MAX_BOUNDARY_VERSION: u32 = 9;
    pub const DEFAULT_BOUNDARY_VERSION: u32 = 8;
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;
    pub const DEFAULT_HEAP_CAPACITY: usize = 256;

    pub fn new() -> Self {
        HostConfig {
            boundary_version: Self::DEFAULT_BOUNDARY_VERSION,
            max_call_depth: Self::DEFAULT_MAX_CALL_DEPTH,
            initial_heap_capacity: Self::DEFAULT_HEAP_CAPACITY,
        }
    }

    /// Report a different contract version (clamped to 1..=9)
    pub fn with_boundary_version(mut self, version: u32) -> Self {
        self.boundary_version = version.clamp(1, Self::MAX_BOUNDARY_VERSION);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    pub fn with_initial_heap_capacity(mut self, capacity: usize) -> Self {
        self.initial_heap_capacity = capacity;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.boundary_version, 8);
        assert_eq!(config.max_call_depth, 1024);
        assert_eq!(config.initial_heap_capacity, 256);
    }

    #[test]
    fn test_version_is_clamped() {
        assert_eq!(HostConfig::new().with_boundary_version(0).boundary_version, 1);
        assert_eq!(HostConfig::new().with_boundary_version(42).boundary_version, 9);
        assert_eq!(HostConfig::new().with_boundary_version(4).boundary_version, 4);
    }

    #[test]
    fn test_call_depth_is_at_least_one() {
        assert_eq!(HostConfig::new().with_max_call_depth(0).max_call_depth, 1);
    }
}
