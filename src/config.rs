/// Configuration for [`CompoundQueue`](crate::CompoundQueue).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Desired total capacity; rounded up to a power of two at construction.
    pub capacity: usize,
    /// Lane-count hint. A power of two is used as-is; anything else is
    /// rounded down to a power of two.
    pub parallelism: usize,
    /// Enable the statistics counters (slight overhead on the hot paths).
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a configuration with metrics disabled.
    pub const fn new(capacity: usize, parallelism: usize) -> Self {
        Self {
            capacity,
            parallelism,
            enable_metrics: false,
        }
    }

    /// Enables the statistics counters.
    #[must_use]
    pub const fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }
}

impl Default for Config {
    /// 64K total slots, one lane per logical CPU, metrics off.
    fn default() -> Self {
        Self {
            capacity: 1 << 16,
            parallelism: num_cpus::get(),
            enable_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_probes_cpus() {
        let config = Config::default();
        assert!(config.parallelism >= 1);
        assert_eq!(config.capacity, 1 << 16);
        assert!(!config.enable_metrics);
    }

    #[test]
    fn test_builder() {
        let config = Config::new(128, 4).with_metrics();
        assert_eq!(config.capacity, 128);
        assert_eq!(config.parallelism, 4);
        assert!(config.enable_metrics);
    }
}
