#[derive(Debug, Clone)]
pub struct Config {
    /// Number of store entries a population scan pulls per read-lock hold.
    pub scan_batch_size: usize,
    /// Nodes indexed between population progress log lines.
    pub progress_log_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_batch_size: 1024,
            progress_log_interval: 100_000,
        }
    }
}

impl Config {
    /// Profile for bulk loads: larger scan batches, quieter progress logs.
    pub fn bulk() -> Self {
        Self {
            scan_batch_size: 16_384,
            progress_log_interval: 1_000_000,
        }
    }

    /// Profile with single-entry scan batches, useful when populations must
    /// interleave tightly with concurrent writers.
    pub fn fine_grained() -> Self {
        Self {
            scan_batch_size: 1,
            progress_log_interval: 1,
        }
    }
}
