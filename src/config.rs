use std::path::PathBuf;

pub const WAL_FILE_NAME: &str = "appointments.wal";

/// Settings read from the environment, with defaults for local use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `SLOTKEEPER_DATA_DIR`
    pub data_dir: PathBuf,
    /// `SLOTKEEPER_COMPACT_THRESHOLD`: appends since last compaction before
    /// `compact` rewrites the log.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unparseable numbers fall back to
    /// the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTKEEPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: lookup("SLOTKEEPER_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
