//! Cache directory statistics

use serde::{Deserialize, Serialize};

/// Point-in-time summary of one cache directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryStats {
    /// Number of entries in the index
    pub entry_count: usize,

    /// Number of entries with state = Complete
    pub complete_entries: usize,

    /// Number of entries with state = Partial
    pub partial_entries: usize,

    /// Number of entries with state = Failed
    pub failed_entries: usize,

    /// Number of entries currently being written
    pub writing_entries: usize,

    /// Number of entries pinned by a reader
    pub pinned_entries: usize,

    /// Total bytes stored (sum of downloaded_bytes)
    pub total_bytes: u64,

    /// Size cap in effect
    pub max_size: u64,

    /// Entry-count cap in effect
    pub max_entries: usize,
}

impl DirectoryStats {
    /// Calculate cache usage as a percentage of the size cap.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.max_size as f64) * 100.0
    }

    /// Returns true if either cap is exceeded.
    pub fn is_over_bounds(&self) -> bool {
        self.total_bytes > self.max_size || self.entry_count > self.max_entries
    }

    /// Bytes that would have to be freed to fit the size cap.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.max_size)
    }

    /// Returns average bytes per entry.
    pub fn average_entry_size(&self) -> u64 {
        if self.entry_count == 0 {
            0
        } else {
            self.total_bytes / self.entry_count as u64
        }
    }

    /// Human-readable usage line, e.g. `"3.0 MiB / 60.0 MiB (2/10 entries)"`.
    pub fn usage_string(&self) -> String {
        format!(
            "{} / {} ({}/{} entries)",
            format_bytes(self.total_bytes),
            format_bytes(self.max_size),
            self.entry_count,
            self.max_entries
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let value = bytes as f64;
    if value >= GIB {
        format!("{:.1} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.1} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentage() {
        let stats = DirectoryStats {
            total_bytes: 30 * 1024 * 1024,
            max_size: 60 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(stats.usage_percentage(), 50.0);

        let empty = DirectoryStats::default();
        assert_eq!(empty.usage_percentage(), 0.0);
    }

    #[test]
    fn test_space_needed_and_bounds() {
        let stats = DirectoryStats {
            entry_count: 3,
            total_bytes: 1500,
            max_size: 1000,
            max_entries: 10,
            ..Default::default()
        };
        assert_eq!(stats.space_needed(), 500);
        assert!(stats.is_over_bounds());
        assert_eq!(stats.average_entry_size(), 500);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");

        let stats = DirectoryStats {
            entry_count: 2,
            total_bytes: 3 * 1024 * 1024,
            max_size: 60 * 1024 * 1024,
            max_entries: 10,
            ..Default::default()
        };
        assert_eq!(stats.usage_string(), "3.0 MiB / 60.0 MiB (2/10 entries)");
    }
}
