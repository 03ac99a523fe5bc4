//! Host bookkeeping collaborator
//!
//! Logical data notify the hosts holding their copies through a
//! [`HostDirectory`] instead of reaching for process-wide registries.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Which data each host holds, which copies became obsolete, and which hosts
/// mount each shared disk
pub trait HostDirectory: Send + Sync {
    /// Name of the host running the master (the "main" process)
    fn local_host(&self) -> &str;

    /// `host` holds a copy of `data`
    fn register_data(&self, host: &str, data: &str);

    /// The copy of `data` on `host` is no longer needed
    fn mark_obsolete(&self, host: &str, data: &str);

    /// `data` lives on the shared disk `disk`
    fn register_shared_data(&self, disk: &str, data: &str);

    /// Hosts currently mounting `disk`
    fn shared_disk_hosts(&self, disk: &str) -> Vec<String>;

    /// Mount point of `disk` on `host`
    fn mount_point(&self, host: &str, disk: &str) -> Option<String>;
}

/// In-memory [`HostDirectory`]
#[derive(Debug)]
pub struct InMemoryHostDirectory {
    local_host: String,
    hosted: DashMap<String, BTreeSet<String>>,
    obsolete: DashMap<String, BTreeSet<String>>,
    shared_data: DashMap<String, BTreeSet<String>>,
    mounts: DashMap<String, BTreeMap<String, String>>,
}

impl InMemoryHostDirectory {
    /// Create a directory for the given master host
    pub fn new(local_host: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
            hosted: DashMap::new(),
            obsolete: DashMap::new(),
            shared_data: DashMap::new(),
            mounts: DashMap::new(),
        }
    }

    /// `host` mounts `disk` at `mount_point`
    pub fn add_mount(&self, disk: &str, host: &str, mount_point: &str) {
        self.mounts
            .entry(disk.to_string())
            .or_default()
            .insert(host.to_string(), mount_point.to_string());
    }

    /// Forget a host; returns the shared disks it mounted with their mount points
    pub fn remove_host(&self, host: &str) -> HashMap<String, String> {
        self.hosted.remove(host);
        let mut removed = HashMap::new();
        for mut entry in self.mounts.iter_mut() {
            if let Some(mp) = entry.value_mut().remove(host) {
                removed.insert(entry.key().clone(), mp);
            }
        }
        removed
    }

    /// Data registered on a host
    pub fn hosted_data(&self, host: &str) -> BTreeSet<String> {
        self.hosted
            .get(host)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Obsolete copies accumulated for a host
    pub fn obsolete_data(&self, host: &str) -> BTreeSet<String> {
        self.obsolete
            .get(host)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Drain the obsolete copies of a host
    pub fn take_obsolete(&self, host: &str) -> BTreeSet<String> {
        self.obsolete
            .remove(host)
            .map(|(_, set)| set)
            .unwrap_or_default()
    }

    /// Data registered on a shared disk
    pub fn shared_data(&self, disk: &str) -> BTreeSet<String> {
        self.shared_data
            .get(disk)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }
}

impl HostDirectory for InMemoryHostDirectory {
    fn local_host(&self) -> &str {
        &self.local_host
    }

    fn register_data(&self, host: &str, data: &str) {
        self.hosted
            .entry(host.to_string())
            .or_default()
            .insert(data.to_string());
    }

    fn mark_obsolete(&self, host: &str, data: &str) {
        if let Some(mut set) = self.hosted.get_mut(host) {
            set.remove(data);
        }
        self.obsolete
            .entry(host.to_string())
            .or_default()
            .insert(data.to_string());
    }

    fn register_shared_data(&self, disk: &str, data: &str) {
        self.shared_data
            .entry(disk.to_string())
            .or_default()
            .insert(data.to_string());
    }

    fn shared_disk_hosts(&self, disk: &str) -> Vec<String> {
        self.mounts
            .get(disk)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn mount_point(&self, host: &str, disk: &str) -> Option<String> {
        self.mounts.get(disk).and_then(|m| m.get(host).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obsolete_moves_data() {
        let dir = InMemoryHostDirectory::new("master");
        dir.register_data("w1", "d1v1");
        dir.mark_obsolete("w1", "d1v1");

        assert!(dir.hosted_data("w1").is_empty());
        assert_eq!(dir.take_obsolete("w1").len(), 1);
        assert!(dir.obsolete_data("w1").is_empty());
    }

    #[test]
    fn test_remove_host_returns_mounts() {
        let dir = InMemoryHostDirectory::new("master");
        dir.add_mount("gpfs", "w1", "/gpfs");
        dir.add_mount("gpfs", "w2", "/mnt/gpfs");

        let removed = dir.remove_host("w1");
        assert_eq!(removed.get("gpfs").map(String::as_str), Some("/gpfs"));
        assert_eq!(dir.shared_disk_hosts("gpfs"), vec!["w2".to_string()]);
        assert_eq!(dir.mount_point("w2", "gpfs").as_deref(), Some("/mnt/gpfs"));
    }
}
