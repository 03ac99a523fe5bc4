//! Logical data: the cluster-wide record of one value
//!
//! Every [`LogicalData`] points at a shared state cell. Linking two logical
//! data makes them point at the same cell, so a value stored through one
//! alias is visible through all of them.

use crate::{
    CopyBarrier, DataCopy, DataError, DataLocation, DataResult, DataValue, HostDirectory,
    LocationHandle, LocationKind, Protocol, StorageBackend,
};
use fugue_metrics::{EventSink, EventSpan, TraceEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How physical copies are removed when the last alias goes away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionMode {
    /// Remove files before returning
    Sync,
    /// Remove files on a background thread, logging failures
    Async,
}

#[derive(Clone, Debug, Default)]
struct SharedState {
    key: String,
    value: Option<DataValue>,
    pscoid: Option<String>,
    binding_id: Option<String>,
    aliases: BTreeSet<String>,
    locations: Vec<DataLocation>,
    in_progress: Vec<Arc<DataCopy>>,
    size: u64,
    is_being_saved: bool,
    is_binding_data: bool,
    is_deleted: bool,
    accessed_by_main: bool,
}

type Cell = Arc<Mutex<SharedState>>;

/// Record of one storage-addressable value
pub struct LogicalData {
    name: String,
    state: RwLock<Cell>,
    hosts: Arc<dyn HostDirectory>,
}

impl fmt::Debug for LogicalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalData").field("name", &self.name).finish()
    }
}

impl LogicalData {
    /// Create a logical data known under `name`
    pub fn new(name: impl Into<String>, hosts: Arc<dyn HostDirectory>) -> Self {
        let name = name.into();
        let state = SharedState {
            key: name.clone(),
            aliases: BTreeSet::from([name.clone()]),
            ..SharedState::default()
        };
        Self {
            name,
            state: RwLock::new(Arc::new(Mutex::new(state))),
            hosts,
        }
    }

    /// Name this record was created with
    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        let slot = self.state.read();
        let mut state = slot.lock();
        f(&mut state)
    }

    fn cell(&self) -> Cell {
        Arc::clone(&self.state.read())
    }

    pub(crate) fn repoint(&self, other: &LogicalData) {
        let cell = other.cell();
        *self.state.write() = cell;
    }

    /// Both records share the same state cell
    pub fn is_alias(&self, other: &LogicalData) -> bool {
        Arc::ptr_eq(&self.cell(), &other.cell())
    }

    // ---- value ----

    /// Value held in memory, if any
    pub fn value(&self) -> Option<DataValue> {
        self.with_state(|s| s.value.clone())
    }

    /// Whether the value is held in memory
    pub fn is_in_memory(&self) -> bool {
        self.with_state(|s| s.value.is_some())
    }

    /// Store a value in memory; a persistent value also records its id
    pub fn set_value(&self, value: DataValue) {
        self.with_state(|s| {
            if let Some(id) = value.persistent_id() {
                s.pscoid = Some(id.to_string());
            }
            s.value = Some(value);
        });
    }

    /// Drop the in-memory value and its object locations
    pub fn remove_value(&self) -> Option<DataValue> {
        self.with_state(|s| {
            s.locations.retain(|l| l.protocol() != Protocol::Object);
            s.value.take()
        })
    }

    /// Persistent object id
    pub fn pscoid(&self) -> Option<String> {
        self.with_state(|s| s.pscoid.clone())
    }

    /// Binding object id
    pub fn binding_id(&self) -> Option<String> {
        self.with_state(|s| s.binding_id.clone())
    }

    /// Whether the value is managed by a language binding
    pub fn is_binding_data(&self) -> bool {
        self.with_state(|s| s.is_binding_data)
    }

    /// Record the size of the value in bytes
    pub fn set_size(&self, size: u64) {
        self.with_state(|s| s.size = size);
    }

    /// Size of the value in bytes
    pub fn size(&self) -> u64 {
        self.with_state(|s| s.size)
    }

    /// The main process reads this value
    pub fn set_accessed_by_main(&self, accessed: bool) {
        self.with_state(|s| s.accessed_by_main = accessed);
    }

    /// Whether the main process reads this value
    pub fn accessed_by_main(&self) -> bool {
        self.with_state(|s| s.accessed_by_main)
    }

    /// Whether the last alias was removed
    pub fn is_deleted(&self) -> bool {
        self.with_state(|s| s.is_deleted)
    }

    // ---- aliases ----

    /// Names referring to this value
    pub fn aliases(&self) -> Vec<String> {
        self.with_state(|s| s.aliases.iter().cloned().collect())
    }

    /// Add a name; an in-memory value gains an object location for it
    pub fn add_known_alias(&self, alias: &str) {
        let host = self.hosts.local_host().to_string();
        self.with_state(|s| {
            s.aliases.insert(alias.to_string());
            if s.value.is_some() {
                let loc = DataLocation::object(host, alias);
                self.add_location_locked(s, loc);
            }
        });
    }

    /// Remove a name. Returns true when it was the last one, in which case
    /// every copy is reclaimed and the record is marked deleted.
    pub fn remove_known_alias(&self, alias: &str, mode: DeletionMode) -> bool {
        let local = self.hosts.local_host().to_string();
        let to_delete = self.with_state(|s| {
            s.aliases.remove(alias);
            if !s.aliases.is_empty() {
                s.locations
                    .retain(|l| !(l.protocol() == Protocol::Object && l.path() == alias));
                return None;
            }

            let mut paths = Vec::new();
            for loc in &s.locations {
                for host in loc.hosts(self.hosts.as_ref()) {
                    self.hosts.mark_obsolete(&host, &s.key);
                }
                if is_local_file(loc, &local) {
                    if loc.is_checkpoint() && s.accessed_by_main {
                        tracing::debug!("Keeping checkpointed copy {} read by main", loc);
                        continue;
                    }
                    paths.push(PathBuf::from(loc.path()));
                }
            }
            s.locations.clear();
            s.value = None;
            s.is_deleted = true;
            Some(paths)
        });

        match to_delete {
            Some(paths) => {
                tracing::info!("Reclaimed {} after removing its last alias {}", self.name, alias);
                delete_paths(paths, mode);
                true
            }
            None => false,
        }
    }

    // ---- locations ----

    /// Register a physical copy
    pub fn add_location(&self, loc: DataLocation) {
        let local = self.hosts.local_host().to_string();
        let late = self.with_state(|s| {
            if s.is_deleted {
                for host in loc.hosts(self.hosts.as_ref()) {
                    self.hosts.mark_obsolete(&host, &s.key);
                }
                return Some(loc);
            }
            self.add_location_locked(s, loc);
            None
        });
        // a copy finished after the data was deleted
        if let Some(loc) = late {
            tracing::debug!("Dropping late location {} of deleted {}", loc, self.name);
            if is_local_file(&loc, &local) {
                delete_paths(vec![PathBuf::from(loc.path())], DeletionMode::Async);
            }
        }
    }

    fn add_location_locked(&self, s: &mut SharedState, loc: DataLocation) {
        match loc.kind() {
            LocationKind::Private => {
                for host in loc.listed_hosts() {
                    self.hosts.register_data(host, &s.key);
                }
            }
            LocationKind::Binding { id } => {
                s.is_binding_data = true;
                if s.binding_id.is_none() {
                    s.binding_id = Some(id.clone());
                }
                for host in loc.listed_hosts() {
                    self.hosts.register_data(host, &s.key);
                }
            }
            LocationKind::Shared { disk } => self.hosts.register_shared_data(disk, &s.key),
            LocationKind::Persistent { id } => s.pscoid = Some(id.clone()),
        }
        if !s.locations.contains(&loc) {
            s.locations.push(loc);
        }
    }

    /// Forget one physical copy
    pub fn remove_location(&self, loc: &DataLocation) -> bool {
        self.with_state(|s| {
            let before = s.locations.len();
            s.locations.retain(|l| l != loc);
            before != s.locations.len()
        })
    }

    /// Registered copies, in registration order
    pub fn locations(&self) -> Vec<DataLocation> {
        self.with_state(|s| s.locations.clone())
    }

    /// Every host able to reach a copy
    pub fn all_hosts(&self) -> BTreeSet<String> {
        self.with_state(|s| {
            s.locations
                .iter()
                .flat_map(|l| l.hosts(self.hosts.as_ref()))
                .collect()
        })
    }

    /// Paths of the copies reachable from `host`
    pub fn uris_in_host(&self, host: &str) -> Vec<String> {
        self.with_state(|s| {
            s.locations
                .iter()
                .filter_map(|l| l.uri_in_host(host, self.hosts.as_ref()))
                .collect()
        })
    }

    /// Whether `host` can read the value without a transfer
    pub fn already_available(&self, host: &str) -> bool {
        let local = self.hosts.local_host() == host;
        self.with_state(|s| {
            (local && s.value.is_some())
                || s.locations
                    .iter()
                    .any(|l| l.uri_in_host(host, self.hosts.as_ref()).is_some())
        })
    }

    /// A worker left. Its copies are dropped and, if one of them was the
    /// only copy, a location to rescue the value from is returned. Returns
    /// `None` while a previous rescue is still in progress.
    pub fn remove_host_and_check_location_to_save(
        &self,
        host: &str,
        shared_mounts: &HashMap<String, String>,
    ) -> Option<DataLocation> {
        self.with_state(|s| {
            if s.is_being_saved {
                return None;
            }
            let mut rescue = None;
            let mut kept = Vec::with_capacity(s.locations.len());
            for mut loc in s.locations.drain(..) {
                match loc.kind().clone() {
                    LocationKind::Private | LocationKind::Binding { .. } => {
                        let was_unique = loc.listed_hosts().len() == 1;
                        if loc.remove_host(host) && was_unique {
                            if rescue.is_none() {
                                rescue = Some(DataLocation::private(host, loc.protocol(), loc.path()));
                            }
                            continue;
                        }
                        if loc.listed_hosts().is_empty() {
                            continue;
                        }
                    }
                    LocationKind::Shared { disk } => {
                        if let Some(mp) = shared_mounts.get(&disk) {
                            if self.hosts.shared_disk_hosts(&disk).is_empty() {
                                if rescue.is_none() {
                                    let path = format!("{}/{}", mp.trim_end_matches('/'), loc.path());
                                    rescue = Some(DataLocation::private(host, loc.protocol(), path));
                                }
                                continue;
                            }
                        }
                    }
                    LocationKind::Persistent { .. } => {}
                }
                kept.push(loc);
            }
            s.locations = kept;
            if rescue.is_some() {
                s.is_being_saved = true;
            }
            rescue
        })
    }

    /// A rescue finished: register the saved copy and accept new rescues
    pub fn saved_to(&self, loc: DataLocation) {
        self.with_state(|s| {
            s.is_being_saved = false;
            self.add_location_locked(s, loc);
        });
    }

    // ---- storage ----

    /// Push the in-memory value to the storage backend
    pub fn write_to_storage(&self, storage: &dyn StorageBackend) -> DataResult<LocationHandle> {
        self.with_state(|s| {
            if let Some(id) = &s.pscoid {
                return Ok(LocationHandle::new(id.clone()));
            }
            let value = s
                .value
                .clone()
                .ok_or_else(|| DataError::Storage(format!("{} has no value in memory", self.name)))?;
            let handle = storage.put(&s.key, &value)?;
            s.value = Some(value.make_persistent(handle.as_str()));
            s.pscoid = Some(handle.as_str().to_string());
            s.locations.push(DataLocation::persistent(handle.as_str()));
            Ok(handle)
        })
    }

    /// Pull the value from the first location that yields one
    pub fn load_from_storage(
        &self,
        storage: &dyn StorageBackend,
        sink: &Arc<dyn EventSink>,
    ) -> DataResult<DataValue> {
        let local = self.hosts.local_host().to_string();
        self.with_state(|s| {
            if let Some(value) = &s.value {
                return Ok(value.clone());
            }
            let _span = EventSpan::enter(sink, TraceEvent::StorageGet);
            for loc in &s.locations {
                let handle = match (loc.kind(), loc.protocol()) {
                    (LocationKind::Persistent { id }, _) => LocationHandle::new(id.clone()),
                    (_, Protocol::File) => match loc.uri_in_host(&local, self.hosts.as_ref()) {
                        Some(uri) => LocationHandle::new(uri),
                        None => continue,
                    },
                    _ => continue,
                };
                match storage.get(&handle) {
                    Ok(value) => {
                        s.value = Some(value.clone());
                        return Ok(value);
                    }
                    Err(e) => tracing::debug!("Location {} of {} unusable: {}", loc, self.name, e),
                }
            }
            Err(DataError::CannotLoad(self.name.clone()))
        })
    }

    // ---- copies ----

    /// Track a transfer towards a target
    pub fn start_copy(&self, copy: Arc<DataCopy>) {
        self.with_state(|s| s.in_progress.push(copy));
    }

    /// A tracked transfer ended
    pub fn finished_copy(&self, copy: &Arc<DataCopy>) {
        copy.finish();
        self.with_state(|s| s.in_progress.retain(|c| c.id() != copy.id()));
    }

    /// Transfer already heading to the same target, if any
    pub fn already_copying(&self, target: &DataLocation) -> Option<Arc<DataCopy>> {
        self.with_state(|s| {
            s.in_progress
                .iter()
                .find(|c| c.target().is_target(target))
                .cloned()
        })
    }

    /// Transfers in flight
    pub fn copies_in_progress(&self) -> Vec<Arc<DataCopy>> {
        self.with_state(|s| s.in_progress.clone())
    }

    /// Make `barrier` wait for every transfer in flight
    pub fn notify_to_in_progress_copies_end(&self, barrier: &Arc<CopyBarrier>) {
        for copy in self.copies_in_progress() {
            barrier.add_operation();
            copy.add_listener(Arc::clone(barrier));
        }
    }

    /// Merge two records known to hold the same value.
    ///
    /// Fails without touching either side when both hold different values
    /// in memory, different persistent ids or different binding ids.
    /// Afterwards `b` points at the state cell of `a`, which holds the
    /// aliases and locations of both.
    pub fn link(a: &LogicalData, b: &LogicalData) -> DataResult<()> {
        if std::ptr::eq(a, b) {
            return Ok(());
        }
        let a_first = (a as *const LogicalData) < (b as *const LogicalData);
        let (slot_a, mut slot_b) = if a_first {
            let sa = a.state.write();
            (sa, b.state.write())
        } else {
            let sb = b.state.write();
            (a.state.write(), sb)
        };
        if Arc::ptr_eq(&slot_a, &slot_b) {
            return Ok(());
        }

        let cell_a = Arc::clone(&slot_a);
        let cell_b = Arc::clone(&slot_b);
        let (mut sa, mut sb) = if Arc::as_ptr(&cell_a) < Arc::as_ptr(&cell_b) {
            let ga = cell_a.lock();
            (ga, cell_b.lock())
        } else {
            let gb = cell_b.lock();
            (cell_a.lock(), gb)
        };

        let conflict = |reason| DataError::LinkConflict {
            left: a.name.clone(),
            right: b.name.clone(),
            reason,
        };
        if let (Some(va), Some(vb)) = (&sa.value, &sb.value) {
            if !va.same_object(vb) {
                return Err(conflict("different values in memory"));
            }
        }
        if let (Some(pa), Some(pb)) = (&sa.pscoid, &sb.pscoid) {
            if pa != pb {
                return Err(conflict("different persistent ids"));
            }
        }
        if let (Some(ba), Some(bb)) = (&sa.binding_id, &sb.binding_id) {
            if ba != bb {
                return Err(conflict("different binding ids"));
            }
        }

        if sa.value.is_none() {
            sa.value = sb.value.take();
        }
        if sa.pscoid.is_none() {
            sa.pscoid = sb.pscoid.take();
        }
        if sa.binding_id.is_none() {
            sa.binding_id = sb.binding_id.take();
        }
        sa.is_binding_data |= sb.is_binding_data;
        sa.is_being_saved |= sb.is_being_saved;
        sa.accessed_by_main |= sb.accessed_by_main;
        sa.size = sa.size.max(sb.size);
        sa.aliases.extend(sb.aliases.iter().cloned());
        for loc in sb.locations.clone() {
            a.add_location_locked(&mut sa, loc);
        }
        if sa.value.is_some() {
            let local = a.hosts.local_host().to_string();
            let aliases: Vec<String> = sa.aliases.iter().cloned().collect();
            for alias in aliases {
                a.add_location_locked(&mut sa, DataLocation::object(local.clone(), alias));
            }
        }
        for copy in &sb.in_progress {
            if !sa.in_progress.iter().any(|c| Arc::ptr_eq(c, copy)) {
                sa.in_progress.push(Arc::clone(copy));
            }
        }
        // records still on the old cell see the merged state until repointed
        let key = std::mem::take(&mut sb.key);
        *sb = SharedState { key, ..sa.clone() };

        drop(sa);
        drop(sb);
        *slot_b = Arc::clone(&cell_a);
        drop(slot_a);
        tracing::debug!("Linked {} into {}", b.name, a.name);
        Ok(())
    }
}

impl fmt::Display for LogicalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn is_local_file(loc: &DataLocation, local: &str) -> bool {
    matches!(loc.kind(), LocationKind::Private)
        && matches!(loc.protocol(), Protocol::File | Protocol::Dir)
        && loc.listed_hosts().iter().any(|h| h == local)
}

fn delete_path(path: &PathBuf) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn delete_paths(paths: Vec<PathBuf>, mode: DeletionMode) {
    if paths.is_empty() {
        return;
    }
    match mode {
        DeletionMode::Sync => {
            for path in &paths {
                if let Err(e) = delete_path(path) {
                    tracing::warn!("Could not delete {}: {}", path.display(), e);
                }
            }
        }
        DeletionMode::Async => {
            std::thread::spawn(move || {
                for path in &paths {
                    if let Err(e) = delete_path(path) {
                        tracing::error!("Asynchronous deletion of {} failed: {}", path.display(), e);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryHostDirectory, MemoryStorage};
    use fugue_metrics::NullSink;

    fn directory() -> Arc<InMemoryHostDirectory> {
        Arc::new(InMemoryHostDirectory::new("master"))
    }

    fn data(name: &str, dir: &Arc<InMemoryHostDirectory>) -> LogicalData {
        LogicalData::new(name, dir.clone() as Arc<dyn HostDirectory>)
    }

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(NullSink)
    }

    #[test]
    fn test_link_shares_value() {
        let dir = directory();
        let ld1 = data("x", &dir);
        let ld2 = data("y", &dir);
        let obj = DataValue::from("obj");
        ld1.set_value(obj.clone());

        LogicalData::link(&ld1, &ld2).unwrap();
        assert!(ld2.value().unwrap().same_object(&obj));
        assert!(ld1.is_alias(&ld2));

        let replaced = DataValue::from("new");
        ld2.set_value(replaced.clone());
        assert!(ld1.value().unwrap().same_object(&replaced));
        assert_eq!(ld1.aliases(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_link_conflicts_leave_both_sides_intact() {
        let dir = directory();
        let ld1 = data("x", &dir);
        let ld2 = data("y", &dir);
        ld1.set_value(DataValue::from("a"));
        ld2.set_value(DataValue::from("b"));

        let err = LogicalData::link(&ld1, &ld2).unwrap_err();
        assert!(matches!(err, DataError::LinkConflict { reason: "different values in memory", .. }));
        assert!(!ld1.is_alias(&ld2));
        assert_eq!(ld2.aliases(), vec!["y".to_string()]);

        let ld3 = data("z", &dir);
        let ld4 = data("w", &dir);
        ld3.add_location(DataLocation::persistent("p1"));
        ld4.add_location(DataLocation::persistent("p2"));
        assert!(LogicalData::link(&ld3, &ld4).is_err());
    }

    #[test]
    fn test_add_known_alias_adds_object_location() {
        let dir = directory();
        let ld = data("x", &dir);
        ld.add_known_alias("x2");
        assert!(ld.locations().is_empty());

        ld.set_value(DataValue::from("v"));
        ld.add_known_alias("x3");
        assert_eq!(ld.locations(), vec![DataLocation::object("master", "x3")]);
        assert!(dir.hosted_data("master").contains("x"));
    }

    #[test]
    fn test_remove_non_last_alias_keeps_value() {
        let dir = directory();
        let ld = data("x", &dir);
        ld.set_value(DataValue::from("v"));
        ld.add_known_alias("y");
        ld.add_location(DataLocation::private("w1", Protocol::File, "/tmp/none"));

        assert!(!ld.remove_known_alias("y", DeletionMode::Sync));
        assert!(ld.is_in_memory());
        assert_eq!(ld.locations().len(), 1);
        assert!(!ld.is_deleted());
    }

    #[test]
    fn test_remove_last_alias_marks_hosts_obsolete() {
        let dir = directory();
        let ld = data("x", &dir);
        ld.add_location(DataLocation::private("w1", Protocol::File, "/nonexistent/x"));

        assert!(ld.remove_known_alias("x", DeletionMode::Sync));
        assert!(ld.is_deleted());
        assert!(ld.locations().is_empty());
        assert!(dir.obsolete_data("w1").contains("x"));
    }

    #[test]
    fn test_checkpoint_read_by_main_is_kept_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("ckpt");
        std::fs::write(&file, b"data").unwrap();

        let dir = directory();
        let ld = data("x", &dir);
        ld.set_accessed_by_main(true);
        let loc = DataLocation::private("master", Protocol::File, file.to_string_lossy()).with_checkpoint();
        ld.add_location(loc);

        assert!(ld.remove_known_alias("x", DeletionMode::Sync));
        assert!(file.exists());
        assert!(ld.locations().is_empty());
    }

    #[test]
    fn test_late_location_after_delete_is_dropped() {
        let dir = directory();
        let ld = data("x", &dir);
        ld.remove_known_alias("x", DeletionMode::Sync);

        ld.add_location(DataLocation::private("w2", Protocol::Object, "x"));
        assert!(ld.locations().is_empty());
        assert!(dir.obsolete_data("w2").contains("x"));
    }

    #[test]
    fn test_storage_round_trip_through_persistent_location() {
        let dir = directory();
        let storage = MemoryStorage::new();
        let ld = data("x", &dir);
        ld.set_value(DataValue::from("payload"));

        let handle = ld.write_to_storage(&storage).unwrap();
        assert_eq!(ld.pscoid().as_deref(), Some(handle.as_str()));

        ld.remove_value();
        let loaded = ld.load_from_storage(&storage, &sink()).unwrap();
        assert_eq!(loaded.bytes().as_ref(), b"payload");
    }

    #[test]
    fn test_load_tries_locations_in_order() {
        let dir = directory();
        let storage = MemoryStorage::new();
        storage.put("/good", &DataValue::from("ok")).unwrap();

        let ld = data("x", &dir);
        ld.add_location(DataLocation::private("master", Protocol::File, "/missing"));
        ld.add_location(DataLocation::private("w9", Protocol::File, "/good"));
        assert!(matches!(
            ld.load_from_storage(&storage, &sink()),
            Err(DataError::CannotLoad(_))
        ));

        ld.add_location(DataLocation::private("master", Protocol::File, "/good"));
        assert_eq!(ld.load_from_storage(&storage, &sink()).unwrap().bytes().as_ref(), b"ok");
    }

    #[test]
    fn test_remove_host_returns_unique_copy_once() {
        let dir = directory();
        let ld = data("x", &dir);
        ld.add_location(DataLocation::private("w1", Protocol::File, "/scratch/x"));
        ld.add_location(DataLocation::object("w2", "x"));

        let rescue = ld
            .remove_host_and_check_location_to_save("w1", &HashMap::new())
            .unwrap();
        assert_eq!(rescue.path(), "/scratch/x");
        assert_eq!(ld.locations(), vec![DataLocation::object("w2", "x")]);

        assert!(ld
            .remove_host_and_check_location_to_save("w2", &HashMap::new())
            .is_none());
        ld.saved_to(DataLocation::private("master", Protocol::File, "/saved/x"));
        assert!(ld.already_available("master"));
    }

    #[test]
    fn test_remove_host_rescues_orphaned_shared_copy() {
        let dir = directory();
        dir.add_mount("gpfs", "w1", "/gpfs");
        let ld = data("x", &dir);
        ld.add_location(DataLocation::shared("gpfs", Protocol::File, "x.dat"));
        assert!(dir.shared_data("gpfs").contains("x"));

        let mounts = dir.remove_host("w1");
        let rescue = ld.remove_host_and_check_location_to_save("w1", &mounts).unwrap();
        assert_eq!(rescue.path(), "/gpfs/x.dat");
    }

    #[test]
    fn test_copy_tracking() {
        let dir = directory();
        let ld = data("x", &dir);
        let target = DataLocation::object("w1", "x");
        let copy = DataCopy::new("x", target.clone());
        ld.start_copy(Arc::clone(&copy));
        assert!(ld.already_copying(&target).is_some());

        let barrier = CopyBarrier::new();
        ld.notify_to_in_progress_copies_end(&barrier);
        assert_eq!(barrier.pending(), 1);

        ld.finished_copy(&copy);
        assert_eq!(barrier.pending(), 0);
        assert!(ld.already_copying(&target).is_none());
    }

    #[test]
    fn test_uris_and_hosts() {
        let dir = directory();
        dir.add_mount("nfs", "w3", "/mnt/nfs");
        let ld = data("x", &dir);
        ld.add_location(DataLocation::private("w1", Protocol::File, "/a"));
        ld.add_location(DataLocation::shared("nfs", Protocol::File, "b"));

        assert_eq!(ld.uris_in_host("w3"), vec!["/mnt/nfs/b".to_string()]);
        let hosts: Vec<String> = ld.all_hosts().into_iter().collect();
        assert_eq!(hosts, vec!["w1".to_string(), "w3".to_string()]);
    }
}
