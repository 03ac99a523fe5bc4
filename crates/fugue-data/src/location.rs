//! Physical locations of a value

use crate::HostDirectory;
use std::fmt;

/// How a location is addressed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Object in the memory of a process
    Object,
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Object in a persistent object store
    Persistent,
    /// Object managed by a language binding
    Binding,
}

/// Ownership class of a location
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocationKind {
    /// Held by the listed hosts only
    Private,
    /// Stored on a shared disk, visible from every host mounting it
    Shared {
        /// Shared disk identifier
        disk: String,
    },
    /// Held by a language binding on the listed hosts
    Binding {
        /// Binding object identifier
        id: String,
    },
    /// Held by the persistent object store
    Persistent {
        /// Persistent object identifier
        id: String,
    },
}

/// One place where a copy of a value lives
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataLocation {
    kind: LocationKind,
    protocol: Protocol,
    path: String,
    hosts: Vec<String>,
    is_checkpoint: bool,
}

impl DataLocation {
    /// Private location on one host
    pub fn private(host: impl Into<String>, protocol: Protocol, path: impl Into<String>) -> Self {
        Self {
            kind: LocationKind::Private,
            protocol,
            path: path.into(),
            hosts: vec![host.into()],
            is_checkpoint: false,
        }
    }

    /// In-memory object location named after an alias
    pub fn object(host: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::private(host, Protocol::Object, alias)
    }

    /// File on a shared disk; `path` is relative to the mount point
    pub fn shared(disk: impl Into<String>, protocol: Protocol, path: impl Into<String>) -> Self {
        Self {
            kind: LocationKind::Shared { disk: disk.into() },
            protocol,
            path: path.into(),
            hosts: Vec::new(),
            is_checkpoint: false,
        }
    }

    /// Binding-managed object on one host
    pub fn binding(host: impl Into<String>, id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: LocationKind::Binding { id: id.into() },
            protocol: Protocol::Binding,
            path: path.into(),
            hosts: vec![host.into()],
            is_checkpoint: false,
        }
    }

    /// Object in the persistent store
    pub fn persistent(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: LocationKind::Persistent { id: id.clone() },
            protocol: Protocol::Persistent,
            path: id,
            hosts: Vec::new(),
            is_checkpoint: false,
        }
    }

    /// Mark the location as written by a checkpoint
    pub fn with_checkpoint(mut self) -> Self {
        self.is_checkpoint = true;
        self
    }

    /// Ownership class
    pub fn kind(&self) -> &LocationKind {
        &self.kind
    }

    /// Addressing protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Path, alias or identifier of the copy
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the location was produced by a checkpoint
    pub fn is_checkpoint(&self) -> bool {
        self.is_checkpoint
    }

    /// Shared disk of a shared location
    pub fn shared_disk(&self) -> Option<&str> {
        match &self.kind {
            LocationKind::Shared { disk } => Some(disk),
            _ => None,
        }
    }

    /// Hosts able to reach this copy
    pub fn hosts(&self, directory: &dyn HostDirectory) -> Vec<String> {
        match &self.kind {
            LocationKind::Shared { disk } => directory.shared_disk_hosts(disk),
            LocationKind::Persistent { .. } => Vec::new(),
            LocationKind::Private | LocationKind::Binding { .. } => self.hosts.clone(),
        }
    }

    /// Path of the copy as seen from `host`, if reachable from it
    pub fn uri_in_host(&self, host: &str, directory: &dyn HostDirectory) -> Option<String> {
        match &self.kind {
            LocationKind::Shared { disk } => directory
                .mount_point(host, disk)
                .map(|mp| format!("{}/{}", mp.trim_end_matches('/'), self.path)),
            LocationKind::Persistent { .. } => None,
            LocationKind::Private | LocationKind::Binding { .. } => self
                .hosts
                .iter()
                .any(|h| h == host)
                .then(|| self.path.clone()),
        }
    }

    /// Hosts listed on a private or binding location
    pub fn listed_hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Drop `host` from the listed hosts; returns whether it was listed
    pub(crate) fn remove_host(&mut self, host: &str) -> bool {
        let before = self.hosts.len();
        self.hosts.retain(|h| h != host);
        before != self.hosts.len()
    }

    /// Same copy target (used to detect duplicate transfers)
    pub fn is_target(&self, other: &DataLocation) -> bool {
        self.kind == other.kind && self.path == other.path && self.hosts == other.hosts
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LocationKind::Private => write!(f, "{:?}://{}@{}", self.protocol, self.path, self.hosts.join(",")),
            LocationKind::Shared { disk } => write!(f, "{:?}://{}@shared:{}", self.protocol, self.path, disk),
            LocationKind::Binding { id } => write!(f, "binding://{}({})@{}", id, self.path, self.hosts.join(",")),
            LocationKind::Persistent { id } => write!(f, "persistent://{}", id),
        }
    }
}
