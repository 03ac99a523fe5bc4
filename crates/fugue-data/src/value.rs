//! In-memory values

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A value held in memory by the runtime.
///
/// Cloning a `DataValue` yields another handle to the same object:
/// [`DataValue::same_object`] compares identity, not content.
#[derive(Clone)]
pub struct DataValue {
    bytes: Arc<Bytes>,
    persistent_id: Option<Arc<str>>,
}

impl DataValue {
    /// Wrap serialized content into a new object
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: Arc::new(bytes.into()),
            persistent_id: None,
        }
    }

    /// Serialized content
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the content is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Both handles refer to the same object
    pub fn same_object(&self, other: &DataValue) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Identifier in the persistent object store, if the object was persisted
    pub fn persistent_id(&self) -> Option<&str> {
        self.persistent_id.as_deref()
    }

    /// Same object, now known to live in the persistent object store
    pub fn make_persistent(&self, id: impl Into<Arc<str>>) -> DataValue {
        Self {
            bytes: Arc::clone(&self.bytes),
            persistent_id: Some(id.into()),
        }
    }
}

impl fmt::Debug for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataValue")
            .field("len", &self.bytes.len())
            .field("persistent_id", &self.persistent_id)
            .finish()
    }
}

impl From<&'static str> for DataValue {
    fn from(s: &'static str) -> Self {
        DataValue::new(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(v: Vec<u8>) -> Self {
        DataValue::new(v)
    }
}
