//! Accelerator device enumeration.
//!
//! A [`DeviceSet`] is the fixed, ordered inventory of accelerator slots
//! available to the process. It is built once at start-up and never changes
//! for the lifetime of the run; every replica and every shard index maps 1:1
//! to an entry, in the same order. There is no elastic membership - this is
//! an array of slots, not a pool.

use std::fmt;
use std::num::NonZeroUsize;

use crate::error::{Result, TrainError};

/// Identifier of one accelerator slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device{}", self.0)
    }
}

/// The ordered, immutable set of devices for a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSet {
    ids: Vec<DeviceId>,
}

impl DeviceSet {
    /// Creates a set of `count` devices numbered `0..count`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `count` is zero - a run with no
    /// devices cannot execute the transform at all.
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(TrainError::Config(
                "device set must contain at least one device".to_string(),
            ));
        }
        Ok(Self {
            ids: (0..count).map(DeviceId).collect(),
        })
    }

    /// Enumerates the devices available to this process.
    ///
    /// One slot per hardware execution unit reported by the OS. Falls back
    /// to a single device if the parallelism query fails.
    pub fn enumerate() -> Self {
        let count = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            ids: (0..count).map(DeviceId).collect(),
        }
    }

    /// Number of devices in the set. Always at least 1.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// A `DeviceSet` is never empty, but the standard pairing with `len`
    /// is provided for completeness.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the device at slot `index`.
    pub fn get(&self, index: usize) -> Option<DeviceId> {
        self.ids.get(index).copied()
    }

    /// Iterates over devices in slot order.
    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.ids.iter().copied()
    }
}
