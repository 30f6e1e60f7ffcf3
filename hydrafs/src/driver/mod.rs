//! Outbound boundary to the OS virtualization driver.
//!
//! The driver owns the on-disk placeholder primitives. The virtualizer calls
//! these operations; the driver reports failures as a Win32-style code plus
//! a message, and update/delete report a structured [`UpdateFailureReason`].

mod memory;

use std::ops::BitOr;
use std::time::SystemTime;

use thiserror::Error;

pub use memory::MemoryDriver;

// =============================================================================
// Result codes
// =============================================================================

pub const ERROR_FILE_NOT_FOUND: i32 = 2;
pub const ERROR_ACCESS_DENIED: i32 = 5;
pub const ERROR_NOT_READY: i32 = 21;
pub const ERROR_FILE_EXISTS: i32 = 80;
pub const ERROR_ALREADY_INITIALIZED: i32 = 1247;

/// A driver primitive failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why an update or delete did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFailureReason {
    NoFailure,
    /// The file was modified outside virtualization control.
    DirtyFile,
    FileNotFound,
    /// The file is read-only and the flags did not allow it.
    ReadOnly,
    /// The path holds a deletion tombstone.
    Tombstone,
}

/// Which conflicting states an update or delete may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    pub const NONE: UpdateFlags = UpdateFlags(0);
    pub const ALLOW_DIRTY_METADATA: UpdateFlags = UpdateFlags(0x1);
    pub const ALLOW_DIRTY_DATA: UpdateFlags = UpdateFlags(0x2);
    pub const ALLOW_TOMBSTONE: UpdateFlags = UpdateFlags(0x4);
    pub const ALLOW_READ_ONLY: UpdateFlags = UpdateFlags(0x20);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: UpdateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateFlags {
    type Output = UpdateFlags;

    fn bitor(self, rhs: Self) -> Self {
        UpdateFlags(self.0 | rhs.0)
    }
}

/// Timestamps stamped onto a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTimestamps {
    pub created: Option<SystemTime>,
    pub last_access: Option<SystemTime>,
    pub last_write: Option<SystemTime>,
    pub changed: Option<SystemTime>,
}

/// Metadata written into an on-disk placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderInfo {
    pub is_directory: bool,
    pub size: u64,
    pub provider_id: String,
    /// Identifies the content version the placeholder mirrors.
    pub content_id: Vec<u8>,
    pub timestamps: FileTimestamps,
}

impl PlaceholderInfo {
    pub fn file(provider_id: impl Into<String>, content_id: Vec<u8>, size: u64) -> Self {
        Self {
            is_directory: false,
            size,
            provider_id: provider_id.into(),
            content_id,
            timestamps: FileTimestamps::default(),
        }
    }

    pub fn directory(provider_id: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            size: 0,
            provider_id: provider_id.into(),
            content_id: Vec::new(),
            timestamps: FileTimestamps::default(),
        }
    }

    pub fn with_timestamps(mut self, timestamps: FileTimestamps) -> Self {
        self.timestamps = timestamps;
        self
    }
}

/// Primitives the virtualizer issues to the driver.
///
/// Paths are normalized repository-relative paths. Implementations are
/// called concurrently from driver callback threads.
pub trait VirtualizationDriver: Send + Sync {
    /// Marks the working directory root as virtualized by `provider_id`.
    fn convert_directory_to_virtualization_root(&self, provider_id: &str)
        -> Result<(), DriverError>;

    /// Registers the provider; callbacks may arrive after this returns.
    fn start(&self) -> Result<(), DriverError>;

    fn stop(&self);

    fn write_placeholder_file(&self, path: &str, info: &PlaceholderInfo) -> Result<(), DriverError>;

    fn write_placeholder_directory(&self, path: &str, info: &PlaceholderInfo) -> Result<(), DriverError>;

    /// Rewrites placeholder metadata, dropping any hydrated content.
    fn update_placeholder(
        &self,
        path: &str,
        info: &PlaceholderInfo,
        flags: UpdateFlags,
    ) -> Result<UpdateFailureReason, DriverError>;

    fn delete_file(&self, path: &str, flags: UpdateFlags) -> Result<UpdateFailureReason, DriverError>;

    /// Drops cached "does not exist" answers. Returns how many were dropped.
    fn clear_negative_path_cache(&self) -> Result<u32, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_flags() {
        let flags = UpdateFlags::ALLOW_DIRTY_DATA | UpdateFlags::ALLOW_READ_ONLY;
        assert!(flags.contains(UpdateFlags::ALLOW_DIRTY_DATA));
        assert!(!flags.contains(UpdateFlags::ALLOW_TOMBSTONE));
        assert!(flags.contains(UpdateFlags::NONE));
        assert_eq!(flags.bits(), 0x22);
    }
}
