//! Represents one uploaded project archive held on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored upload awaiting validation and a single download.
///
/// The stored name doubles as the download token, so it is generated from a
/// random UUID rather than anything a client could guess or enumerate.
/// Nothing about an upload survives its download (or expiry sweep).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredUpload {
    /// Generated on-disk name, `<uuid-v4>.zip`.
    pub stored_name: String,

    /// Filename reported by the client, kept for logging only.
    pub original_name: String,

    /// Size in bytes as counted while streaming to disk.
    pub size_bytes: u64,

    /// When the upload finished arriving.
    pub received_at: DateTime<Utc>,
}
