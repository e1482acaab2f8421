// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Photo/attachment upload abstraction.
//!
//! Compression and archive packing are the collaborator's problem; the
//! engine hands over raw captures and stores the returned URI in the
//! operation payload.

use std::future::Future;
use std::pin::Pin;

use beat_core::EntityKind;

/// Error type for attachment uploads.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Failed(String),
}

/// A captured photo awaiting upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Black-box uploader for photographic evidence.
pub trait PhotoUploader: Send + Sync {
    /// Upload the photos for an entity, returning the remote archive URI.
    fn upload(
        &self,
        kind: EntityKind,
        entity_id: &str,
        photos: &[Photo],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, UploadError>> + Send + '_>>;
}
