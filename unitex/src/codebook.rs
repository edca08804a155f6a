//! Shared read-only ETC1S global codebook.
//!
//! A [`GlobalCodebook`] is loaded at most once per batch from an
//! existing universal container, wrapped in an `Arc`, and handed to
//! every job as a shared reference. It is never mutated after load and
//! requires no locking.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::container::{self, UniversalContainer};
use crate::format::EncodingKind;

/// Errors loading or validating a global codebook.
#[derive(Debug, Error)]
pub enum CodebookError {
    #[error("failed to read codebook file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("codebook container is invalid: {0}")]
    Parse(#[from] container::ContainerError),

    #[error("global codebook must come from an ETC1S container, found {0}")]
    WrongEncoding(EncodingKind),

    #[error("container has no embedded codebook to lift")]
    Empty,
}

/// Immutable endpoint/selector tables shared across a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalCodebook {
    endpoint_count: u32,
    selector_count: u32,
    data: Vec<u8>,
    digest: u64,
}

/// FNV-1a over the codebook bytes; used for the advisory content
/// comparison.
fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = 0xCBF2_9CE4_8422_2325u64;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

impl GlobalCodebook {
    /// Lift the codebook out of an existing ETC1S container.
    pub fn from_container(container: &UniversalContainer) -> Result<Self, CodebookError> {
        if container.encoding != EncodingKind::Etc1s {
            return Err(CodebookError::WrongEncoding(container.encoding));
        }
        if container.codebook.is_empty() {
            return Err(CodebookError::Empty);
        }
        Ok(Self {
            endpoint_count: container.endpoint_count,
            selector_count: container.selector_count,
            digest: fnv1a64(&container.codebook),
            data: container.codebook.clone(),
        })
    }

    /// Load from a universal container file on disk.
    pub fn load(path: &Path) -> Result<Arc<Self>, CodebookError> {
        let bytes = std::fs::read(path).map_err(|source| CodebookError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let container = container::parse(&bytes)?;
        Ok(Arc::new(Self::from_container(&container)?))
    }

    pub fn endpoint_count(&self) -> u32 {
        self.endpoint_count
    }

    pub fn selector_count(&self) -> u32 {
        self.selector_count
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    /// Check whether a container's codebook reference matches these
    /// tables.
    ///
    /// The behavior-affecting check is the entry-count comparison,
    /// matching the established format. A content digest is compared
    /// as well, but a digest mismatch with matching counts only emits
    /// a warning; flagged as a deliberate deviation rather than a
    /// silent behavior change.
    pub fn matches(&self, container: &UniversalContainer) -> bool {
        let counts_match = self.endpoint_count == container.endpoint_count
            && self.selector_count == container.selector_count;
        if counts_match && !container.codebook.is_empty() {
            let digest = fnv1a64(&container.codebook);
            if digest != self.digest {
                warn!(
                    expected = format_args!("{:016x}", self.digest),
                    found = format_args!("{digest:016x}"),
                    "global codebook entry counts match but contents differ"
                );
            }
        }
        counts_match
    }
}
