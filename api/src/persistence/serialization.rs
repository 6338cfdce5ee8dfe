//! Schema versioning for persisted documents.
//!
//! Each top-level persisted document is wrapped with a schema version so an older build loading
//! a newer file can at least detect the mismatch instead of silently misreading fields. Forward
//! compatibility within a major version is handled by `unknown_props` on the structs themselves;
//! this module only concerns the outer envelope.

use serde::{Deserialize, Serialize};

/// Current schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Wraps a persisted payload with the schema version it was written under.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedDocument<T> {
    pub schema_version: u32,
    pub payload: T,
}

impl<T> VersionedDocument<T> {
    pub fn new(payload: T) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Why a loaded document couldn't be accepted as-is.
#[derive(Copy, Clone, Eq, PartialEq, Debug, thiserror::Error)]
pub enum SchemaMismatch {
    #[error("document was written by a newer schema version ({found}), this build understands up to {max}")]
    TooNew { found: u32, max: u32 },
}

/// Checks a loaded schema version against what this build understands.
///
/// Older versions are accepted (the per-struct `unknown_props`/`#[serde(default)]` machinery
/// handles the gaps); a version newer than [`CURRENT_SCHEMA_VERSION`] is rejected outright since
/// there's no way to know what changed.
pub fn check_schema_version(found: u32) -> Result<(), SchemaMismatch> {
    if found > CURRENT_SCHEMA_VERSION {
        Err(SchemaMismatch::TooNew {
            found,
            max: CURRENT_SCHEMA_VERSION,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_current_and_older() {
        assert!(check_schema_version(CURRENT_SCHEMA_VERSION).is_ok());
        assert!(check_schema_version(0).is_ok());
    }

    #[test]
    fn rejects_newer() {
        assert_eq!(
            check_schema_version(CURRENT_SCHEMA_VERSION + 1),
            Err(SchemaMismatch::TooNew {
                found: CURRENT_SCHEMA_VERSION + 1,
                max: CURRENT_SCHEMA_VERSION,
            })
        );
    }
}
