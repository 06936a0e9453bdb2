//! Fingerprints for published contract schemas

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::schema::SchemaDocument;

/// SHA256 fingerprint of a contract's schema, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Fingerprint the document as it was submitted.
    ///
    /// Object keys keep their declaration order, so two documents that differ
    /// only in property order fingerprint differently.
    pub fn of_schema(schema: &SchemaDocument) -> Self {
        let mut hasher = Sha256::new();
        // Value serialization cannot fail: keys are strings, numbers are finite
        if serde_json::to_writer(HashWriter(&mut hasher), schema.as_json()).is_err() {
            return Self(String::new());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `schema` still has this fingerprint
    pub fn matches(&self, schema: &SchemaDocument) -> bool {
        !self.0.is_empty() && Self::of_schema(schema) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, like a git abbreviated hash
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// Streams serializer output straight into the digest
struct HashWriter<'a>(&'a mut Sha256);

impl std::io::Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
