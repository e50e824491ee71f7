// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! XA transaction identifiers (global part + branch qualifier).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum size of the global transaction part, in bytes.
pub const MAX_GTRID_SIZE: usize = 64;
/// Maximum size of the branch qualifier, in bytes.
pub const MAX_BQUAL_SIZE: usize = 64;
/// Format id carried by the null xid.
pub const NULL_FORMAT: i64 = -1;
/// Format id used for xids minted by this transaction manager ("XATM").
pub const XATM_FORMAT: i64 = 0x5841_544d;

/// Errors raised when constructing an [`Xid`] from raw parts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum XidError {
    /// Global part exceeds [`MAX_GTRID_SIZE`].
    #[error("global transaction id too long: {0} bytes")]
    GlobalTooLong(usize),
    /// Branch part exceeds [`MAX_BQUAL_SIZE`].
    #[error("branch qualifier too long: {0} bytes")]
    BranchTooLong(usize),
    /// A non-null xid needs a non-empty global part.
    #[error("global transaction id is empty")]
    EmptyGlobal,
}

/// XA transaction identifier.
///
/// Field order is significant: derived equality and ordering compare
/// `(format, gtrid_length, bqual_length, data)`, i.e. the raw content of the
/// XA `XID` struct. Two xids that share the global part but differ in the
/// branch qualifier are branches of the same distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xid {
    format: i64,
    gtrid_length: u32,
    bqual_length: u32,
    data: Vec<u8>,
}

impl Default for Xid {
    fn default() -> Self {
        Self::null()
    }
}

impl Xid {
    /// The null xid. It has no participant semantics.
    pub fn null() -> Self {
        Self {
            format: NULL_FORMAT,
            gtrid_length: 0,
            bqual_length: 0,
            data: Vec::new(),
        }
    }

    /// Mints a fresh xid with a random global part and a random branch.
    pub fn create() -> Self {
        let gtrid = Uuid::new_v4();
        let bqual = Uuid::new_v4();
        let mut data = Vec::with_capacity(32);
        data.extend_from_slice(gtrid.as_bytes());
        data.extend_from_slice(bqual.as_bytes());
        Self {
            format: XATM_FORMAT,
            gtrid_length: 16,
            bqual_length: 16,
            data,
        }
    }

    /// Builds an xid from raw parts.
    pub fn from_parts(format: i64, gtrid: &[u8], bqual: &[u8]) -> Result<Self, XidError> {
        if gtrid.is_empty() {
            return Err(XidError::EmptyGlobal);
        }
        if gtrid.len() > MAX_GTRID_SIZE {
            return Err(XidError::GlobalTooLong(gtrid.len()));
        }
        if bqual.len() > MAX_BQUAL_SIZE {
            return Err(XidError::BranchTooLong(bqual.len()));
        }
        let mut data = Vec::with_capacity(gtrid.len() + bqual.len());
        data.extend_from_slice(gtrid);
        data.extend_from_slice(bqual);
        // lengths are bounded by the checks above
        Ok(Self {
            format,
            gtrid_length: gtrid.len() as u32,
            bqual_length: bqual.len() as u32,
            data,
        })
    }

    /// Returns a new branch of the same global transaction.
    pub fn branch(&self) -> Self {
        if self.is_null() {
            return Self::null();
        }
        let bqual = Uuid::new_v4();
        let mut data = Vec::with_capacity(self.gtrid().len() + 16);
        data.extend_from_slice(self.gtrid());
        data.extend_from_slice(bqual.as_bytes());
        Self {
            format: self.format,
            gtrid_length: self.gtrid_length,
            bqual_length: 16,
            data,
        }
    }

    /// True for the null xid.
    pub fn is_null(&self) -> bool {
        self.format == NULL_FORMAT
    }

    /// XA format identifier.
    pub fn format(&self) -> i64 {
        self.format
    }

    /// Raw global transaction bytes.
    pub fn gtrid(&self) -> &[u8] {
        let end = (self.gtrid_length as usize).min(self.data.len());
        &self.data[..end]
    }

    /// Raw branch qualifier bytes.
    pub fn bqual(&self) -> &[u8] {
        let start = (self.gtrid_length as usize).min(self.data.len());
        let end = (start + self.bqual_length as usize).min(self.data.len());
        &self.data[start..end]
    }

    /// The global part, used as the registry key.
    pub fn global(&self) -> GlobalId {
        GlobalId(self.gtrid().to_vec())
    }

    /// True when `other` is a branch of the same global transaction.
    pub fn same_global(&self, other: &Xid) -> bool {
        !self.is_null() && self.format == other.format && self.gtrid() == other.gtrid()
    }
}

impl core::fmt::Display for Xid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.gtrid()),
            hex::encode(self.bqual()),
            self.format
        )
    }
}

/// Global part of an [`Xid`]. Keys the transaction registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(Vec<u8>);

impl GlobalId {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Display for GlobalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn branch_keeps_global_and_changes_qualifier() {
        let xid = Xid::create();
        let branch = xid.branch();
        assert_eq!(xid.global(), branch.global());
        assert_ne!(xid.bqual(), branch.bqual());
        assert_ne!(xid, branch);
        assert!(xid.same_global(&branch));
    }

    #[test]
    fn null_has_no_global_semantics() {
        let null = Xid::null();
        assert!(null.is_null());
        assert!(!null.same_global(&Xid::null()));
        assert_eq!(null.branch(), Xid::null());
        assert_eq!(null.to_string(), "null");
    }

    #[test]
    fn from_parts_rejects_oversized_parts() {
        assert_eq!(
            Xid::from_parts(1, &[0u8; 65], b"b"),
            Err(XidError::GlobalTooLong(65))
        );
        assert_eq!(
            Xid::from_parts(1, b"g", &[0u8; 65]),
            Err(XidError::BranchTooLong(65))
        );
        assert_eq!(Xid::from_parts(1, b"", b"b"), Err(XidError::EmptyGlobal));
    }

    #[test]
    fn ordering_compares_lengths_before_bytes() {
        let short = Xid::from_parts(1, b"zz", b"").unwrap();
        let long = Xid::from_parts(1, b"aaa", b"").unwrap();
        assert!(short < long);
    }

    #[test]
    fn display_is_hex_gtrid_bqual_format() {
        let xid = Xid::from_parts(7, &[0xab, 0xcd], &[0x01]).unwrap();
        assert_eq!(xid.to_string(), "abcd:01:7");
        assert_eq!(xid.global().to_string(), "abcd");
    }
}
