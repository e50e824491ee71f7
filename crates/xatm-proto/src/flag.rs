// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! XA flag words passed to switch operations.

use serde::{Deserialize, Serialize};

/// XA flags (`TM*` constants from `xa.h`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XaFlags(u64);

impl XaFlags {
    /// `TMNOFLAGS`
    pub const NO_FLAGS: Self = Self(0);
    /// `TMENDRSCAN`
    pub const END_SCAN: Self = Self(0x0080_0000);
    /// `TMSTARTRSCAN`
    pub const START_SCAN: Self = Self(0x0100_0000);
    /// `TMSUSPEND`
    pub const SUSPEND: Self = Self(0x0200_0000);
    /// `TMSUCCESS`
    pub const SUCCESS: Self = Self(0x0400_0000);
    /// `TMRESUME`
    pub const RESUME: Self = Self(0x0800_0000);
    /// `TMFAIL`
    pub const FAIL: Self = Self(0x2000_0000);
    /// `TMONEPHASE`
    pub const ONE_PHASE: Self = Self(0x4000_0000);
    /// `TMJOIN`
    pub const JOIN: Self = Self(0x0020_0000);

    /// Raw flag word.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Builds flags from a raw word.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// True when every bit in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for XaFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::fmt::Display for XaFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
