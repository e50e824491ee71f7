// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! XA return codes and their severity ranking.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// XA return code, as returned by a resource manager switch and carried in
/// every transaction reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XaCode {
    /// `XA_OK`
    Ok,
    /// `XA_RDONLY`: the branch did no durable work.
    ReadOnly,
    /// `XA_RETRY`
    Retry,
    /// `XA_HEURMIX`
    HeuristicMix,
    /// `XA_HEURRB`
    HeuristicRollback,
    /// `XA_HEURCOM`
    HeuristicCommit,
    /// `XA_HEURHAZ`
    HeuristicHazard,
    /// `XA_NOMIGRATE`
    NoMigrate,
    /// `XA_RBROLLBACK`
    RbRollback,
    /// `XA_RBCOMMFAIL`
    RbCommFail,
    /// `XA_RBDEADLOCK`
    RbDeadlock,
    /// `XA_RBINTEGRITY`
    RbIntegrity,
    /// `XA_RBOTHER`
    RbOther,
    /// `XA_RBPROTO`
    RbProto,
    /// `XA_RBTIMEOUT`
    RbTimeout,
    /// `XA_RBTRANSIENT`
    RbTransient,
    /// `XAER_ASYNC`
    Async,
    /// `XAER_RMERR`
    ResourceError,
    /// `XAER_NOTA`: the xid is unknown to the resource.
    NotA,
    /// `XAER_INVAL`
    Invalid,
    /// `XAER_PROTO`
    Protocol,
    /// `XAER_RMFAIL`
    ResourceFail,
    /// `XAER_DUPID`
    DuplicateId,
    /// `XAER_OUTSIDE`
    Outside,
}

impl XaCode {
    /// Every code, in declaration order.
    pub const ALL: [Self; 24] = [
        Self::Ok,
        Self::ReadOnly,
        Self::Retry,
        Self::HeuristicMix,
        Self::HeuristicRollback,
        Self::HeuristicCommit,
        Self::HeuristicHazard,
        Self::NoMigrate,
        Self::RbRollback,
        Self::RbCommFail,
        Self::RbDeadlock,
        Self::RbIntegrity,
        Self::RbOther,
        Self::RbProto,
        Self::RbTimeout,
        Self::RbTransient,
        Self::Async,
        Self::ResourceError,
        Self::NotA,
        Self::Invalid,
        Self::Protocol,
        Self::ResourceFail,
        Self::DuplicateId,
        Self::Outside,
    ];

    /// Numeric XA value (`xa.h`).
    pub const fn value(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ReadOnly => 3,
            Self::Retry => 4,
            Self::HeuristicMix => 5,
            Self::HeuristicRollback => 6,
            Self::HeuristicCommit => 7,
            Self::HeuristicHazard => 8,
            Self::NoMigrate => 9,
            Self::RbRollback => 100,
            Self::RbCommFail => 101,
            Self::RbDeadlock => 102,
            Self::RbIntegrity => 103,
            Self::RbOther => 104,
            Self::RbProto => 105,
            Self::RbTimeout => 106,
            Self::RbTransient => 107,
            Self::Async => -2,
            Self::ResourceError => -3,
            Self::NotA => -4,
            Self::Invalid => -5,
            Self::Protocol => -6,
            Self::ResourceFail => -7,
            Self::DuplicateId => -8,
            Self::Outside => -9,
        }
    }

    /// Maps a raw XA value. Anything unrecognised is treated as `XAER_RMFAIL`.
    pub const fn from_value(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            3 => Self::ReadOnly,
            4 => Self::Retry,
            5 => Self::HeuristicMix,
            6 => Self::HeuristicRollback,
            7 => Self::HeuristicCommit,
            8 => Self::HeuristicHazard,
            9 => Self::NoMigrate,
            100 => Self::RbRollback,
            101 => Self::RbCommFail,
            102 => Self::RbDeadlock,
            103 => Self::RbIntegrity,
            104 => Self::RbOther,
            105 => Self::RbProto,
            106 => Self::RbTimeout,
            107 => Self::RbTransient,
            -2 => Self::Async,
            -3 => Self::ResourceError,
            -4 => Self::NotA,
            -5 => Self::Invalid,
            -6 => Self::Protocol,
            -8 => Self::DuplicateId,
            -9 => Self::Outside,
            _ => Self::ResourceFail,
        }
    }

    /// Severity rank; lower is more severe.
    pub const fn severity(self) -> u8 {
        match self {
            Self::HeuristicHazard => 0,
            Self::HeuristicMix => 1,
            Self::HeuristicCommit => 2,
            Self::HeuristicRollback => 3,
            Self::ResourceFail => 4,
            Self::ResourceError => 5,
            Self::RbIntegrity => 6,
            Self::RbCommFail => 7,
            Self::RbRollback => 8,
            Self::RbOther => 9,
            Self::RbDeadlock => 10,
            Self::Protocol => 11,
            Self::RbProto => 12,
            Self::RbTimeout => 13,
            Self::RbTransient => 14,
            Self::Invalid => 15,
            Self::NoMigrate => 16,
            Self::Outside => 17,
            Self::Async => 18,
            Self::Retry => 19,
            Self::DuplicateId => 20,
            Self::NotA => 21,
            Self::Ok => 22,
            Self::ReadOnly => 23,
        }
    }

    /// The more severe of two codes.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() < self.severity() {
            other
        } else {
            self
        }
    }

    /// Most severe code in `codes`, `ReadOnly` for an empty set.
    pub fn worst_of<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        codes.into_iter().fold(Self::ReadOnly, Self::worst)
    }

    /// `XA_RB*` range.
    pub const fn is_rollback(self) -> bool {
        matches!(
            self,
            Self::RbRollback
                | Self::RbCommFail
                | Self::RbDeadlock
                | Self::RbIntegrity
                | Self::RbOther
                | Self::RbProto
                | Self::RbTimeout
                | Self::RbTransient
        )
    }

    /// `XA_HEUR*` range.
    pub const fn is_heuristic(self) -> bool {
        matches!(
            self,
            Self::HeuristicMix
                | Self::HeuristicRollback
                | Self::HeuristicCommit
                | Self::HeuristicHazard
        )
    }

    /// `XA_OK` or `XA_RDONLY`.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::ReadOnly)
    }
}

impl core::fmt::Display for XaCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Ok => "XA_OK",
            Self::ReadOnly => "XA_RDONLY",
            Self::Retry => "XA_RETRY",
            Self::HeuristicMix => "XA_HEURMIX",
            Self::HeuristicRollback => "XA_HEURRB",
            Self::HeuristicCommit => "XA_HEURCOM",
            Self::HeuristicHazard => "XA_HEURHAZ",
            Self::NoMigrate => "XA_NOMIGRATE",
            Self::RbRollback => "XA_RBROLLBACK",
            Self::RbCommFail => "XA_RBCOMMFAIL",
            Self::RbDeadlock => "XA_RBDEADLOCK",
            Self::RbIntegrity => "XA_RBINTEGRITY",
            Self::RbOther => "XA_RBOTHER",
            Self::RbProto => "XA_RBPROTO",
            Self::RbTimeout => "XA_RBTIMEOUT",
            Self::RbTransient => "XA_RBTRANSIENT",
            Self::Async => "XAER_ASYNC",
            Self::ResourceError => "XAER_RMERR",
            Self::NotA => "XAER_NOTA",
            Self::Invalid => "XAER_INVAL",
            Self::Protocol => "XAER_PROTO",
            Self::ResourceFail => "XAER_RMFAIL",
            Self::DuplicateId => "XAER_DUPID",
            Self::Outside => "XAER_OUTSIDE",
        };
        f.write_str(name)
    }
}

/// A string that names no XA code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown XA code '{0}'")]
pub struct ParseCodeError(pub String);

impl core::str::FromStr for XaCode {
    type Err = ParseCodeError;

    /// Accepts the `xa.h` name (`XA_RDONLY`, `XAER_RMERR`, any case) or the
    /// numeric value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<i32>() {
            return Self::ALL
                .into_iter()
                .find(|c| c.value() == value)
                .ok_or_else(|| ParseCodeError(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseCodeError(s.to_string()))
    }
}
