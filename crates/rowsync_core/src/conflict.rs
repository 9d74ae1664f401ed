//! Conflict detection and resolution.

use crate::row::{RowState, SyncRow};
use crate::schema::TableKey;
use serde::{Deserialize, Serialize};

/// Shape of a conflict between a stored row and an incoming row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both sides hold a live row.
    RemoteExistsLocalExists,
    /// Incoming row is live, stored row is a tombstone.
    RemoteExistsLocalIsDeleted,
    /// Incoming row is a tombstone, stored row is live.
    RemoteIsDeletedLocalExists,
    /// Both sides deleted the row.
    RemoteIsDeletedLocalIsDeleted,
}

impl ConflictType {
    /// Classifies a conflict from the two row states.
    #[must_use]
    pub fn classify(remote: RowState, local: RowState) -> Self {
        match (remote == RowState::Deleted, local == RowState::Deleted) {
            (false, false) => ConflictType::RemoteExistsLocalExists,
            (false, true) => ConflictType::RemoteExistsLocalIsDeleted,
            (true, false) => ConflictType::RemoteIsDeletedLocalExists,
            (true, true) => ConflictType::RemoteIsDeletedLocalIsDeleted,
        }
    }

    /// Converts to a code.
    #[must_use]
    pub fn to_code(self) -> u8 {
        match self {
            ConflictType::RemoteExistsLocalExists => 1,
            ConflictType::RemoteExistsLocalIsDeleted => 2,
            ConflictType::RemoteIsDeletedLocalExists => 3,
            ConflictType::RemoteIsDeletedLocalIsDeleted => 4,
        }
    }

    /// Converts from a code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictType::RemoteExistsLocalExists),
            2 => Some(ConflictType::RemoteExistsLocalIsDeleted),
            3 => Some(ConflictType::RemoteIsDeletedLocalExists),
            4 => Some(ConflictType::RemoteIsDeletedLocalIsDeleted),
            _ => None,
        }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// The stored row is kept.
    KeepLocal,
    /// The incoming row is written.
    AcceptRemote,
}

/// Conflict resolution policy.
///
/// Within one apply call the policy reads from the applying store's point
/// of view, the applying store playing the server: `ServerWins` keeps the
/// stored row, `ClientWins` writes the incoming row. A client applying the
/// server's changes therefore uses [`reversed`](Self::reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The server's row wins.
    #[default]
    ServerWins,
    /// The client's row wins.
    ClientWins,
}

impl ConflictPolicy {
    /// The policy the non-authoritative side applies.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            ConflictPolicy::ServerWins => ConflictPolicy::ClientWins,
            ConflictPolicy::ClientWins => ConflictPolicy::ServerWins,
        }
    }

    /// Resolves a conflict in the applying store.
    #[must_use]
    pub fn resolve(self) -> ConflictResolution {
        match self {
            ConflictPolicy::ServerWins => ConflictResolution::KeepLocal,
            ConflictPolicy::ClientWins => ConflictResolution::AcceptRemote,
        }
    }

    /// Converts to a code.
    #[must_use]
    pub fn to_code(self) -> u8 {
        match self {
            ConflictPolicy::ServerWins => 1,
            ConflictPolicy::ClientWins => 2,
        }
    }

    /// Converts from a code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::ServerWins),
            2 => Some(ConflictPolicy::ClientWins),
            _ => None,
        }
    }
}

/// A detected conflict, sent to the optional conflict log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    /// Table of both rows.
    pub table: TableKey,
    /// Conflict shape.
    pub conflict_type: ConflictType,
    /// Row held by the applying store.
    pub local_row: SyncRow,
    /// Incoming row.
    pub remote_row: SyncRow,
    /// How it was resolved.
    pub resolution: ConflictResolution,
    /// Error raised while writing the winner, if any.
    pub error: Option<String>,
}
