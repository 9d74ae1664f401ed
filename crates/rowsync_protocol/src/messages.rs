//! Step-specific request and response bodies.
//!
//! Every message carries the session's [`SyncContext`]; the receiving side
//! merges the copy it gets back into its own instance.

use rowsync_codec::{CodecResult, SerializationFormat};
use rowsync_core::{
    BatchInfo, ConflictPolicy, ContainerSet, DatabaseChangesApplied, DatabaseChangesSelected,
    ScopeInfo, SyncContext,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A protocol body.
pub trait StepMessage: Serialize + DeserializeOwned {
    /// The session context carried by the message.
    fn context(&self) -> &SyncContext;

    /// Encodes the message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    fn encode(&self, format: SerializationFormat) -> CodecResult<Vec<u8>> {
        format.encode(self)
    }

    /// Decodes a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a message of this type.
    fn decode(format: SerializationFormat, bytes: &[u8]) -> CodecResult<Self> {
        format.decode(bytes)
    }
}

/// Body of `EnsureScopes` and `EnsureSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeRequest {
    /// Session context.
    pub context: SyncContext,
}

/// Server scope returned by the handshake steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeResponse {
    /// Session context.
    pub context: SyncContext,
    /// The server's scope, schema included.
    pub server_scope: ScopeInfo,
}

/// One part of a batch on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPartPayload {
    /// Part index.
    pub index: u32,
    /// True for the final part.
    pub is_last: bool,
    /// Rows of the part.
    pub container: ContainerSet,
}

/// Body of `SendChangesInProgress`: one uploaded part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesRequest {
    /// Session context.
    pub context: SyncContext,
    /// The client's scope, used for its id and last server timestamp.
    pub client_scope: ScopeInfo,
    /// The part.
    pub part: BatchPartPayload,
}

/// Acknowledges one uploaded part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesResponse {
    /// Session context.
    pub context: SyncContext,
    /// Index of the part received.
    pub received_index: u32,
    /// Parts held by the server for this upload so far.
    pub parts_received: u32,
}

/// Body of `GetChanges`: ask for server changes with nothing to upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChangesRequest {
    /// Session context.
    pub context: SyncContext,
    /// The client's scope.
    pub client_scope: ScopeInfo,
}

/// Body of `GetSummary` and `SendEndDownloadChanges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Session context.
    pub context: SyncContext,
}

/// Descriptor of the server changeset prepared for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesSummary {
    /// Session context.
    pub context: SyncContext,
    /// Server timestamp the client records once the download is applied.
    pub remote_timestamp: i64,
    /// Part descriptors; payloads are fetched with `GetMoreChanges`.
    pub batch: BatchInfo,
    /// Rows selected on the server.
    pub selected: DatabaseChangesSelected,
    /// Uploaded rows applied on the server.
    pub applied: DatabaseChangesApplied,
    /// Conflict policy the server applied.
    pub policy: ConflictPolicy,
}

/// Body of `GetMoreChanges`: one part by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMoreChangesRequest {
    /// Session context.
    pub context: SyncContext,
    /// Part index.
    pub index: u32,
}

/// One downloaded part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartResponse {
    /// Session context.
    pub context: SyncContext,
    /// The part.
    pub part: BatchPartPayload,
}

/// Body of `GetSnapshot`: the descriptor when `index` is `None`, otherwise
/// one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSnapshotRequest {
    /// Session context.
    pub context: SyncContext,
    /// Part index.
    pub index: Option<u32>,
}

/// Snapshot descriptor or part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// Session context.
    pub context: SyncContext,
    /// Descriptor; `None` when the scope has no snapshot.
    pub batch: Option<BatchInfo>,
    /// Requested part.
    pub part: Option<BatchPartPayload>,
}

/// Acknowledges `SendEndDownloadChanges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndDownloadResponse {
    /// Session context.
    pub context: SyncContext,
}

/// Body of `GetEstimatedChangesCount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedChangesRequest {
    /// Session context.
    pub context: SyncContext,
    /// The client's scope.
    pub client_scope: ScopeInfo,
}

/// Rows the server would send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedChangesResponse {
    /// Session context.
    pub context: SyncContext,
    /// Estimated rows per table.
    pub selected: DatabaseChangesSelected,
}

impl StepMessage for EnsureScopeRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for EnsureScopeResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for SendChangesRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for SendChangesResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for GetChangesRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for SessionRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for ChangesSummary {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for GetMoreChangesRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for PartResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for GetSnapshotRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for SnapshotResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for EndDownloadResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for EstimatedChangesRequest {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

impl StepMessage for EstimatedChangesResponse {
    fn context(&self) -> &SyncContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_codec::Value;
    use rowsync_core::{DataType, RowState, SyncColumn, SyncSet, SyncSetup, SyncTable};

    fn schema() -> SyncSet {
        let mut t = SyncTable::new("Product");
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        t.add_column(SyncColumn::new("Photo", DataType::Bytes)).unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(t).unwrap()
    }

    #[test]
    fn upload_part_survives_every_format() {
        let schema = schema();
        let key = schema.tables()[0].key();
        let mut container = ContainerSet::new();
        container.push(
            &key,
            vec![
                Value::Integer(RowState::Modified.to_code()),
                Value::Integer(7),
                Value::Bytes(vec![0xde, 0xad]),
            ],
        );
        let mut scope = ScopeInfo::new("default", SyncSetup::default());
        scope.schema = Some(schema);
        let request = SendChangesRequest {
            context: SyncContext::new("default"),
            client_scope: scope,
            part: BatchPartPayload {
                index: 0,
                is_last: true,
                container,
            },
        };
        for format in SerializationFormat::ALL {
            let bytes = request.encode(format).unwrap();
            let back = SendChangesRequest::decode(format, &bytes).unwrap();
            assert_eq!(back.part, request.part);
            assert_eq!(back.context().session_id, request.context.session_id);
        }
    }

    #[test]
    fn summary_omits_part_payloads() {
        let mut batch = BatchInfo::in_memory(schema(), SerializationFormat::Json);
        let key = batch.sanitized_schema.tables()[0].key();
        let mut container = ContainerSet::new();
        container.push(
            &key,
            vec![Value::Integer(RowState::Added.to_code()), Value::Integer(1), Value::Null],
        );
        batch.write_part(0, container, true).unwrap();

        let summary = ChangesSummary {
            context: SyncContext::new("default"),
            remote_timestamp: 12,
            batch,
            selected: DatabaseChangesSelected::default(),
            applied: DatabaseChangesApplied::default(),
            policy: ConflictPolicy::ServerWins,
        };
        let bytes = summary.encode(SerializationFormat::Json).unwrap();
        let back = ChangesSummary::decode(SerializationFormat::Json, &bytes).unwrap();
        assert_eq!(back.batch.rows_count, 1);
        assert_eq!(back.batch.parts.len(), 1);
        assert!(back.batch.parts[0].data.is_none());
    }

    #[test]
    fn wrong_message_type_fails_to_decode() {
        let request = GetMoreChangesRequest {
            context: SyncContext::new("default"),
            index: 3,
        };
        let bytes = request.encode(SerializationFormat::Json).unwrap();
        assert!(EnsureScopeResponse::decode(SerializationFormat::Json, &bytes).is_err());
    }
}
