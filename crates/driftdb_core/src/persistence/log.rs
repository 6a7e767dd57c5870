//! Commit log records and framing.

use crate::error::{CoreError, CoreResult};
use crate::model::{DocumentKey, MaybeDocument, MutationBatch, TargetData};
use crate::types::{BatchId, ListenSequenceNumber, SnapshotVersion, TargetId};
use driftdb_codec::{decode_record, encode_record, ByteString};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a log frame.
pub const LOG_MAGIC: [u8; 4] = *b"DLOG";

/// magic (4) + payload length (4)
const HEADER_SIZE: usize = 8;

/// CRC size.
const CRC_SIZE: usize = 4;

/// One logical change to the store.
///
/// A committed transaction is the ordered list of records it wrote;
/// replaying them against the previous state reproduces the new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Adds a batch to the mutation queue.
    PutMutationBatch(MutationBatch),
    /// Removes a batch from the mutation queue.
    RemoveMutationBatch(BatchId),
    /// Sets the id the next batch will receive.
    SetNextBatchId(BatchId),
    /// Stores the write-stream token.
    SetLastStreamToken(ByteString),
    /// Inserts or replaces a cached remote document.
    PutRemoteDocument {
        /// Document state.
        document: MaybeDocument,
        /// When the state was read from the server.
        read_time: SnapshotVersion,
        /// Encoded size, counted towards the cache size.
        size: u64,
    },
    /// Deletes a cached remote document.
    RemoveRemoteDocument(DocumentKey),
    /// Inserts or replaces target metadata.
    PutTarget(TargetData),
    /// Deletes a target and its matching keys.
    RemoveTarget(TargetId),
    /// Adds documents to a target's result set.
    AddMatchingKeys {
        /// Target.
        target_id: TargetId,
        /// Documents added.
        keys: Vec<DocumentKey>,
    },
    /// Removes documents from a target's result set.
    RemoveMatchingKeys {
        /// Target.
        target_id: TargetId,
        /// Documents removed.
        keys: Vec<DocumentKey>,
    },
    /// Updates the global target metadata.
    SetTargetsMetadata {
        /// Highest sequence number used by any target.
        highest_listen_sequence_number: ListenSequenceNumber,
        /// Version of the last consistent remote snapshot.
        last_remote_snapshot_version: SnapshotVersion,
    },
    /// Raises the highest allocated target id.
    SetHighestTargetId(TargetId),
    /// Records when documents last gained or lost a reference.
    TouchDocuments {
        /// Touched documents.
        keys: Vec<DocumentKey>,
        /// Sequence number of the touching transaction.
        sequence_number: ListenSequenceNumber,
    },
    /// Forgets a document's sequence marker.
    RemoveSequenceMarker(DocumentKey),
    /// Stores the session token.
    SetSessionToken(ByteString),
}

/// A unit of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFrame {
    /// Records of one committed transaction, applied on top of the
    /// current state.
    Commit {
        /// Sequence number of the transaction.
        sequence_number: ListenSequenceNumber,
        /// Records in write order.
        records: Vec<LogRecord>,
    },
    /// A full image of the store. Replay starts over from an empty state.
    Snapshot {
        /// Last sequence number handed out when the snapshot was taken.
        sequence_number: ListenSequenceNumber,
        /// Records rebuilding the whole state.
        records: Vec<LogRecord>,
    },
}

impl LogFrame {
    /// Returns the frame's sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> ListenSequenceNumber {
        match self {
            Self::Commit {
                sequence_number, ..
            }
            | Self::Snapshot {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    /// Encodes the frame with its envelope:
    /// `magic | payload length (u32 LE) | CBOR payload | crc32 (u32 LE)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or exceeds
    /// 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = encode_record(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("log frame payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        // CRC32 covers everything before it
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Result of scanning a commit log.
#[derive(Debug, Default)]
pub struct DecodedLog {
    /// Complete frames with their offsets.
    pub frames: Vec<(u64, LogFrame)>,
    /// Length of the well-formed prefix.
    pub valid_len: u64,
    /// Bytes after `valid_len` that form an incomplete frame.
    pub torn_bytes: u64,
}

/// Decodes every complete frame in `data`.
///
/// An incomplete trailing frame is reported through
/// [`DecodedLog::torn_bytes`]; it is what an interrupted append leaves
/// behind.
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] or [`CoreError::LogCorruption`]
/// if a complete frame is damaged.
pub fn decode_frames(data: &[u8]) -> CoreResult<DecodedLog> {
    let mut log = DecodedLog::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < frame_len {
            break;
        }
        let frame_offset = offset as u64;

        if rest[..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(frame_offset, "bad frame magic"));
        }

        let body = &rest[..HEADER_SIZE + len];
        let crc_bytes = &rest[HEADER_SIZE + len..frame_len];
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset: frame_offset,
                expected,
                actual,
            });
        }

        let frame: LogFrame = decode_record(&body[HEADER_SIZE..])
            .map_err(|e| CoreError::log_corruption(frame_offset, e.to_string()))?;
        log.frames.push((frame_offset, frame));
        offset += frame_len;
    }

    log.valid_len = offset as u64;
    log.torn_bytes = (data.len() - offset) as u64;
    Ok(log)
}

/// Computes the IEEE CRC32 checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
