//! Tests for the chunked upload coordinator
//!
//! These tests drive `ChunkedUploader` against an in-memory session server
//! that stores what it receives and can be scripted to fail in the ways a
//! real network does: dropped requests, requests that land but whose
//! response is lost, partially received chunks and lost sessions.

use async_trait::async_trait;
use bytes::Bytes;
use dropbox::{
    AppendOutcome, ChunkedUploader, DropboxError, Metadata, ReaderSource, Result,
    SessionTransport, UploadSessionId, UploadState, WriteMode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A fault applied to the next append call
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Connection drops before the server sees the chunk
    DropBeforeStore,
    /// Server stores the chunk, then the response is lost
    DropAfterStore,
    /// Server stores the first `k` bytes, then the connection drops
    PartialThenDrop(usize),
    /// Server already holds the first `k` bytes of this chunk and says so
    AlreadyHas(usize),
    /// Server answers with `claimed + delta` without storing anything
    ReportRelative(i64),
    /// Server has forgotten the session
    Forget,
}

/// A fault applied to the next start or finish call
#[derive(Debug, Clone, Copy)]
enum CallFault {
    Timeout,
    Forget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Start { len: usize },
    Append { offset: u64, data: Vec<u8> },
    Finish { path: String },
}

#[derive(Default)]
struct MemoryServer {
    sessions: Mutex<HashMap<String, Vec<u8>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    append_faults: Mutex<VecDeque<Option<Fault>>>,
    start_faults: Mutex<VecDeque<CallFault>>,
    finish_faults: Mutex<VecDeque<CallFault>>,
    misreported_size: Mutex<Option<u64>>,
    next_id: Mutex<u32>,
}

impl MemoryServer {
    fn new() -> Self {
        Self::default()
    }

    /// Queues faults for successive append calls; `None` means behave normally
    fn script_appends(&self, faults: impl IntoIterator<Item = Option<Fault>>) {
        self.append_faults.lock().unwrap().extend(faults);
    }

    fn script_start(&self, fault: CallFault) {
        self.start_faults.lock().unwrap().push_back(fault);
    }

    fn script_finish(&self, fault: CallFault) {
        self.finish_faults.lock().unwrap().push_back(fault);
    }

    /// Makes the commit store the file but report `bytes` as its size
    fn misreport_size(&self, bytes: u64) {
        *self.misreported_size.lock().unwrap() = Some(bytes);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn appends(&self) -> Vec<(u64, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Append { offset, data } => Some((offset, data)),
                _ => None,
            })
            .collect()
    }

    fn finish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Finish { .. }))
            .count()
    }

    fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

fn timeout() -> DropboxError {
    DropboxError::NetworkTimeout("PUT /1/chunked_upload".to_string())
}

#[async_trait]
impl SessionTransport for MemoryServer {
    async fn start(&self, chunk: Bytes) -> Result<UploadSessionId> {
        self.calls.lock().unwrap().push(Call::Start { len: chunk.len() });
        if let Some(fault) = self.start_faults.lock().unwrap().pop_front() {
            match fault {
                CallFault::Timeout => return Err(timeout()),
                CallFault::Forget => {
                    return Err(DropboxError::Protocol("no session".to_string()))
                }
            }
        }

        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("session-{}", next_id);
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), chunk.to_vec());
        Ok(UploadSessionId::new(id))
    }

    async fn append(
        &self,
        session_id: &UploadSessionId,
        offset: u64,
        chunk: Bytes,
    ) -> Result<AppendOutcome> {
        self.calls.lock().unwrap().push(Call::Append {
            offset,
            data: chunk.to_vec(),
        });
        let fault = self.append_faults.lock().unwrap().pop_front().flatten();

        let mut sessions = self.sessions.lock().unwrap();
        let Some(stored) = sessions.get_mut(session_id.as_str()) else {
            return Ok(AppendOutcome::SessionUnknown);
        };

        match fault {
            None => {}
            Some(Fault::DropBeforeStore) => return Err(timeout()),
            Some(Fault::DropAfterStore) => {
                if stored.len() as u64 == offset {
                    stored.extend_from_slice(&chunk);
                }
                return Err(timeout());
            }
            Some(Fault::PartialThenDrop(k)) => {
                if stored.len() as u64 == offset {
                    stored.extend_from_slice(&chunk[..k]);
                }
                return Err(timeout());
            }
            Some(Fault::AlreadyHas(k)) => {
                stored.extend_from_slice(&chunk[..k]);
                return Ok(AppendOutcome::OffsetMismatch(offset + k as u64));
            }
            Some(Fault::ReportRelative(delta)) => {
                return Ok(AppendOutcome::OffsetMismatch((offset as i64 + delta) as u64));
            }
            Some(Fault::Forget) => return Ok(AppendOutcome::SessionUnknown),
        }

        if stored.len() as u64 != offset {
            return Ok(AppendOutcome::OffsetMismatch(stored.len() as u64));
        }
        stored.extend_from_slice(&chunk);
        Ok(AppendOutcome::Committed)
    }

    async fn finish(
        &self,
        session_id: &UploadSessionId,
        path: &str,
        _write_mode: &WriteMode,
    ) -> Result<Option<Metadata>> {
        self.calls.lock().unwrap().push(Call::Finish {
            path: path.to_string(),
        });
        if let Some(fault) = self.finish_faults.lock().unwrap().pop_front() {
            match fault {
                CallFault::Timeout => return Err(timeout()),
                CallFault::Forget => return Ok(None),
            }
        }

        let Some(data) = self.sessions.lock().unwrap().remove(session_id.as_str()) else {
            return Ok(None);
        };
        let reported = self.misreported_size.lock().unwrap().unwrap_or(data.len() as u64);
        let metadata = Metadata {
            bytes: reported,
            path: path.to_string(),
            rev: Some("1".to_string()),
            ..Default::default()
        };
        self.files.lock().unwrap().insert(path.to_string(), data);
        Ok(Some(metadata))
    }
}

/// Deterministic, non-repeating-looking test data
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn upload(
    server: &MemoryServer,
    data: &[u8],
    chunk_size: usize,
    expected: Option<u64>,
) -> (Result<Metadata>, u64, UploadState) {
    let mut uploader = ChunkedUploader::new(server).with_chunk_size(chunk_size);
    let result = uploader
        .upload("/file.bin", &WriteMode::Add, ReaderSource::new(data), expected)
        .await;
    (result, uploader.committed_offset(), uploader.state())
}

/// Test suite for uploads without faults
#[cfg(test)]
mod round_trip_tests {
    use super::*;

    /// Every chunk size / length combination uploads byte-identical content
    ///
    /// The final committed offset must equal the input length and the
    /// number of requests must match the number of chunks.
    #[tokio::test]
    async fn test_round_trip_for_chunk_sizes_and_lengths() {
        for chunk_size in [1usize, 3, 512, 1000] {
            for len in [0usize, 1, 511, 512, 513, 1024, 2500] {
                let server = MemoryServer::new();
                let data = payload(len);

                let (result, offset, state) = upload(&server, &data, chunk_size, None).await;

                let metadata = result.unwrap();
                assert_eq!(metadata.bytes, len as u64, "c={} n={}", chunk_size, len);
                assert_eq!(offset, len as u64);
                assert_eq!(state, UploadState::Done);
                assert_eq!(server.file("/file.bin").unwrap(), data);

                let expected_appends = if len == 0 {
                    0
                } else {
                    (len + chunk_size - 1) / chunk_size - 1
                };
                assert_eq!(server.appends().len(), expected_appends, "c={} n={}", chunk_size, len);
                assert_eq!(server.finish_count(), 1);
            }
        }
    }

    /// 1024 bytes in 512-byte chunks: one start, one append, one finish
    #[tokio::test]
    async fn test_two_chunk_scenario_call_sequence() {
        let server = MemoryServer::new();
        let data = payload(1024);

        let (result, offset, _) = upload(&server, &data, 512, Some(1024)).await;

        result.unwrap();
        assert_eq!(offset, 1024);
        assert_eq!(
            server.calls(),
            vec![
                Call::Start { len: 512 },
                Call::Append {
                    offset: 512,
                    data: data[512..].to_vec()
                },
                Call::Finish {
                    path: "/file.bin".to_string()
                },
            ]
        );
    }

    /// A declared size that disagrees with the stream aborts before finish
    #[tokio::test]
    async fn test_size_mismatch_skips_finish() {
        for expected in [1000u64, 1025, 0] {
            let server = MemoryServer::new();
            let data = payload(1024);

            let (result, offset, state) = upload(&server, &data, 512, Some(expected)).await;

            match result {
                Err(DropboxError::SizeMismatch {
                    expected: e,
                    actual,
                }) => {
                    assert_eq!(e, expected);
                    assert_eq!(actual, 1024);
                }
                other => panic!("expected SizeMismatch, got {:?}", other),
            }
            assert_eq!(offset, 1024);
            assert_eq!(state, UploadState::Failed);
            assert_eq!(server.finish_count(), 0);
            assert!(server.file("/file.bin").is_none());
        }
    }
}

/// Test suite for offset reconciliation
#[cfg(test)]
mod reconciliation_tests {
    use super::*;

    /// A server that is `k` bytes ahead gets exactly one corrective append
    /// carrying the rest of the chunk
    #[tokio::test]
    async fn test_single_corrective_append() {
        for k in [1usize, 100, 511, 512] {
            let server = MemoryServer::new();
            let data = payload(1536);
            server.script_appends([Some(Fault::AlreadyHas(k))]);

            let (result, offset, _) = upload(&server, &data, 512, None).await;

            result.unwrap();
            assert_eq!(offset, 1536);
            assert_eq!(server.file("/file.bin").unwrap(), data);

            let appends = server.appends();
            assert_eq!(appends.len(), 3, "k={}", k);
            assert_eq!(appends[0], (512, data[512..1024].to_vec()));
            assert_eq!(appends[1], (512 + k as u64, data[512 + k..1024].to_vec()));
            assert_eq!(appends[2], (1024, data[1024..].to_vec()));
        }
    }

    /// A chunk that landed before the response was lost is not sent twice
    #[tokio::test]
    async fn test_lost_response_is_reconciled() {
        let server = MemoryServer::new();
        let data = payload(1500);
        server.script_appends([Some(Fault::DropAfterStore)]);

        let (result, offset, _) = upload(&server, &data, 500, Some(1500)).await;

        result.unwrap();
        assert_eq!(offset, 1500);
        assert_eq!(server.file("/file.bin").unwrap(), data);

        let appends = server.appends();
        // failed attempt, retry answered with a correction, empty remainder, next chunk
        assert_eq!(appends.len(), 4);
        assert_eq!(appends[1].0, 500);
        assert_eq!(appends[2], (1000, Vec::new()));
        assert_eq!(appends[3], (1000, data[1000..].to_vec()));
    }

    /// A partially received chunk is completed with its unsent suffix
    #[tokio::test]
    async fn test_partial_chunk_is_completed() {
        let server = MemoryServer::new();
        let data = payload(1200);
        server.script_appends([Some(Fault::PartialThenDrop(123))]);

        let (result, offset, _) = upload(&server, &data, 600, None).await;

        result.unwrap();
        assert_eq!(offset, 1200);
        assert_eq!(server.file("/file.bin").unwrap(), data);
        assert_eq!(server.appends().last().unwrap(), &(723, data[723..].to_vec()));
    }

    /// Corrections that cannot happen under sequential upload are fatal
    /// and nothing more is sent
    #[tokio::test]
    async fn test_impossible_corrections_fail_without_further_calls() {
        for delta in [0i64, -1, -512, 513] {
            let server = MemoryServer::new();
            let data = payload(2048);
            server.script_appends([Some(Fault::ReportRelative(delta))]);

            let (result, offset, state) = upload(&server, &data, 512, None).await;

            assert!(
                matches!(result, Err(DropboxError::Protocol(_))),
                "delta={} gave {:?}",
                delta,
                result
            );
            assert_eq!(offset, 512, "offset must not move on a rejected correction");
            assert_eq!(state, UploadState::Failed);
            assert_eq!(server.appends().len(), 1);
            assert_eq!(server.finish_count(), 0);
        }
    }

    /// Correction exactly one full chunk ahead is accepted
    #[tokio::test]
    async fn test_correction_of_whole_chunk_is_accepted() {
        let server = MemoryServer::new();
        let data = payload(1024);
        server.script_appends([Some(Fault::AlreadyHas(512))]);

        let (result, offset, _) = upload(&server, &data, 512, None).await;

        result.unwrap();
        assert_eq!(offset, 1024);
        assert_eq!(server.appends()[1], (1024, Vec::new()));
    }
}

/// Test suite for transient failures and lost sessions
#[cfg(test)]
mod failure_tests {
    use super::*;

    /// Three dropped appends in a row are absorbed by the default budget
    #[tokio::test]
    async fn test_three_transient_failures_then_success() {
        let server = MemoryServer::new();
        let data = payload(1024);
        server.script_appends([
            Some(Fault::DropBeforeStore),
            Some(Fault::DropBeforeStore),
            Some(Fault::DropBeforeStore),
        ]);

        let (result, offset, _) = upload(&server, &data, 512, None).await;

        result.unwrap();
        assert_eq!(offset, 1024);
        assert_eq!(server.appends().len(), 4);
        assert_eq!(server.file("/file.bin").unwrap(), data);
    }

    /// One failure more than the budget surfaces the network error
    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let server = MemoryServer::new();
        let data = payload(1024);
        server.script_appends([Some(Fault::DropBeforeStore); 4]);

        let (result, _, state) = upload(&server, &data, 512, None).await;

        assert!(matches!(result, Err(DropboxError::NetworkTimeout(_))));
        assert_eq!(state, UploadState::Failed);
        assert_eq!(server.appends().len(), 4);
        assert_eq!(server.finish_count(), 0);
    }

    /// A smaller budget is honored
    #[tokio::test]
    async fn test_custom_retry_budget() {
        let server = MemoryServer::new();
        let data = payload(1024);
        server.script_appends([Some(Fault::DropBeforeStore); 2]);

        let mut uploader = ChunkedUploader::new(&server)
            .with_chunk_size(512)
            .with_max_retries(1);
        let result = uploader
            .upload("/file.bin", &WriteMode::Add, ReaderSource::new(&data[..]), None)
            .await;

        assert!(matches!(result, Err(DropboxError::NetworkTimeout(_))));
        assert_eq!(server.appends().len(), 2);
    }

    /// Start and finish are retried too
    #[tokio::test]
    async fn test_start_and_finish_are_retried() {
        let server = MemoryServer::new();
        let data = payload(700);
        server.script_start(CallFault::Timeout);
        server.script_finish(CallFault::Timeout);

        let (result, offset, _) = upload(&server, &data, 512, None).await;

        result.unwrap();
        assert_eq!(offset, 700);
        let calls = server.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Start { .. })).count(), 2);
        assert_eq!(server.finish_count(), 2);
    }

    /// Protocol errors from start are not retried
    #[tokio::test]
    async fn test_start_protocol_error_is_fatal() {
        let server = MemoryServer::new();
        server.script_start(CallFault::Forget);

        let (result, offset, state) = upload(&server, &payload(10), 4, None).await;

        assert!(matches!(result, Err(DropboxError::Protocol(_))));
        assert_eq!(offset, 0);
        assert_eq!(state, UploadState::Failed);
        assert_eq!(server.calls().len(), 1);
    }

    /// An unknown session during append ends the upload
    #[tokio::test]
    async fn test_session_unknown_on_append() {
        let server = MemoryServer::new();
        let data = payload(2048);
        server.script_appends([None, Some(Fault::Forget)]);

        let (result, offset, _) = upload(&server, &data, 512, None).await;

        assert!(matches!(result, Err(DropboxError::SessionLost(_))));
        assert_eq!(offset, 1024);
        assert_eq!(server.appends().len(), 2);
        assert_eq!(server.finish_count(), 0);
    }

    /// A commit reporting a different file size than was uploaded is rejected
    #[tokio::test]
    async fn test_commit_size_disagreement_is_protocol_error() {
        for reported in [0u64, 999, 1001] {
            let server = MemoryServer::new();
            server.misreport_size(reported);

            let (result, offset, state) = upload(&server, &payload(1000), 256, Some(1000)).await;

            assert!(
                matches!(result, Err(DropboxError::Protocol(_))),
                "reported={} gave {:?}",
                reported,
                result
            );
            assert_eq!(offset, 1000);
            assert_eq!(state, UploadState::Failed);
            assert_eq!(server.finish_count(), 1, "a bad commit must not be retried");
        }
    }

    /// An unknown session on commit is reported as a lost session
    #[tokio::test]
    async fn test_session_unknown_on_finish() {
        let server = MemoryServer::new();
        server.script_finish(CallFault::Forget);

        let (result, offset, state) = upload(&server, &payload(100), 64, None).await;

        assert!(matches!(result, Err(DropboxError::SessionLost(_))));
        assert_eq!(offset, 100);
        assert_eq!(state, UploadState::Failed);
        assert_eq!(server.finish_count(), 1);
    }
}
