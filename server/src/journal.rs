//! Write-ahead journal backing the durable half of the store.
//!
//! Records are bincode encoded and framed with a little-endian `u32` length.
//! A single writer task owns the file: callers queue an encoded record and
//! wait for its acknowledgement, so a mutation is only applied in memory
//! after it reached the file. Requests that are already queued when the
//! writer wakes up are written together and share one flush.
//!
//! A batch that fails to write is cut back off the file, so the journal only
//! ever holds whole frames from acknowledged batches. If the cut itself
//! fails the writer stops and later appends fail with
//! [`StoreError::Closed`].

use crate::error::StoreError;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{Player, ScoreEvent};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

const FRAME_HEADER_LEN: usize = 4;
const WRITE_QUEUE_DEPTH: usize = 1024;
const MAX_BATCH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    PlayerRegistered(Player),
    ScoreAppended(ScoreEvent),
}

struct WriteRequest {
    frame: Vec<u8>,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Handle to the journal writer. Cheap to clone.
///
/// A disabled journal accepts every append without touching the disk; it
/// backs the in-memory store used by tests and `--in-memory` runs.
#[derive(Clone, Debug)]
pub struct Journal {
    tx: Option<mpsc::Sender<WriteRequest>>,
}

impl Journal {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Opens (or creates) the journal at `path`, returning the handle and
    /// every record already stored in it, oldest first.
    ///
    /// A torn record at the end of the file, left by a crash mid-write, is
    /// cut off so new records start on a clean frame boundary.
    pub async fn open(
        path: impl AsRef<Path>,
        sync_writes: bool,
    ) -> Result<(Self, Vec<JournalRecord>), StoreError> {
        let path = path.as_ref().to_path_buf();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (records, valid_len) = decode_frames(&bytes)?;
        info!(
            "Journal {} replayed: {} records, {} bytes",
            path.display(),
            records.len(),
            valid_len
        );

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if valid_len < bytes.len() {
            warn!(
                "Discarding {} trailing bytes of a torn journal record in {}",
                bytes.len() - valid_len,
                path.display()
            );
            file.set_len(valid_len as u64).await?;
        }

        let handle = file.try_clone().await?;
        let writer = JournalWriter {
            out: file,
            file: handle,
            path,
            committed_len: valid_len as u64,
            sync_writes,
        };

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        tokio::spawn(writer.run(rx));

        Ok((Self { tx: Some(tx) }, records))
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Durably appends `record`. Resolves once the writer has flushed it.
    pub async fn append(&self, record: &JournalRecord) -> Result<(), StoreError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };

        let frame = encode_frame(record)?;
        let (ack, done) = oneshot::channel();
        tx.send(WriteRequest { frame, ack })
            .await
            .map_err(|_| StoreError::Closed)?;

        done.await.map_err(|_| StoreError::Closed)??;
        Ok(())
    }
}

fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>, StoreError> {
    let payload = serialize(record)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::Journal(io::Error::new(
            io::ErrorKind::InvalidInput,
            "journal record too large",
        ))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes every complete frame in `bytes`. Returns the records and the
/// length of the prefix they occupy.
fn decode_frames(bytes: &[u8]) -> Result<(Vec<JournalRecord>, usize), StoreError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= FRAME_HEADER_LEN {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&bytes[offset..offset + FRAME_HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;

        let start = offset + FRAME_HEADER_LEN;
        if bytes.len() - start < len {
            break;
        }

        records.push(deserialize::<JournalRecord>(&bytes[start..start + len])?);
        offset = start + len;
    }

    Ok((records, offset))
}

/// Owns the journal file. `out` receives the frames; `file` is a second
/// handle on the same file used to sync and to cut off failed batches.
struct JournalWriter<W> {
    out: W,
    file: File,
    path: PathBuf,
    committed_len: u64,
    sync_writes: bool,
}

impl<W: AsyncWrite + Unpin> JournalWriter<W> {
    async fn run(mut self, mut rx: mpsc::Receiver<WriteRequest>) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while batch.len() < MAX_BATCH {
                match rx.try_recv() {
                    Ok(request) => batch.push(request),
                    Err(_) => break,
                }
            }

            if !self.commit(batch).await {
                error!("Journal writer for {} stopped", self.path.display());
                return;
            }
        }

        debug!("Journal writer for {} stopped", self.path.display());
    }

    /// Writes one batch and acknowledges every request in it. Returns false
    /// if the file could not be restored after a failed write.
    async fn commit(&mut self, batch: Vec<WriteRequest>) -> bool {
        let result = self.write_batch(&batch).await;
        let healthy = match &result {
            Ok(written) => {
                self.committed_len += written;
                debug!("Journal flushed {} records", batch.len());
                true
            }
            Err(e) => {
                error!("Journal write to {} failed: {}", self.path.display(), e);
                self.rollback().await
            }
        };

        for request in batch {
            let outcome = match &result {
                Ok(_) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            // The caller may have given up waiting; nothing to do then.
            let _ = request.ack.send(outcome);
        }
        healthy
    }

    async fn write_batch(&mut self, batch: &[WriteRequest]) -> io::Result<u64> {
        let mut written = 0u64;
        for request in batch {
            self.out.write_all(&request.frame).await?;
            written += request.frame.len() as u64;
        }
        self.out.flush().await?;
        if self.sync_writes {
            self.file.sync_data().await?;
        }
        Ok(written)
    }

    /// Cuts the file back to the end of the last acknowledged batch.
    async fn rollback(&mut self) -> bool {
        // Let writes still in flight land before truncating behind them.
        let _ = self.out.flush().await;

        match self.file.set_len(self.committed_len).await {
            Ok(()) => {
                warn!(
                    "Journal {} rolled back to {} bytes",
                    self.path.display(),
                    self.committed_len
                );
                true
            }
            Err(e) => {
                error!(
                    "Journal {} could not be rolled back: {}",
                    self.path.display(),
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::{EventId, PlayerId};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Fresh, unique directory under the system temp dir.
    pub(crate) fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "leaderboard-{}-{}-{}",
            label,
            std::process::id(),
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_records() -> Vec<JournalRecord> {
        vec![
            JournalRecord::PlayerRegistered(Player {
                id: PlayerId(1),
                name: "Alice".to_string(),
                contact: "alice@example.com".to_string(),
            }),
            JournalRecord::ScoreAppended(ScoreEvent {
                id: EventId(1),
                player_id: PlayerId(1),
                score: 40,
                achieved_at: 1_000,
            }),
            JournalRecord::ScoreAppended(ScoreEvent {
                id: EventId(2),
                player_id: PlayerId(1),
                score: 25,
                achieved_at: 1_500,
            }),
        ]
    }

    /// Passes writes through until `budget` bytes went out, then fails once.
    struct FailingOnce {
        inner: File,
        budget: Option<usize>,
    }

    impl AsyncWrite for FailingOnce {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match self.budget {
                None => Pin::new(&mut self.inner).poll_write(cx, buf),
                Some(0) => {
                    self.budget = None;
                    Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
                }
                Some(left) => {
                    let n = buf.len().min(left);
                    let polled = Pin::new(&mut self.inner).poll_write(cx, &buf[..n]);
                    if let Poll::Ready(Ok(written)) = &polled {
                        self.budget = Some(left - written);
                    }
                    polled
                }
            }
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    type Ack = oneshot::Receiver<io::Result<()>>;

    fn requests(records: &[JournalRecord]) -> (Vec<WriteRequest>, Vec<Ack>) {
        records
            .iter()
            .map(|record| {
                let (ack, done) = oneshot::channel();
                let frame = encode_frame(record).unwrap();
                (WriteRequest { frame, ack }, done)
            })
            .unzip()
    }

    #[test]
    fn test_decode_frames_stops_at_torn_tail() {
        let mut bytes = Vec::new();
        for record in sample_records() {
            bytes.extend(encode_frame(&record).unwrap());
        }
        let complete = bytes.len();
        bytes.extend_from_slice(&[12, 0, 0, 0, 1, 2]);

        let (records, valid_len) = decode_frames(&bytes).unwrap();
        assert_eq!(records, sample_records());
        assert_eq!(valid_len, complete);
    }

    #[tokio::test]
    async fn test_disabled_journal_accepts_appends() {
        let journal = Journal::disabled();
        assert!(!journal.is_enabled());
        journal.append(&sample_records()[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = scratch_dir("journal");
        let path = dir.join("journal.bin");

        {
            let (journal, existing) = Journal::open(&path, false).await.unwrap();
            assert!(existing.is_empty());
            for record in sample_records() {
                journal.append(&record).await.unwrap();
            }
        }

        let (_journal, replayed) = Journal::open(&path, true).await.unwrap();
        assert_eq!(replayed, sample_records());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated_on_open() {
        let dir = scratch_dir("torn");
        let path = dir.join("journal.bin");

        let mut bytes = encode_frame(&sample_records()[0]).unwrap();
        let good_len = bytes.len();
        bytes.extend_from_slice(&[200, 0, 0, 0, 9]);
        std::fs::write(&path, &bytes).unwrap();

        {
            let (journal, replayed) = Journal::open(&path, false).await.unwrap();
            assert_eq!(replayed.len(), 1);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len as u64);
            journal.append(&sample_records()[1]).await.unwrap();
        }

        let (_journal, replayed) = Journal::open(&path, false).await.unwrap();
        assert_eq!(replayed, sample_records()[..2].to_vec());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let dir = scratch_dir("rollback");
        let path = dir.join("journal.bin");
        let records = sample_records();
        let first_frame = encode_frame(&records[0]).unwrap();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .unwrap();
        let handle = file.try_clone().await.unwrap();
        let mut writer = JournalWriter {
            // fails three bytes into the second frame
            out: FailingOnce {
                inner: file,
                budget: Some(first_frame.len() + 3),
            },
            file: handle,
            path: path.clone(),
            committed_len: 0,
            sync_writes: false,
        };

        let (batch, acks) = requests(&records[..2]);
        assert!(writer.commit(batch).await);
        for ack in acks {
            assert!(ack.await.unwrap().is_err());
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let (batch, acks) = requests(&records[2..]);
        assert!(writer.commit(batch).await);
        for ack in acks {
            assert!(ack.await.unwrap().is_ok());
        }
        drop(writer);

        let (_journal, replayed) = Journal::open(&path, false).await.unwrap();
        assert_eq!(replayed, records[2..].to_vec());

        std::fs::remove_dir_all(dir).unwrap();
    }
}
