//! Session recording format: length-delimited bincode records.
//!
//! A recording is `Start`, then any interleaving of `Frame` and `Event`, then
//! `End`. The same framing works over files, pipes and sockets.

use std::path::Path;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::events::FeedbackEvent;
use crate::pose::Frame;

/// 1レコードの最大長
const MAX_RECORD_LENGTH: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionRecord {
    Start {
        session: String,
        exercise: String,
        /// RFC 3339
        started_at: String,
    },
    Frame(Frame),
    Event(FeedbackEvent),
    End {
        session: String,
        repetitions: u32,
        frames: u64,
    },
}

pub type RecordStream<T> = Framed<T, LengthDelimitedCodec>;

/// Create a framed record stream with length-delimited framing.
pub fn record_stream<T: AsyncRead + AsyncWrite>(io: T) -> RecordStream<T> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_RECORD_LENGTH)
        .new_codec();
    Framed::new(io, codec)
}

/// Send a serializable message (bincode + length prefix).
pub async fn send_message<T, M>(stream: &mut RecordStream<T>, msg: &M) -> anyhow::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    let data = bincode::serialize(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive and deserialize a message. `None` at a clean end of stream.
pub async fn recv_message<T, M>(stream: &mut RecordStream<T>) -> anyhow::Result<Option<M>>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    match stream.next().await {
        Some(Ok(bytes)) => Ok(Some(bincode::deserialize(&bytes)?)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

/// 記録ファイルへの書き込み
pub struct RecordWriter {
    stream: RecordStream<tokio::fs::File>,
    written: usize,
}

impl RecordWriter {
    pub async fn create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create recording {}", path.display()))?;
        Ok(Self {
            stream: record_stream(file),
            written: 0,
        })
    }

    pub async fn write(&mut self, record: &SessionRecord) -> anyhow::Result<()> {
        send_message(&mut self.stream, record).await?;
        self.written += 1;
        Ok(())
    }

    /// バッファを書き出して閉じる
    pub async fn close(mut self) -> anyhow::Result<usize> {
        SinkExt::<Bytes>::close(&mut self.stream).await?;
        Ok(self.written)
    }
}

/// 記録ファイルを全て読む。先頭が `Start` でなければエラー
pub async fn read_recording<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<SessionRecord>> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open recording {}", path.display()))?;
    let mut stream = record_stream(file);
    let mut records = Vec::new();
    while let Some(record) = recv_message::<_, SessionRecord>(&mut stream).await? {
        records.push(record);
    }
    match records.first() {
        Some(SessionRecord::Start { .. }) => Ok(records),
        _ => Err(anyhow!("{} is not a session recording", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TrackingLossReason;
    use crate::pose::{Keypoint, KeypointIndex, Pose};
    use crate::tracker::Phase;

    fn sample_records() -> Vec<SessionRecord> {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftKnee, Keypoint::new(0.45, 0.7, 0.9));
        vec![
            SessionRecord::Start {
                session: "s1".to_string(),
                exercise: "squat".to_string(),
                started_at: "2026-01-01T00:00:00+00:00".to_string(),
            },
            SessionRecord::Frame(Frame::new(0, 0, pose)),
            SessionRecord::Event(FeedbackEvent::PhaseTransition {
                session: "s1".to_string(),
                from: Phase::Idle,
                to: Phase::Ascending,
                frame_index: 0,
                timestamp_ms: 0,
            }),
            SessionRecord::Event(FeedbackEvent::TrackingLost {
                session: "s1".to_string(),
                frame_index: 0,
                timestamp_ms: 0,
                reason: TrackingLossReason::Backpressure { dropped: 2 },
            }),
            SessionRecord::End {
                session: "s1".to_string(),
                repetitions: 0,
                frames: 1,
            },
        ]
    }

    #[tokio::test]
    async fn test_records_over_duplex() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut writer = record_stream(a);
        let mut reader = record_stream(b);

        let records = sample_records();
        for r in &records {
            send_message(&mut writer, r).await.unwrap();
        }
        drop(writer);

        let mut received = Vec::new();
        while let Some(r) = recv_message::<_, SessionRecord>(&mut reader).await.unwrap() {
            received.push(r);
        }
        assert_eq!(received, records);
    }

    #[tokio::test]
    async fn test_recording_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");

        let mut writer = RecordWriter::create(&path).await.unwrap();
        for r in &sample_records() {
            writer.write(r).await.unwrap();
        }
        assert_eq!(writer.close().await.unwrap(), 5);

        let records = read_recording(&path).await.unwrap();
        assert_eq!(records, sample_records());
    }

    #[tokio::test]
    async fn test_rejects_non_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();
        assert!(read_recording(&path).await.is_err());
    }
}
