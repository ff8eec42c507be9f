//! Voice Chunk Sequencer
//!
//! Audio chunks from one recording session are transcribed concurrently, but
//! the transcript is assembled strictly in sequence-number order: an explicit
//! cursor only appends chunk N once every chunk below N has reached a
//! terminal state. A failed chunk contributes no text but does not block the
//! cursor, and closing a session waits for in-flight transcriptions instead
//! of cancelling them.

use crate::transcribe::Transcriber;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Bound on concurrent transcription calls per voice session.
const MAX_IN_FLIGHT_CHUNKS: usize = 8;
/// One retry per chunk before it is marked failed.
const TRANSCRIBE_ATTEMPTS: u32 = 2;
/// Per-call budget; an elapsed call counts as a failed attempt.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum ChunkState {
    Sent,
    Transcribing,
    Done(String),
    Failed,
}

impl ChunkState {
    fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Done(_) | ChunkState::Failed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice session {0} not found")]
    SessionNotFound(Uuid),
    #[error("voice session {0} is already closing")]
    SessionClosing(Uuid),
}

struct SessionInner {
    chunks: BTreeMap<u32, ChunkState>,
    /// Next sequence number the assembler may emit.
    cursor: u32,
    assembled: String,
    closing: bool,
}

impl SessionInner {
    /// Appends every chunk the cursor has become allowed to emit.
    fn advance_cursor(&mut self) {
        while let Some(state) = self.chunks.get(&self.cursor) {
            match state {
                ChunkState::Done(text) => {
                    let text = text.clone();
                    self.assembled.push_str(&text);
                }
                ChunkState::Failed => {}
                ChunkState::Sent | ChunkState::Transcribing => break,
            }
            self.cursor += 1;
        }
    }

    fn all_terminal(&self) -> bool {
        self.chunks.values().all(ChunkState::is_terminal)
    }
}

struct VoiceSession {
    user_id: String,
    inner: Mutex<SessionInner>,
    settled: Notify,
    permits: Arc<Semaphore>,
}

pub struct VoiceSequencer {
    transcriber: Arc<dyn Transcriber>,
    sessions: Mutex<HashMap<Uuid, Arc<VoiceSession>>>,
    call_timeout: Duration,
}

impl VoiceSequencer {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            sessions: Mutex::new(HashMap::new()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn open_session(&self, user_id: &str) -> Uuid {
        let voice_session_id = Uuid::new_v4();
        let session = Arc::new(VoiceSession {
            user_id: user_id.to_string(),
            inner: Mutex::new(SessionInner {
                chunks: BTreeMap::new(),
                cursor: 1,
                assembled: String::new(),
                closing: false,
            }),
            settled: Notify::new(),
            permits: Arc::new(Semaphore::new(MAX_IN_FLIGHT_CHUNKS)),
        });
        self.sessions
            .lock()
            .await
            .insert(voice_session_id, session);
        info!(%voice_session_id, user_id, "voice session opened");
        voice_session_id
    }

    /// Accepts a chunk and fires its transcription immediately; multiple
    /// chunks may be in flight at once.
    pub async fn submit_chunk(
        &self,
        voice_session_id: Uuid,
        seq: u32,
        audio: Bytes,
    ) -> Result<(), VoiceError> {
        let session = self.session(voice_session_id).await?;
        {
            let mut inner = session.inner.lock().await;
            if inner.closing {
                return Err(VoiceError::SessionClosing(voice_session_id));
            }
            if inner.chunks.contains_key(&seq) {
                warn!(%voice_session_id, seq, "duplicate chunk ignored");
                return Ok(());
            }
            inner.chunks.insert(seq, ChunkState::Sent);
        }

        let transcriber = self.transcriber.clone();
        let call_timeout = self.call_timeout;
        tokio::spawn(async move {
            // The semaphore bounds in-flight provider calls; acquire cannot
            // fail because the semaphore is never closed.
            let _permit = session
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("voice session semaphore closed");
            {
                let mut inner = session.inner.lock().await;
                inner.chunks.insert(seq, ChunkState::Transcribing);
            }

            let mut state = ChunkState::Failed;
            for attempt in 1..=TRANSCRIBE_ATTEMPTS {
                match tokio::time::timeout(call_timeout, transcriber.transcribe(audio.clone()))
                    .await
                {
                    Ok(Ok(text)) => {
                        state = ChunkState::Done(text);
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(seq, attempt, error = %e, "chunk transcription failed");
                    }
                    Err(_) => {
                        warn!(seq, attempt, "chunk transcription timed out");
                    }
                }
            }

            let mut inner = session.inner.lock().await;
            inner.chunks.insert(seq, state);
            inner.advance_cursor();
            drop(inner);
            session.settled.notify_waiters();
        });
        Ok(())
    }

    /// Waits for every submitted chunk to reach a terminal state, then
    /// returns the fully assembled transcript and tears the session down.
    pub async fn close_session(&self, voice_session_id: Uuid) -> Result<String, VoiceError> {
        let session = self.session(voice_session_id).await?;
        {
            let mut inner = session.inner.lock().await;
            if inner.closing {
                return Err(VoiceError::SessionClosing(voice_session_id));
            }
            inner.closing = true;
        }

        loop {
            let settled = session.settled.notified();
            {
                let inner = session.inner.lock().await;
                if inner.all_terminal() {
                    break;
                }
            }
            settled.await;
        }

        let text = {
            let mut inner = session.inner.lock().await;
            inner.advance_cursor();
            // Sequence numbers that were never submitted leave the cursor
            // stalled; flush the remaining terminal chunks in order.
            let cursor = inner.cursor;
            let tail: Vec<String> = inner
                .chunks
                .range(cursor..)
                .filter_map(|(_, state)| match state {
                    ChunkState::Done(text) => Some(text.clone()),
                    _ => None,
                })
                .collect();
            for text in tail {
                inner.assembled.push_str(&text);
            }
            inner.assembled.clone()
        };

        self.sessions.lock().await.remove(&voice_session_id);
        info!(%voice_session_id, user_id = %session.user_id, chars = text.len(), "voice session closed");
        Ok(text)
    }

    async fn session(&self, voice_session_id: Uuid) -> Result<Arc<VoiceSession>, VoiceError> {
        self.sessions
            .lock()
            .await
            .get(&voice_session_id)
            .cloned()
            .ok_or(VoiceError::SessionNotFound(voice_session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::{MockTranscriber, TranscribeError};
    use mockall::Sequence;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transcriber whose latency and outcome are scripted per sequence
    /// number; the chunk audio carries the number as UTF-8.
    struct ScriptedTranscriber {
        delays_ms: HashMap<u32, u64>,
        failing: HashSet<u32>,
        calls: AtomicUsize,
    }

    impl ScriptedTranscriber {
        fn new(delays_ms: HashMap<u32, u64>, failing: HashSet<u32>) -> Self {
            Self {
                delays_ms,
                failing,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(&self, audio: Bytes) -> Result<String, TranscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let seq: u32 = String::from_utf8(audio.to_vec()).unwrap().parse().unwrap();
            let delay = self.delays_ms.get(&seq).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.failing.contains(&seq) {
                Err(TranscribeError::Unavailable("scripted failure".into()))
            } else {
                Ok(seq.to_string())
            }
        }
    }

    fn chunk(seq: u32) -> Bytes {
        Bytes::from(seq.to_string())
    }

    #[tokio::test]
    async fn out_of_order_completion_assembles_in_order() {
        // Completion order ends up 3, 5, 1, 2, 4; assembly must not.
        let delays = HashMap::from([(1, 40), (2, 50), (3, 5), (4, 70), (5, 10)]);
        let transcriber = Arc::new(ScriptedTranscriber::new(delays, HashSet::new()));
        let sequencer = VoiceSequencer::new(transcriber);

        let id = sequencer.open_session("alice").await;
        for seq in 1..=5 {
            sequencer.submit_chunk(id, seq, chunk(seq)).await.unwrap();
        }
        let text = sequencer.close_session(id).await.unwrap();
        assert_eq!(text, "12345");
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped_not_blocking() {
        let transcriber = Arc::new(ScriptedTranscriber::new(
            HashMap::new(),
            HashSet::from([2u32]),
        ));
        let sequencer = VoiceSequencer::new(transcriber.clone());

        let id = sequencer.open_session("alice").await;
        for seq in 1..=4 {
            sequencer.submit_chunk(id, seq, chunk(seq)).await.unwrap();
        }
        let text = sequencer.close_session(id).await.unwrap();
        assert_eq!(text, "134");
        // Chunk 2 got its single retry: 3 clean calls + 2 failing ones.
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn retry_once_then_succeed() {
        let mut mock = MockTranscriber::new();
        let mut seq = Sequence::new();
        mock.expect_transcribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TranscribeError::Unavailable("blip".into())));
        mock.expect_transcribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("hello".to_string()));

        let sequencer = VoiceSequencer::new(Arc::new(mock));
        let id = sequencer.open_session("alice").await;
        sequencer.submit_chunk(id, 1, chunk(1)).await.unwrap();
        let text = sequencer.close_session(id).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn duplicate_sequence_numbers_are_ignored() {
        let transcriber = Arc::new(ScriptedTranscriber::new(HashMap::new(), HashSet::new()));
        let sequencer = VoiceSequencer::new(transcriber.clone());

        let id = sequencer.open_session("alice").await;
        sequencer.submit_chunk(id, 1, chunk(1)).await.unwrap();
        sequencer.submit_chunk(id, 1, chunk(1)).await.unwrap();
        let text = sequencer.close_session(id).await.unwrap();
        assert_eq!(text, "1");
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_submitted_gap_is_flushed_at_close() {
        let transcriber = Arc::new(ScriptedTranscriber::new(HashMap::new(), HashSet::new()));
        let sequencer = VoiceSequencer::new(transcriber);

        let id = sequencer.open_session("alice").await;
        sequencer.submit_chunk(id, 1, chunk(1)).await.unwrap();
        sequencer.submit_chunk(id, 3, chunk(3)).await.unwrap();
        let text = sequencer.close_session(id).await.unwrap();
        assert_eq!(text, "13");
    }

    #[tokio::test]
    async fn closed_session_is_gone() {
        let transcriber = Arc::new(ScriptedTranscriber::new(HashMap::new(), HashSet::new()));
        let sequencer = VoiceSequencer::new(transcriber);

        let id = sequencer.open_session("alice").await;
        sequencer.close_session(id).await.unwrap();
        let err = sequencer.submit_chunk(id, 1, chunk(1)).await.unwrap_err();
        assert!(matches!(err, VoiceError::SessionNotFound(_)));
    }
}
