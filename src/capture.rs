//! Voice capture: recorded audio plus an optional local transcript.
//!
//! The recorder only collects. The transcript is a display label for the
//! conversation log; the model always receives the raw audio.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Shown in the log when no transcript was captured.
pub const VOICE_PLACEHOLDER: &str = "[voice input]";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUtterance {
    pub audio: Vec<u8>,
    pub mime_type: String,
    pub transcript: Option<String>,
}

impl RecordedUtterance {
    /// Text for the user's log entry.
    pub fn label(&self) -> &str {
        self.transcript.as_deref().unwrap_or(VOICE_PLACEHOLDER)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.audio)
    }
}

/// One recognition result from the local speech recogniser.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub is_final: bool,
}

/// Sending half handed to the recogniser. Results keep flowing after audio
/// capture stops, until the recorder's settle window closes.
#[derive(Debug, Clone)]
pub struct TranscriptSink(mpsc::UnboundedSender<TranscriptResult>);

impl TranscriptSink {
    pub fn push(&self, text: impl Into<String>, is_final: bool) {
        let result = TranscriptResult {
            text: text.into(),
            is_final,
        };
        if self.0.send(result).is_err() {
            debug!("Transcript result dropped: recorder is gone");
        }
    }
}

#[derive(Debug)]
pub struct VoiceRecorder {
    mime_type: String,
    chunks: Vec<Vec<u8>>,
    transcript: String,
    recording: bool,
    sink: mpsc::UnboundedSender<TranscriptResult>,
    results: mpsc::UnboundedReceiver<TranscriptResult>,
}

impl VoiceRecorder {
    pub fn new(mime_type: impl Into<String>) -> Self {
        let (sink, results) = mpsc::unbounded_channel();
        Self {
            mime_type: mime_type.into(),
            chunks: Vec::new(),
            transcript: String::new(),
            recording: false,
            sink,
            results,
        }
    }

    /// Where the recogniser delivers its results.
    pub fn transcript_sink(&self) -> TranscriptSink {
        TranscriptSink(self.sink.clone())
    }

    /// Begin a fresh utterance, discarding anything left from the last one.
    pub fn start(&mut self) {
        self.chunks.clear();
        self.transcript.clear();
        while self.results.try_recv().is_ok() {}
        self.recording = true;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Empty chunks are ignored.
    pub fn push_chunk(&mut self, data: &[u8]) {
        if self.recording && !data.is_empty() {
            self.chunks.push(data.to_vec());
        }
    }

    /// Only final results reach the label.
    fn accept(&mut self, result: TranscriptResult) {
        if result.is_final {
            self.transcript.push_str(&result.text);
        }
    }

    /// Stop audio capture, keep collecting transcript results for `settle`,
    /// then hand back the utterance.
    pub async fn finish(&mut self, settle: Duration) -> Option<RecordedUtterance> {
        if !self.recording {
            return None;
        }
        self.recording = false;

        let deadline = Instant::now() + settle;
        while let Ok(Some(result)) = tokio::time::timeout_at(deadline, self.results.recv()).await {
            self.accept(result);
        }
        Some(self.take())
    }

    /// Stop without waiting. Results already delivered are kept.
    pub fn take(&mut self) -> RecordedUtterance {
        self.recording = false;
        while let Ok(result) = self.results.try_recv() {
            self.accept(result);
        }
        let audio = std::mem::take(&mut self.chunks).concat();
        let transcript = std::mem::take(&mut self.transcript).trim().to_string();
        debug!(
            "Recorded {} bytes of {} (transcript: {})",
            audio.len(),
            self.mime_type,
            if transcript.is_empty() { "none" } else { "yes" }
        );
        RecordedUtterance {
            audio,
            mime_type: self.mime_type.clone(),
            transcript: (!transcript.is_empty()).then_some(transcript),
        }
    }
}
