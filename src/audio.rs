//! Streaming playback of model speech.
//!
//! Fragments arrive as base64 PCM at arbitrary, often bursty intervals. Each
//! one is scheduled at `max(now, cursor)` and the cursor advances by the
//! fragment's duration right away, so playback stays gapless and in arrival
//! order no matter how quickly fragments land.
//!
//! ```text
//!   fragment ──▶ decode ──▶ AudioBuffer ──▶ AudioOutput::schedule(start)
//!                                               │
//!   poll() ◀── drain_finished() ◀───────────────┘   (queue empties → not speaking)
//! ```

use crate::wav::WavAccumulator;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

/// Output rate of the hosted model's speech. Any other rate plays pitch-shifted.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Mono buffer from 16-bit little-endian PCM. A trailing odd byte is dropped.
    pub fn from_pcm16(pcm: &[u8], sample_rate: u32) -> Self {
        let samples = pcm
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
            .collect();
        Self {
            samples,
            sample_rate,
        }
    }

    /// Seconds of playback.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Inverse of [`AudioBuffer::from_pcm16`]; samples outside [-1, 1) saturate.
    pub fn to_pcm16(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| {
                let v = (s * 32768.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX));
                (v as i16).to_le_bytes()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Output seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

/// A playback device with its own monotonic clock, in seconds.
pub trait AudioOutput {
    fn current_time(&self) -> f64;
    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> PlaybackId;
    fn stop(&mut self, id: PlaybackId);
    /// Handles whose playback completed since the last call.
    fn drain_finished(&mut self) -> Vec<PlaybackId>;
}

pub trait Clock {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: f64) {
        self.0.set(t);
    }

    pub fn advance(&self, dt: f64) {
        self.0.set(self.0.get() + dt);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy)]
struct Playing {
    id: PlaybackId,
    end: f64,
}

/// Output that "plays" against a clock without a sound device. Optionally
/// captures everything scheduled into a shared WAV accumulator.
#[derive(Debug)]
pub struct ClockedOutput<C: Clock> {
    clock: C,
    next_id: u64,
    playing: Vec<Playing>,
    capture: Option<Rc<RefCell<WavAccumulator>>>,
}

impl<C: Clock> ClockedOutput<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            next_id: 0,
            playing: Vec::new(),
            capture: None,
        }
    }

    pub fn with_capture(mut self, capture: Rc<RefCell<WavAccumulator>>) -> Self {
        self.capture = Some(capture);
        self
    }
}

impl<C: Clock> AudioOutput for ClockedOutput<C> {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> PlaybackId {
        let id = PlaybackId(self.next_id);
        self.next_id += 1;
        if let Some(capture) = &self.capture {
            capture.borrow_mut().push(&buffer.to_pcm16());
        }
        self.playing.push(Playing {
            id,
            end: start_at + buffer.duration(),
        });
        id
    }

    fn stop(&mut self, id: PlaybackId) {
        self.playing.retain(|p| p.id != id);
    }

    fn drain_finished(&mut self) -> Vec<PlaybackId> {
        let now = self.clock.now();
        let (done, playing): (Vec<_>, Vec<_>) = std::mem::take(&mut self.playing)
            .into_iter()
            .partition(|p| p.end <= now);
        self.playing = playing;
        done.into_iter().map(|p| p.id).collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFragment {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

pub struct AudioScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    next_start: f64,
    queue: Vec<PlaybackId>,
}

impl std::fmt::Debug for AudioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioScheduler")
            .field("sample_rate", &self.sample_rate)
            .field("next_start", &self.next_start)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl AudioScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            sample_rate: OUTPUT_SAMPLE_RATE,
            next_start: 0.0,
            queue: Vec::new(),
        }
    }

    /// Scheduler over a silent clocked output driven by wall time.
    pub fn silent() -> Self {
        Self::new(Box::new(ClockedOutput::new(SystemClock::default())))
    }

    /// Decode one base64 PCM fragment and queue it behind everything already
    /// scheduled. Undecodable input is logged and dropped.
    pub fn play_fragment(&mut self, base64_pcm: &str) -> Option<ScheduledFragment> {
        let pcm = match STANDARD.decode(base64_pcm.trim()) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Dropping undecodable audio fragment: {}", e);
                return None;
            }
        };
        let buffer = AudioBuffer::from_pcm16(&pcm, self.sample_rate);
        if buffer.samples.is_empty() {
            return None;
        }

        let duration = buffer.duration();
        let start = self.output.current_time().max(self.next_start);
        self.next_start = start + duration;
        let id = self.output.schedule(buffer, start);
        self.queue.push(id);
        debug!(
            "Scheduled fragment {:?} at {:.3}s for {:.3}s ({} queued)",
            id,
            start,
            duration,
            self.queue.len()
        );
        Some(ScheduledFragment {
            id,
            start,
            duration,
        })
    }

    /// Retire completed fragments. Returns whether speech is still playing.
    pub fn poll(&mut self) -> bool {
        for id in self.output.drain_finished() {
            self.queue.retain(|q| *q != id);
        }
        self.is_speaking()
    }

    /// True while any scheduled fragment has not completed.
    pub fn is_speaking(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start
    }

    /// Halt everything outstanding and reset the cursor.
    pub fn stop(&mut self) {
        for id in self.queue.drain(..) {
            self.output.stop(id);
        }
        self.next_start = 0.0;
    }
}
