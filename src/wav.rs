//! RIFF/WAVE framing for 16-bit PCM speech.
//!
//! Used by the accumulate-then-play fallback and by the speech dump in the
//! terminal front end.

pub const HEADER_LEN: usize = 44;
pub const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

/// 44-byte canonical header for `data_len` bytes of 16-bit PCM.
pub fn create_wav_header(data_len: u32, sample_rate: u32, channels: u16) -> [u8; HEADER_LEN] {
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    h[22..24].copy_from_slice(&channels.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

/// Read back the fields of a header produced by [`create_wav_header`].
pub fn parse_wav_header(bytes: &[u8]) -> Option<WavInfo> {
    if bytes.len() < HEADER_LEN
        || &bytes[0..4] != b"RIFF"
        || &bytes[8..12] != b"WAVE"
        || &bytes[36..40] != b"data"
    {
        return None;
    }
    let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    Some(WavInfo {
        channels: u16_at(22),
        sample_rate: u32_at(24),
        bits_per_sample: u16_at(34),
        data_len: u32_at(40),
    })
}

/// Concatenates PCM fragments of one turn into a single WAV file.
#[derive(Debug, Clone)]
pub struct WavAccumulator {
    sample_rate: u32,
    pcm: Vec<u8>,
    fragments: usize,
}

impl WavAccumulator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            pcm: Vec::new(),
            fragments: 0,
        }
    }

    pub fn push(&mut self, pcm: &[u8]) {
        self.pcm.extend_from_slice(pcm);
        self.fragments += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn data_len(&self) -> usize {
        self.pcm.len()
    }

    /// Seconds of mono audio accumulated so far.
    pub fn duration(&self) -> f64 {
        (self.pcm.len() / 2) as f64 / f64::from(self.sample_rate)
    }

    /// Header plus data. The accumulator keeps its contents.
    pub fn to_wav(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.pcm.len());
        out.extend_from_slice(&create_wav_header(self.pcm.len() as u32, self.sample_rate, 1));
        out.extend_from_slice(&self.pcm);
        out
    }

    /// Header plus data, leaving the accumulator empty for the next turn.
    pub fn take_wav(&mut self) -> Vec<u8> {
        let wav = self.to_wav();
        self.clear();
        wav
    }

    pub fn clear(&mut self) {
        self.pcm.clear();
        self.fragments = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reports_total_length_and_rate() {
        let mut acc = WavAccumulator::new(24_000);
        acc.push(&[0u8; 480]);
        acc.push(&[1u8; 962]);
        acc.push(&[2u8; 2]);

        let wav = acc.to_wav();
        assert_eq!(wav.len(), HEADER_LEN + 1444);
        let info = parse_wav_header(&wav).unwrap();
        assert_eq!(info.data_len, 1444);
        assert_eq!(info.sample_rate, 24_000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(&wav[4..8], &(36u32 + 1444).to_le_bytes());
    }

    #[test]
    fn take_resets_for_next_turn() {
        let mut acc = WavAccumulator::new(24_000);
        acc.push(&[0u8; 48_000]);
        assert!((acc.duration() - 1.0).abs() < 1e-9);
        let _ = acc.take_wav();
        assert!(acc.is_empty());
        assert_eq!(acc.fragments(), 0);
    }

    #[test]
    fn rejects_foreign_header() {
        assert!(parse_wav_header(b"OggS").is_none());
        assert!(parse_wav_header(&[0u8; 44]).is_none());
    }
}
