//! Shared audio helpers for TTS adapters — normalizing each vendor's native
//! output to the system standard (16 kHz i16 PCM).

use super::TtsError;

/// Convert f32 PCM samples in [-1.0, 1.0] to i16 PCM, clamping out-of-range
/// values to avoid wraparound artifacts.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16).collect()
}

pub fn duration_ms(num_samples: usize, sample_rate: u32) -> u64 {
    (num_samples as u64 * 1000) / sample_rate.max(1) as u64
}

pub fn pcm_bytes_to_i16(bytes: &[u8]) -> Result<Vec<i16>, TtsError> {
    Ok(bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_to_i16_clamps_out_of_range() {
        let samples = f32_to_i16(&[1.5, -1.5, 0.0]);
        assert_eq!(samples[0], 32767);
        assert_eq!(samples[2], 0);
    }

    #[test]
    fn duration_ms_computes_from_sample_count() {
        assert_eq!(duration_ms(16000, 16000), 1000);
    }

    #[test]
    fn pcm_bytes_round_trip() {
        let bytes = vec![0x00, 0x01, 0xFF, 0x7F];
        let samples = pcm_bytes_to_i16(&bytes).unwrap();
        assert_eq!(samples, vec![256, 32767]);
    }
}
