//! PCM16 helpers: byte conversion, duration math, energy, and time-stretch.

/// Encodes samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes little-endian bytes into samples. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Duration of `sample_count` interleaved samples, in milliseconds.
pub fn duration_ms(sample_count: usize, sample_rate: u32, channels: u16) -> u64 {
    if sample_rate == 0 || channels == 0 {
        return 0;
    }
    let frames = sample_count as u64 / channels as u64;
    frames * 1000 / sample_rate as u64
}

/// Number of interleaved samples covering `duration_ms`.
pub fn sample_count(sample_rate: u32, channels: u16, duration_ms: u64) -> usize {
    let frames = sample_rate as u64 * duration_ms / 1000;
    (frames * channels as u64) as usize
}

/// Digital silence.
pub fn silence(sample_rate: u32, channels: u16, duration_ms: u64) -> Vec<i16> {
    vec![0; sample_count(sample_rate, channels, duration_ms)]
}

/// A sine tone at `amplitude` (0.0 to 1.0), identical on every channel.
pub fn tone(
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Vec<i16> {
    let frames = sample_count(sample_rate, 1, duration_ms);
    let peak = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = (peak * (2.0 * std::f32::consts::PI * frequency_hz * t).sin()) as i16;
        for _ in 0..channels {
            samples.push(value);
        }
    }
    samples
}

/// Calculate the RMS (root mean square) energy of audio samples.
///
/// Returns a normalized value from 0.0 (silence) to 1.0 (full scale).
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Stretches interleaved audio to exactly `target_frames` frames using
/// linear interpolation per channel.
///
/// Pitch shifts with the speed change; this is acceptable inside the narrow
/// speed band the duration policy allows.
pub fn stretch(samples: &[i16], channels: u16, target_frames: usize) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    let source_frames = samples.len() / channels;
    if source_frames == 0 || target_frames == 0 {
        return vec![0; target_frames * channels];
    }
    if source_frames == target_frames {
        return samples[..source_frames * channels].to_vec();
    }

    let ratio = if target_frames > 1 {
        (source_frames - 1) as f64 / (target_frames - 1) as f64
    } else {
        0.0
    };

    let mut out = Vec::with_capacity(target_frames * channels);
    for i in 0..target_frames {
        let source_pos = i as f64 * ratio;
        let idx = source_pos.floor() as usize;
        let fraction = source_pos - idx as f64;
        for ch in 0..channels {
            let left = samples[idx * channels + ch] as f64;
            let value = if idx + 1 < source_frames {
                let right = samples[(idx + 1) * channels + ch] as f64;
                left + (right - left) * fraction
            } else {
                left
            };
            out.push(value.round() as i16);
        }
    }
    out
}
