//! WAV file input and output for the streaming client.

use crate::error::{DubError, Result};
use crate::pipeline::types::{AudioPayload, Fragment};
use std::io::{Read, Seek, Write};
use std::path::Path;

/// Decoded 16-bit PCM audio from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    /// Interleaved samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavClip {
    /// Open a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader)?;
        let spec = wav_reader.spec();

        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(DubError::AudioFormat {
                message: format!(
                    "expected 16-bit integer PCM, got {}-bit {:?}",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let samples = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    pub fn duration_ms(&self) -> u64 {
        crate::audio::pcm::duration_ms(self.samples.len(), self.sample_rate, self.channels)
    }

    /// Converts to `target_rate`, keeping the channel layout.
    pub fn resampled(self, target_rate: u32) -> Self {
        if target_rate == self.sample_rate || self.channels == 0 {
            return self;
        }
        let channels = self.channels as usize;
        let frames = self.samples.len() / channels;
        let target_frames =
            ((frames as u64 * target_rate as u64) / self.sample_rate.max(1) as u64) as usize;
        Self {
            samples: crate::audio::pcm::stretch(&self.samples, self.channels, target_frames),
            sample_rate: target_rate,
            channels: self.channels,
        }
    }

    /// Slices the clip into consecutive fragments of `fragment_ms`.
    ///
    /// The last fragment may be shorter. Sequence numbers start at zero and
    /// fragment ids are `<stream_id>-<sequence>`.
    pub fn fragments(&self, stream_id: &str, fragment_ms: u64) -> Vec<Fragment> {
        let chunk_len =
            crate::audio::pcm::sample_count(self.sample_rate, self.channels, fragment_ms).max(
                self.channels.max(1) as usize,
            );

        self.samples
            .chunks(chunk_len)
            .enumerate()
            .map(|(seq, chunk)| {
                Fragment::new(
                    format!("{stream_id}-{seq}"),
                    stream_id,
                    seq as u64,
                    AudioPayload::from_samples(chunk, self.sample_rate, self.channels),
                )
            })
            .collect()
    }
}

/// Writes interleaved 16-bit samples as a WAV file.
pub fn write_wav<W: Write + Seek>(
    writer: W,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut wav_writer = hound::WavWriter::new(writer, spec)?;
    for &sample in samples {
        wav_writer.write_sample(sample)?;
    }
    wav_writer.finalize()?;
    Ok(())
}

/// Writes a WAV file to disk.
pub fn write_wav_file(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_wav(std::io::BufWriter::new(file), sample_rate, channels, samples)
}
