//! PCM16 helpers and WAV file I/O.

pub mod pcm;
pub mod wav;

pub use wav::WavClip;
