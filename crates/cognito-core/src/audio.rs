//! Audio playback contract
//!
//! Synthesized speech arrives as raw 16-bit little-endian mono PCM. The
//! controller hands those bytes to an [`AudioBackend`] and keeps the returned
//! [`PlaybackControl`] for pause/resume/stop.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Sample rate of the PCM produced by speech synthesis
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Controls for one running playback
pub trait PlaybackControl: Send {
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    /// Stop for good; must be safe to call after natural completion
    fn stop(&mut self);
}

/// A started playback.
///
/// `finished` resolves to `Ok(())` when the audio plays out and to an error
/// when playback breaks down part way. After an explicit `stop` the sender is
/// dropped without a value.
pub struct Playback {
    pub control: Box<dyn PlaybackControl>,
    pub finished: oneshot::Receiver<Result<()>>,
}

#[async_trait]
pub trait AudioBackend: Send + Sync + 'static {
    async fn play(&self, pcm: Vec<u8>) -> Result<Playback>;
}

/// Decode 16-bit little-endian PCM into `[-1.0, 1.0]` samples. A trailing odd
/// byte is ignored.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
