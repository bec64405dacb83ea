//! Speech playback on the default output device using cpal
//!
//! `cpal::Stream` is `!Send`, so every playback gets a dedicated thread that
//! owns its stream and takes pause/resume/stop commands over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use cognito_core::audio::{pcm_to_samples, SPEECH_SAMPLE_RATE};
use cognito_core::{AudioBackend, Playback, PlaybackControl};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How often the playback thread checks for completion and stream errors
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Extra time for the device buffer to drain after the last sample is queued
const DRAIN_TAIL: Duration = Duration::from_millis(100);

/// Mono speech samples stepped at the device's sample rate (nearest sample)
struct FrameSource {
    samples: Vec<f32>,
    step: f64,
    position: f64,
}

impl FrameSource {
    fn new(samples: Vec<f32>, source_rate: u32, device_rate: u32) -> Self {
        Self {
            samples,
            step: source_rate as f64 / device_rate.max(1) as f64,
            position: 0.0,
        }
    }

    fn next_frame(&mut self) -> Option<f32> {
        let sample = *self.samples.get(self.position as usize)?;
        self.position += self.step;
        Some(sample)
    }
}

enum Command {
    Pause,
    Resume,
    Stop,
}

struct StreamControl {
    commands: Sender<Command>,
}

impl StreamControl {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Playback has already ended"))
    }
}

impl PlaybackControl for StreamControl {
    fn pause(&mut self) -> Result<()> {
        self.send(Command::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.send(Command::Resume)
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut source: FrameSource,
    drained: Arc<AtomicBool>,
    errors: Sender<String>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in output.chunks_mut(channels) {
                let value = match source.next_frame() {
                    Some(value) => value,
                    None => {
                        drained.store(true, Ordering::SeqCst);
                        0.0
                    }
                };
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(value);
                }
            }
        },
        move |err| {
            let _ = errors.send(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}

fn open_stream(
    samples: Vec<f32>,
    drained: Arc<AtomicBool>,
    errors: Sender<String>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported = device.default_output_config()?;
    let config = supported.config();
    let source = FrameSource::new(samples, SPEECH_SAMPLE_RATE, config.sample_rate.0);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, source, drained, errors)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, source, drained, errors)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, source, drained, errors)?,
        other => bail!("Unsupported output sample format: {}", other),
    };
    stream.play()?;
    debug!(
        channels = config.channels,
        sample_rate = config.sample_rate.0,
        "Output stream started"
    );
    Ok(stream)
}

/// Body of the playback thread. `finished` gets `Ok` on natural completion,
/// `Err` on a stream failure, and is dropped unsent on stop.
fn run_playback(
    samples: Vec<f32>,
    commands: Receiver<Command>,
    ready: oneshot::Sender<Result<()>>,
    finished: oneshot::Sender<Result<()>>,
) {
    let drained = Arc::new(AtomicBool::new(false));
    let (error_tx, error_rx) = mpsc::channel();

    let stream = match open_stream(samples, drained.clone(), error_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let outcome: Option<Result<()>> = loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(Command::Pause) => {
                if let Err(e) = stream.pause() {
                    break Some(Err(e.into()));
                }
            }
            Ok(Command::Resume) => {
                if let Err(e) = stream.play() {
                    break Some(Err(e.into()));
                }
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Ok(message) = error_rx.try_recv() {
            break Some(Err(anyhow!("Output stream error: {}", message)));
        }
        if drained.load(Ordering::SeqCst) {
            std::thread::sleep(DRAIN_TAIL);
            break Some(Ok(()));
        }
    };

    drop(stream);
    if let Some(outcome) = outcome {
        let _ = finished.send(outcome);
    }
}

pub struct CpalAudio;

impl CpalAudio {
    pub fn new() -> Self {
        let host = cpal::default_host();
        match host.default_output_device() {
            Some(device) => info!(
                device = %device.name().unwrap_or_default(),
                "Using audio output device"
            ),
            None => warn!("No audio output device; speech playback will fail"),
        }
        Self
    }
}

impl Default for CpalAudio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioBackend for CpalAudio {
    async fn play(&self, pcm: Vec<u8>) -> Result<Playback> {
        let samples = pcm_to_samples(&pcm);
        if samples.is_empty() {
            bail!("No audio to play");
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("cognito-playback".into())
            .spawn(move || run_playback(samples, command_rx, ready_tx, done_tx))?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Playback thread exited before starting"))??;

        Ok(Playback {
            control: Box::new(StreamControl { commands: command_tx }),
            finished: done_rx,
        })
    }
}
