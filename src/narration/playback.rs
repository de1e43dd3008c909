//! Audio output for narration

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Plays MPEG audio
///
/// Dropping the `play` future must stop the audio.
#[async_trait]
pub trait AudioSink: Send {
    /// Play the clip to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or output fails
    async fn play(&mut self, mp3: &[u8]) -> Result<()>;
}

/// Decode MP3 bytes to mono f32 samples and the stream's sample rate
///
/// # Errors
///
/// Returns error if the stream is corrupt
pub fn decode_mp3(mp3: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Sink that plays nothing and holds each clip for a fixed time
#[derive(Debug, Clone, Copy)]
pub struct SilentSink {
    pace: Duration,
}

impl SilentSink {
    /// Hold each clip for `pace`
    #[must_use]
    pub const fn new(pace: Duration) -> Self {
        Self { pace }
    }
}

#[async_trait]
impl AudioSink for SilentSink {
    async fn play(&mut self, mp3: &[u8]) -> Result<()> {
        tracing::trace!(bytes = mp3.len(), "silent playback");
        tokio::time::sleep(self.pace).await;
        Ok(())
    }
}

#[cfg(feature = "speaker")]
pub use speaker::SpeakerSink;

#[cfg(feature = "speaker")]
mod speaker {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};

    use super::{AudioSink, decode_mp3};
    use crate::{Error, Result};

    /// Plays narration on the default output device
    #[derive(Debug)]
    pub struct SpeakerSink {
        _private: (),
    }

    impl SpeakerSink {
        /// Check that an output device exists
        ///
        /// # Errors
        ///
        /// Returns error if no output device is available
        pub fn new() -> Result<Self> {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

            tracing::debug!(device = %device.name().unwrap_or_default(), "speaker output ready");
            Ok(Self { _private: () })
        }
    }

    #[async_trait]
    impl AudioSink for SpeakerSink {
        async fn play(&mut self, mp3: &[u8]) -> Result<()> {
            let (samples, sample_rate) = decode_mp3(mp3)?;
            if samples.is_empty() || sample_rate == 0 {
                return Ok(());
            }

            let stop = Arc::new(AtomicBool::new(false));
            let _guard = StopOnDrop(Arc::clone(&stop));

            tokio::task::spawn_blocking(move || play_blocking(&samples, sample_rate, &stop))
                .await
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    }

    struct StopOnDrop(Arc<AtomicBool>);

    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Relaxed);
        }
    }

    fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let rate = SampleRate(sample_rate);
        let supports = |channels: u16| {
            device.supported_output_configs().ok().and_then(|mut configs| {
                configs.find(|c| {
                    c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
        };

        let supported = supports(1)
            .or_else(|| supports(2))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        Ok(supported.with_sample_rate(rate).config())
    }

    fn play_blocking(samples: &[f32], sample_rate: u32, stop: &AtomicBool) -> Result<()> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = output_config(&device, sample_rate)?;
        let channels = usize::from(config.channels);

        let clip: Arc<[f32]> = samples.into();
        let position = Arc::new(AtomicUsize::new(0));

        let stream = {
            let clip = Arc::clone(&clip);
            let position = Arc::clone(&position);
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.fetch_add(1, Ordering::Relaxed);
                            frame.fill(clip.get(pos).copied().unwrap_or(0.0));
                        }
                    },
                    |err| tracing::error!(error = %err, "audio playback error"),
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let clip_ms = (clip.len() as u64 * 1000) / u64::from(sample_rate);
        let timeout = Duration::from_millis(clip_ms + 500);
        let started = Instant::now();

        while position.load(Ordering::Relaxed) < clip.len() {
            if stop.load(Ordering::Relaxed) {
                tracing::debug!("playback interrupted");
                return Ok(());
            }
            if started.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device drain its buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = clip.len(), "playback complete");
        Ok(())
    }
}
