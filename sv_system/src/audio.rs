//! Microphone capture buffer with energy-based endpointing.

use std::io::Cursor;

use tokio::time::Instant;

use crate::config::AudioConfig;

/// Append-only PCM buffer that decides when an utterance has ended.
///
/// A recording stops once `max_duration` is reached, or once the input has
/// been below `energy_threshold` for `silence_threshold` seconds and at
/// least `min_duration` has elapsed overall.
#[derive(Debug)]
pub struct AudioBuffer {
    config: AudioConfig,
    buffer: Vec<u8>,
    is_recording: bool,
    start_time: Instant,
    last_voice_time: Instant,
}

impl AudioBuffer {
    pub fn new(config: AudioConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            buffer: Vec::new(),
            is_recording: false,
            start_time: now,
            last_voice_time: now,
        }
    }

    pub fn start(&mut self) {
        self.buffer.clear();
        self.is_recording = true;
        self.start_time = Instant::now();
        self.last_voice_time = self.start_time;
        tracing::debug!("audio buffer recording started");
    }

    /// Append a PCM chunk. Chunks arriving while not recording are dropped.
    pub fn append(&mut self, data: &[u8]) {
        if !self.is_recording {
            return;
        }
        self.buffer.extend_from_slice(data);

        if rms_energy(data) > self.config.energy_threshold {
            self.last_voice_time = Instant::now();
        }
    }

    /// Pure over the clock and the two timestamps; `true` once the current
    /// recording should be endpointed.
    pub fn should_stop(&self) -> bool {
        if !self.is_recording {
            return true;
        }

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let silence = self.last_voice_time.elapsed().as_secs_f64();

        if elapsed >= self.config.max_duration {
            tracing::debug!(elapsed, "max recording duration reached");
            return true;
        }
        if silence >= self.config.silence_threshold && elapsed >= self.config.min_duration {
            tracing::debug!(silence, "silence endpoint reached");
            return true;
        }

        false
    }

    /// Stop recording and drain the captured PCM.
    pub fn stop(&mut self) -> Vec<u8> {
        self.is_recording = false;
        let audio = std::mem::take(&mut self.buffer);
        let bytes_per_second = self.config.sample_rate as usize
            * self.config.sample_width as usize
            * self.config.channels as usize;
        tracing::info!(
            bytes = audio.len(),
            seconds = audio.len() as f64 / bytes_per_second as f64,
            "recording complete"
        );
        audio
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }
}

/// Root-mean-square energy of a chunk of S16_LE samples.
///
/// A trailing odd byte is ignored; an empty chunk has zero energy.
pub fn rms_energy(data: &[u8]) -> f64 {
    let sample_count = data.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }

    let sum_squares: f64 = data
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64;
            sample * sample
        })
        .sum();

    (sum_squares / sample_count as f64).sqrt()
}

/// Wrap raw PCM in a WAV container, in memory, for the ASR upload.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> eyre::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pcm_chunk(amplitude: i16, samples: usize) -> Vec<u8> {
        amplitude
            .to_le_bytes()
            .iter()
            .copied()
            .cycle()
            .take(samples * 2)
            .collect()
    }

    fn test_config() -> AudioConfig {
        AudioConfig::default()
    }

    #[test]
    fn rms_of_constant_signal_is_its_amplitude() {
        let chunk = pcm_chunk(2000, 160);
        assert!((rms_energy(&chunk) - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn rms_of_empty_and_single_byte_is_zero() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0x7f]), 0.0);
    }

    #[test]
    fn rms_ignores_trailing_odd_byte() {
        let mut chunk = pcm_chunk(100, 4);
        let even = rms_energy(&chunk);
        chunk.push(0xff);
        assert_eq!(rms_energy(&chunk), even);
    }

    #[test]
    fn append_while_not_recording_is_dropped() {
        let mut buffer = AudioBuffer::new(test_config());
        buffer.append(&pcm_chunk(2000, 160));
        assert!(buffer.stop().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_endpoints_after_threshold() {
        let mut buffer = AudioBuffer::new(test_config());
        buffer.start();

        // 200 ms of loud audio keeps the voice timestamp fresh.
        buffer.append(&pcm_chunk(2000, 3200));
        tokio::time::advance(Duration::from_millis(300)).await;
        buffer.append(&pcm_chunk(50, 3200));
        assert!(!buffer.should_stop());

        tokio::time::advance(Duration::from_millis(300)).await;
        buffer.append(&pcm_chunk(50, 3200));
        // 600 ms of silence > 500 ms threshold, total > 300 ms minimum.
        assert!(buffer.should_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_does_not_endpoint_below_min_duration() {
        let mut config = test_config();
        config.min_duration = 1.0;
        let mut buffer = AudioBuffer::new(config);
        buffer.start();

        buffer.append(&pcm_chunk(50, 3200));
        tokio::time::advance(Duration::from_millis(700)).await;
        assert!(!buffer.should_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_endpoints_even_while_loud() {
        let mut buffer = AudioBuffer::new(test_config());
        buffer.start();

        for _ in 0..10 {
            buffer.append(&pcm_chunk(2000, 1600));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(buffer.should_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_and_is_idempotent() {
        let mut buffer = AudioBuffer::new(test_config());
        buffer.start();
        buffer.append(&[1, 2, 3, 4]);

        assert_eq!(buffer.stop(), vec![1, 2, 3, 4]);
        assert!(!buffer.is_recording());
        // Once stopped, should_stop stays true and the buffer stays empty.
        assert!(buffer.should_stop());
        assert!(buffer.stop().is_empty());
    }

    #[test]
    fn wav_wrapper_contains_the_samples() {
        let pcm = pcm_chunk(1000, 64);
        let wav = pcm_to_wav(&pcm, 16000, 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header followed by the payload.
        assert_eq!(wav.len(), 44 + pcm.len());
    }
}
