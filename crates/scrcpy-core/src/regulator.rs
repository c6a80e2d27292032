//! Jitter buffer between the audio decoder (producer) and the audio sink
//! (pull consumer).

use tracing::warn;

use crate::ring_buffer::RingBuffer;

const AVG_ALPHA: f64 = 0.05;
/// Re-check drift compensation every 960 samples per channel (20 ms @ 48 kHz).
const RESYNC_CHECK_INTERVAL_PER_CHANNEL: usize = 960;

pub struct AudioRegulator {
    target_buf: usize,
    max_buf: usize,
    resync_thresh: usize,
    channels: usize,
    ring: RingBuffer<f32>,
    has_played: bool,
    avg_buffering: f64,
    compensation_pending: f64,
    underflow_samples: u64,
    overflow_samples: u64,
    pushed_samples: u64,
    consumed_samples: u64,
    consumed_since_check: usize,
}

impl AudioRegulator {
    /// Defaults: target=50ms, max=200ms, resync=100ms.
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self::with_ms(channels, sample_rate, 50, 200, 100)
    }

    pub fn with_ms(channels: usize, sample_rate: u32, target_ms: u32, max_ms: u32, resync_ms: u32) -> Self {
        let target_buf = ms_to_samples(target_ms, sample_rate, channels);
        let max_buf = ms_to_samples(max_ms, sample_rate, channels);
        let resync_thresh = ms_to_samples(resync_ms, sample_rate, channels);
        Self {
            target_buf,
            max_buf,
            resync_thresh,
            channels: channels.max(1),
            // headroom beyond max_buf so the reserved ring slot never
            // forces us to drop samples we intend to keep.
            ring: RingBuffer::new(max_buf + 1024),
            has_played: false,
            avg_buffering: 0.0,
            compensation_pending: 0.0,
            underflow_samples: 0,
            overflow_samples: 0,
            pushed_samples: 0,
            consumed_samples: 0,
            consumed_since_check: 0,
        }
    }

    /// Appends interleaved samples. If the buffer would exceed `max_buf`,
    /// the oldest samples (first from the existing buffer, then from the
    /// head of `samples` itself if that's not enough) are dropped.
    pub fn push(&mut self, samples: &[f32]) {
        self.pushed_samples += samples.len() as u64;
        let count = self.ring.count();
        let total = count + samples.len();
        let mut incoming_start = 0;
        if total > self.max_buf {
            let overflow = total - self.max_buf;
            let drop_existing = overflow.min(count);
            self.ring.skip(drop_existing);
            self.overflow_samples += drop_existing as u64;
            let remaining = overflow - drop_existing;
            if remaining > 0 {
                incoming_start = remaining.min(samples.len());
                self.overflow_samples += incoming_start as u64;
            }
        }
        let to_write = &samples[incoming_start..];
        let written = self.ring.write_bulk(to_write);
        if written < to_write.len() {
            self.overflow_samples += (to_write.len() - written) as u64;
        }
        self.avg_buffering = AVG_ALPHA * (self.ring.count() as f64) + (1.0 - AVG_ALPHA) * self.avg_buffering;
    }

    /// Pulls `n_samples` frames (`n_samples * channels` interleaved
    /// values). Until the buffer has reached `target_buf` at least once,
    /// returns silence.
    pub fn pull(&mut self, n_samples: usize) -> Vec<f32> {
        let wanted = n_samples * self.channels;
        if !self.has_played {
            if self.ring.count() < self.target_buf {
                return vec![0.0; wanted];
            }
            self.has_played = true;
        }

        let mut out = Vec::with_capacity(wanted);
        while out.len() < wanted {
            match self.ring.read() {
                Some(sample) => out.push(sample),
                None => break,
            }
        }
        self.consumed_samples += out.len() as u64;

        let shortfall = wanted - out.len();
        if shortfall > 0 {
            self.underflow_samples += shortfall as u64;
            out.resize(wanted, 0.0);
        }

        self.consumed_since_check += n_samples;
        if self.consumed_since_check >= RESYNC_CHECK_INTERVAL_PER_CHANNEL {
            self.consumed_since_check = 0;
            self.apply_drift_compensation();
        }

        out
    }

    fn apply_drift_compensation(&mut self) {
        let deviation = self.avg_buffering - self.target_buf as f64;
        self.compensation_pending += deviation;
        if self.compensation_pending.abs() <= self.resync_thresh as f64 {
            return;
        }
        if self.compensation_pending > 0.0 {
            let skip_n = self.resync_thresh / 2;
            let skipped = self.ring.skip(skip_n);
            self.overflow_samples += skipped as u64;
            warn!(skipped, "regulator skipped samples to correct positive drift");
        } else {
            // Too empty: tolerate the silence padding future pulls will
            // already perform; nothing to actively discard.
            warn!("regulator running persistently low, relying on underflow padding");
        }
        self.compensation_pending = 0.0;
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.has_played = false;
        self.avg_buffering = 0.0;
        self.compensation_pending = 0.0;
        self.underflow_samples = 0;
        self.overflow_samples = 0;
        self.pushed_samples = 0;
        self.consumed_samples = 0;
        self.consumed_since_check = 0;
    }

    pub fn buffered_count(&self) -> usize {
        self.ring.count()
    }

    pub fn underflow_samples(&self) -> u64 {
        self.underflow_samples
    }

    pub fn overflow_samples(&self) -> u64 {
        self.overflow_samples
    }

    pub fn pushed_samples(&self) -> u64 {
        self.pushed_samples
    }

    pub fn consumed_samples(&self) -> u64 {
        self.consumed_samples
    }
}

fn ms_to_samples(ms: u32, sample_rate: u32, channels: usize) -> usize {
    (sample_rate as usize * channels * ms as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_silence_until_target_reached() {
        let mut reg = AudioRegulator::with_ms(1, 48_000, 50, 200, 100);
        // target = 2400 samples
        reg.push(&vec![1.0; 1000]);
        let out = reg.pull(100);
        assert!(out.iter().all(|&s| s == 0.0));
        reg.push(&vec![1.0; 2000]);
        let out = reg.pull(100);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn overflow_drops_oldest_and_buffers_the_rest() {
        // max_buf = 200ms @ 48kHz, 1 channel = 9600 samples.
        let mut reg = AudioRegulator::with_ms(1, 48_000, 50, 200, 100);
        reg.push(&vec![1.0; 12_000]);
        assert_eq!(reg.overflow_samples(), 2_400);
        assert_eq!(reg.buffered_count(), 9_600);
    }

    #[test]
    fn mass_balance_holds_without_drift_compensation_kicking_in() {
        let mut reg = AudioRegulator::with_ms(2, 48_000, 50, 200, 100);
        reg.push(&vec![1.0; 4800]); // exactly target (2 channels * 2400)
        let _ = reg.pull(100); // 200 samples consumed, well under resync interval
        let accounted = reg.consumed_samples() + reg.buffered_count() as u64 + reg.overflow_samples();
        assert_eq!(reg.pushed_samples(), accounted);
    }
}
