//! Observational audio/video clock tracker. Does not own playback; it
//! only tells callers how far audio has drifted from the wall clock and
//! how video should react.

use std::collections::VecDeque;
use std::time::Instant;

const DRIFT_EMA_ALPHA: f64 = 0.1;
const DRIFT_HISTORY_CAP: usize = 50;
const DRIFT_ABS_LIMIT_MS: f64 = 200.0;
const RATE_ADJUST_THRESHOLD_MS: f64 = 30.0;
const RATE_STEP: f64 = 0.02;
const RATE_MIN: f64 = 0.95;
const RATE_MAX: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDecision {
    pub should_play: bool,
    pub is_discontinuity: bool,
    pub current_delay_ms: f64,
    pub drift_ms: f64,
    pub suggested_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoSyncInfo {
    pub offset_ms: f64,
    pub should_skip_video: bool,
    pub should_wait_for_audio: bool,
}

pub struct AudioSynchronizer {
    first_audio_pts: Option<u64>,
    first_audio_wall: Option<Instant>,
    last_pts: u64,
    est_delay_ms: f64,
    drift_ms: f64,
    drift_history: VecDeque<f64>,
    suggested_rate: f64,
    discontinuity_count: u64,
}

impl AudioSynchronizer {
    pub fn new() -> Self {
        Self {
            first_audio_pts: None,
            first_audio_wall: None,
            last_pts: 0,
            est_delay_ms: 0.0,
            drift_ms: 0.0,
            drift_history: VecDeque::with_capacity(DRIFT_HISTORY_CAP),
            suggested_rate: 1.0,
            discontinuity_count: 0,
        }
    }

    pub fn discontinuity_count(&self) -> u64 {
        self.discontinuity_count
    }

    pub fn process_audio_pts(&mut self, pts_us: u64, sample_count: u32, sample_rate: u32, now: Instant) -> SyncDecision {
        let (first_pts, first_wall) = match (self.first_audio_pts, self.first_audio_wall) {
            (Some(p), Some(w)) => (p, w),
            _ => {
                self.seed_baseline(pts_us, now);
                return SyncDecision {
                    should_play: true,
                    is_discontinuity: false,
                    current_delay_ms: 0.0,
                    drift_ms: 0.0,
                    suggested_rate: 1.0,
                };
            }
        };

        let expected_delta_us = (sample_count as f64 / sample_rate as f64) * 1_000_000.0;
        let actual_delta_us = pts_us as i64 - self.last_pts as i64;
        let tolerance_us = (0.1 * expected_delta_us).max(100_000.0);

        if pts_us < self.last_pts || (actual_delta_us as f64 - expected_delta_us).abs() > tolerance_us {
            self.seed_baseline(pts_us, now);
            self.discontinuity_count += 1;
            self.drift_ms = 0.0;
            self.drift_history.clear();
            return SyncDecision {
                should_play: true,
                is_discontinuity: true,
                current_delay_ms: 0.0,
                drift_ms: 0.0,
                suggested_rate: self.suggested_rate,
            };
        }

        let expected_arrival_us = (pts_us - first_pts) as i64;
        let expected_arrival = first_wall + std::time::Duration::from_micros(expected_arrival_us.max(0) as u64);
        let delay_ms = now
            .checked_duration_since(expected_arrival)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or_else(|| -(expected_arrival.duration_since(now).as_secs_f64() * 1000.0));

        self.est_delay_ms = DRIFT_EMA_ALPHA * delay_ms + (1.0 - DRIFT_EMA_ALPHA) * self.est_delay_ms;
        self.drift_ms = DRIFT_EMA_ALPHA * delay_ms + (1.0 - DRIFT_EMA_ALPHA) * self.drift_ms;

        if self.drift_history.len() >= DRIFT_HISTORY_CAP {
            self.drift_history.pop_front();
        }
        self.drift_history.push_back(self.drift_ms);

        let should_play = !(self.drift_ms.abs() > DRIFT_ABS_LIMIT_MS && self.drift_ms > 0.0);

        self.suggested_rate = if self.drift_ms > RATE_ADJUST_THRESHOLD_MS {
            1.0 + RATE_STEP
        } else if self.drift_ms < -RATE_ADJUST_THRESHOLD_MS {
            1.0 - RATE_STEP
        } else {
            1.0
        }
        .clamp(RATE_MIN, RATE_MAX);

        self.last_pts = pts_us;

        SyncDecision {
            should_play,
            is_discontinuity: false,
            current_delay_ms: delay_ms,
            drift_ms: self.drift_ms,
            suggested_rate: self.suggested_rate,
        }
    }

    pub fn get_video_sync_info(&self, video_pts_us: u64) -> VideoSyncInfo {
        let offset_ms = (self.last_pts as i64 - video_pts_us as i64) as f64 / 1000.0;
        VideoSyncInfo {
            offset_ms,
            should_skip_video: offset_ms < -200.0,
            should_wait_for_audio: offset_ms > 200.0,
        }
    }

    fn seed_baseline(&mut self, pts_us: u64, now: Instant) {
        self.first_audio_pts = Some(pts_us);
        self.first_audio_wall = Some(now);
        self.last_pts = pts_us;
    }
}

impl Default for AudioSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_matching_deltas_flag_no_discontinuity() {
        let mut sync = AudioSynchronizer::new();
        let start = Instant::now();
        let step = std::time::Duration::from_micros(20_000);
        let mut pts = 0u64;
        for i in 0..5 {
            let decision = sync.process_audio_pts(pts, 960, 48_000, start + step * i as u32);
            assert!(!decision.is_discontinuity);
            pts += 20_000;
        }
        assert_eq!(sync.discontinuity_count(), 0);
    }

    #[test]
    fn large_pts_jump_is_flagged_and_resets() {
        let mut sync = AudioSynchronizer::new();
        let start = Instant::now();
        let pts_sequence = [0u64, 20_000, 40_000, 1_000_000, 1_020_000];
        let mut discontinuities = 0;
        for (i, &pts) in pts_sequence.iter().enumerate() {
            let decision = sync.process_audio_pts(pts, 960, 48_000, start + std::time::Duration::from_micros(20_000 * i as u64));
            if decision.is_discontinuity {
                discontinuities += 1;
            }
        }
        assert_eq!(discontinuities, 1);
        assert_eq!(sync.discontinuity_count(), 1);
    }

    #[test]
    fn suggested_rate_always_in_bounds() {
        let mut sync = AudioSynchronizer::new();
        let start = Instant::now();
        let mut pts = 0u64;
        for i in 0..20 {
            // deliberately drift the wall clock ahead of pts to push rate up.
            let wall = start + std::time::Duration::from_micros(20_000 * i as u64) + std::time::Duration::from_millis(5 * i as u64);
            let decision = sync.process_audio_pts(pts, 960, 48_000, wall);
            assert!(decision.suggested_rate >= 0.95 && decision.suggested_rate <= 1.05);
            pts += 20_000;
        }
    }
}
