use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use common::{GameState, MS_PER_FRAME};

use super::{ReplayEntry, ReplayError, ReplayView, nearest_index};

/// A point of the recording that was (or would be) shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayFrame {
    /// Index of the nearest entry.
    pub index: usize,
    /// The playback cursor.
    pub time: DateTime<Utc>,
    pub progress: f64,
}

/// The local playback state machine. It keeps no clock of its own; whoever
/// owns it calls [`ReplayPlayer::tick`] once per period.
#[derive(Debug, Clone)]
pub struct ReplayPlayer {
    entries: Vec<ReplayEntry>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    position: DateTime<Utc>,
    period: TimeDelta,
    speed: f64,
    frame_time: TimeDelta,
    running: bool,
    paused: bool,
}

impl ReplayPlayer {
    /// Start playing `entries` from the beginning at normal speed.
    ///
    /// Entries must be sorted by time, as [`super::parse_replay`] returns them.
    pub fn new(entries: Vec<ReplayEntry>) -> Result<Self, ReplayError> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Err(ReplayError::Empty);
        };
        let (start, end) = (first.time, last.time);
        let period = TimeDelta::milliseconds(MS_PER_FRAME);
        let mut player = Self {
            entries,
            start,
            end,
            position: start,
            period,
            speed: 1.0,
            frame_time: period,
            running: true,
            paused: false,
        };
        player.set_speed(1.0);
        Ok(player)
    }

    /// Use a different tick period. The current speed is kept.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = TimeDelta::from_std(period).unwrap_or(TimeDelta::milliseconds(MS_PER_FRAME));
        self.set_speed(self.speed);
        self
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn position(&self) -> DateTime<Utc> {
        self.position
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// How far the cursor moves per tick.
    pub fn frame_time(&self) -> TimeDelta {
        self.frame_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.end
    }

    pub fn progress(&self) -> f64 {
        let duration = self.duration().num_milliseconds();
        if duration <= 0 {
            return 1.0;
        }
        let elapsed = (self.position - self.start).num_milliseconds();
        (elapsed as f64 / duration as f64).clamp(0.0, 1.0)
    }

    /// The frame at the cursor.
    pub fn current(&self) -> ReplayFrame {
        ReplayFrame {
            index: nearest_index(&self.entries, self.position).unwrap_or(0),
            time: self.position,
            progress: self.progress(),
        }
    }

    pub fn state(&self, frame: &ReplayFrame) -> &GameState {
        &self.entries[frame.index.min(self.entries.len() - 1)].state
    }

    pub fn current_state(&self) -> &GameState {
        self.state(&self.current())
    }

    /// Advance one period. Returns the frame to show, or `None` while paused or stopped.
    ///
    /// Reaching the end clamps the cursor, returns the last frame and pauses.
    pub fn tick(&mut self) -> Option<ReplayFrame> {
        if !self.running || self.paused {
            return None;
        }
        self.position += self.frame_time;
        if self.position >= self.end {
            self.position = self.end;
            self.paused = true;
        }
        Some(self.current())
    }

    /// Jump to `progress` (clamped to `[0, 1]`) and return the frame there, paused or not.
    pub fn seek(&mut self, progress: f64) -> ReplayFrame {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        let offset = (self.duration().num_milliseconds() as f64 * progress) as i64;
        self.position = self.start + TimeDelta::milliseconds(offset);
        self.current()
    }

    /// Scale future ticks. The cursor does not move.
    pub fn set_speed(&mut self, speed: f64) {
        let speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        let duration = self.duration().num_milliseconds() as f64;
        let frame_ms = (self.period.num_milliseconds() as f64 * speed).clamp(0.0, duration.max(0.0));
        self.speed = speed;
        self.frame_time = TimeDelta::milliseconds(frame_ms as i64);
    }

    /// Returns whether the player is paused afterwards.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = true;
    }

    pub fn view(&self) -> ReplayView {
        let frame = self.current();
        ReplayView {
            running: self.running,
            paused: self.paused,
            progress: frame.progress,
            time: Some(format_time(frame.time)),
            speed: self.speed,
            game_state: Some(self.state(&frame).clone()),
        }
    }
}

/// How replay cursors are displayed and recorded.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
