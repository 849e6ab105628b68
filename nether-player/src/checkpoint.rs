//! Song length and seeking
//!
//! A [`CheckpointList`] plays the song once, silently, with callbacks that
//! stop at the first loop, speed-zero or silence event. Every
//! [`CHECKPOINT_INTERVAL`] it keeps a clone of the renderer, so a seek only
//! has to replay the stretch after the nearest earlier checkpoint.

use std::sync::Arc;

use nether_tracker::TrackerModule;
use tracing::{debug, warn};

use crate::callbacks::Callbacks;
use crate::config::PlayerConfig;
use crate::engine::Sigrenderer;
use crate::error::PlayerError;
use crate::TIME_UNIT;

/// Time between stored snapshots (30 seconds)
pub const CHECKPOINT_INTERVAL: i64 = 30 * TIME_UNIT;

/// Songs are not scanned past two hours
pub const LENGTH_LIMIT: i64 = 120 * 60 * TIME_UNIT;

/// Skips use one frame per time unit
const SCAN_DELTA: f64 = 1.0;

#[derive(Debug, Clone)]
struct Checkpoint {
    time: i64,
    renderer: Sigrenderer,
}

/// Renderer snapshots taken at regular intervals of one playthrough
#[derive(Debug, Clone)]
pub struct CheckpointList {
    checkpoints: Vec<Checkpoint>,
    length: i64,
}

impl CheckpointList {
    /// Scan `module` from its first order
    pub fn build(module: Arc<TrackerModule>, config: &PlayerConfig) -> Result<Self, PlayerError> {
        let first = Sigrenderer::new(module, config, 0)?;
        let mut checkpoints = vec![Checkpoint {
            time: 0,
            renderer: first,
        }];

        let length = loop {
            let Some(last) = checkpoints.last() else {
                break 0;
            };
            let time = last.time;

            let mut renderer = last.renderer.clone();
            renderer.callbacks = Callbacks::terminating();
            let played = renderer.skip(CHECKPOINT_INTERVAL as usize, SCAN_DELTA) as i64;
            if played < CHECKPOINT_INTERVAL {
                break time + played;
            }

            let time = time + CHECKPOINT_INTERVAL;
            renderer.callbacks = Callbacks::default();
            checkpoints.push(Checkpoint { time, renderer });
            if time >= LENGTH_LIMIT {
                warn!(limit = LENGTH_LIMIT, "song length scan hit the limit");
                break time;
            }
        };

        debug!(length, checkpoints = checkpoints.len(), "song length computed");
        Ok(Self { checkpoints, length })
    }

    /// Time in 1/65536 seconds until the song first loops or stops
    pub fn length(&self) -> i64 {
        self.length
    }

    /// Number of stored snapshots, the start of the song included
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// A fresh renderer positioned `pos` time units into the song
    ///
    /// Negative positions start from the beginning. The returned renderer
    /// carries no callbacks.
    pub fn seek(&self, pos: i64) -> Result<Sigrenderer, PlayerError> {
        let pos = pos.max(0);
        if pos > self.length {
            return Err(PlayerError::SeekPastEnd(pos));
        }

        let checkpoint = self
            .checkpoints
            .iter()
            .rev()
            .find(|c| c.time <= pos)
            .ok_or(PlayerError::SeekPastEnd(pos))?;

        let mut renderer = checkpoint.renderer.clone();
        let remaining = (pos - checkpoint.time) as usize;
        if renderer.skip(remaining, SCAN_DELTA) < remaining {
            return Err(PlayerError::SeekPastEnd(pos));
        }
        Ok(renderer)
    }
}

#[cfg(test)]
mod tests {
    use nether_tracker::{TrackerPattern, TrackerSample};

    use super::*;

    /// Ticks at tempo 125 last 1310 whole time units
    const TICK: i64 = 1310;
    /// Speed 6
    const ROW: i64 = 6 * TICK;

    fn module(orders: usize) -> Arc<TrackerModule> {
        let mut module = TrackerModule::default();
        module.samples.push(TrackerSample::from_pcm16(vec![0; 64]));
        module.patterns.push(TrackerPattern::empty(64));
        module.order_table = vec![0; orders];
        Arc::new(module)
    }

    #[test]
    fn test_length_of_single_pattern() {
        let list = CheckpointList::build(module(1), &PlayerConfig::default()).expect("valid module");
        assert_eq!(list.length(), 64 * ROW, "one pass through 64 rows");
        assert_eq!(list.len(), 1, "shorter than one interval needs only the start");
    }

    #[test]
    fn test_long_song_stores_checkpoints() {
        let list = CheckpointList::build(module(5), &PlayerConfig::default()).expect("valid module");
        assert_eq!(list.length(), 5 * 64 * ROW);
        assert!(list.length() > CHECKPOINT_INTERVAL);
        assert_eq!(list.len(), 2, "start plus one snapshot at 30 seconds");
    }

    #[test]
    fn test_seek_lands_on_row() {
        let list = CheckpointList::build(module(5), &PlayerConfig::default()).expect("valid module");

        let renderer = list.seek(10 * ROW + 1).expect("inside the song");
        assert_eq!(renderer.order(), Some(0));
        assert_eq!(renderer.row(), Some(10));

        // Replays from the snapshot at 30 seconds
        let pos = 4 * 64 * ROW + 5 * ROW + 1;
        assert!(pos > CHECKPOINT_INTERVAL);
        let renderer = list.seek(pos).expect("inside the song");
        assert_eq!(renderer.order(), Some(4));
        assert_eq!(renderer.row(), Some(5));
    }

    #[test]
    fn test_seek_bounds() {
        let list = CheckpointList::build(module(1), &PlayerConfig::default()).expect("valid module");
        let start = list.seek(-100).expect("negative positions clamp to the start");
        assert_eq!(start.order(), Some(0));

        let err = list.seek(list.length() + 1).expect_err("beyond the end");
        assert_eq!(err, PlayerError::SeekPastEnd(64 * ROW + 1));
    }

    #[test]
    fn test_seek_result_is_independent() {
        let list = CheckpointList::build(module(1), &PlayerConfig::default()).expect("valid module");
        let mut a = list.seek(ROW + 1).expect("inside the song");
        let b = list.seek(ROW + 1).expect("inside the song");
        a.skip((10 * ROW) as usize, 1.0);
        assert_eq!(a.row(), Some(11));
        assert_eq!(b.row(), Some(1), "advancing one seek result leaves others alone");
    }
}
