//! Beat-synchronised clip scheduling.
//!
//! The beat grid is cut into slots of `multiplier` beats. Each slot is filled
//! with a random window of a random clip, drawn from a [`SeededSequencer`] in a
//! fixed order (one clip draw, then one offset draw per slot) so that a seed
//! always reproduces the same timeline and longer targets extend shorter ones.

mod recent;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    BeatGrid, ClipId, ClipPool, ClipperError, Result, SeededSequencer, Segment, Timecode,
    Timeline,
};

use recent::RecentClips;

const UNSATISFIABLE_HINT: &str = "lower the multiplier or add longer clips";

/// What to do when a slot is longer than every clip in the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Cut the slot short at its trailing edge to the shortest usable clip.
    /// The remainder up to the beat is scheduled as a slot of its own, so the
    /// grid realigns on the very next beat.
    #[default]
    ShrinkSlot,
    /// Abort with [`ClipperError::UnsatisfiableSchedule`].
    Fail,
}

/// Policy knobs for one scheduling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleParameters {
    /// Beats spanned by each segment.
    pub multiplier: u32,
    /// Output length in seconds.
    pub target_length: f64,
    /// Number of preceding segments whose clips may not be reused. Defaults to
    /// half the pool size.
    #[serde(default)]
    pub min_repeat_gap: Option<usize>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

impl ScheduleParameters {
    pub fn new(multiplier: u32, target_length: f64) -> Self {
        Self {
            multiplier,
            target_length,
            min_repeat_gap: None,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_min_repeat_gap(mut self, gap: usize) -> Self {
        self.min_repeat_gap = Some(gap);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Repeat gap actually applied for `pool`.
    pub fn effective_repeat_gap(&self, pool: &ClipPool) -> usize {
        self.min_repeat_gap.unwrap_or(pool.size() / 2)
    }

    fn validate(&self) -> Result<()> {
        if self.multiplier == 0 {
            return Err(ClipperError::invalid("multiplier must be at least 1"));
        }
        if !self.target_length.is_finite() || self.target_length <= 0.0 {
            return Err(ClipperError::invalid(format!(
                "target length must be positive, got {}",
                self.target_length
            )));
        }
        if Timecode::from_secs_f64(self.target_length).is_zero() {
            return Err(ClipperError::invalid("target length is below one millisecond"));
        }
        Ok(())
    }
}

/// Sequential state machine that turns a beat grid and a clip pool into a
/// [`Timeline`].
#[derive(Debug)]
pub struct ClipScheduler<'a> {
    grid: &'a BeatGrid,
    pool: &'a ClipPool,
    params: &'a ScheduleParameters,
    target: Timecode,
}

impl<'a> ClipScheduler<'a> {
    pub fn new(
        grid: &'a BeatGrid,
        pool: &'a ClipPool,
        params: &'a ScheduleParameters,
    ) -> Result<Self> {
        params.validate()?;
        if grid.total_span() <= 0.0 {
            return Err(ClipperError::invalid("beat grid spans no time"));
        }
        if pool.is_empty() {
            return Err(ClipperError::invalid("clip pool is empty"));
        }

        Ok(Self {
            grid,
            pool,
            params,
            target: Timecode::from_secs_f64(params.target_length),
        })
    }

    /// Output time at which slot `slot` ends when it runs to its beat.
    fn slot_end(&self, slot: usize) -> Timecode {
        let beat = (slot + 1) * self.params.multiplier as usize;
        Timecode::from_secs_f64(self.grid.beat_at_or_extrapolated(beat))
    }

    /// Index and length of the shortest slot that runs all the way to its
    /// beat before the target.
    fn shortest_full_slot(&self) -> Option<(usize, Timecode)> {
        let mut start = Timecode::ZERO;
        let mut shortest: Option<(usize, Timecode)> = None;
        for slot in 0.. {
            let end = self.slot_end(slot);
            if end > self.target {
                break;
            }
            if end > start {
                let length = end - start;
                if shortest.map_or(true, |(_, s)| length < s) {
                    shortest = Some((slot, length));
                }
                start = end;
            }
        }
        shortest
    }

    pub fn schedule(&self, sequencer: &mut SeededSequencer) -> Result<Timeline> {
        let longest = self.pool.longest_usable().unwrap_or(Timecode::ZERO);
        if let Some((slot, required)) = self.shortest_full_slot() {
            if required > longest {
                return Err(ClipperError::UnsatisfiableSchedule {
                    slot,
                    required_ms: required.as_millis(),
                    longest_ms: longest.as_millis(),
                    suggestion: UNSATISFIABLE_HINT,
                });
            }
        }

        let gap = self.params.effective_repeat_gap(self.pool);
        let mut recent = RecentClips::new(gap);
        let mut segments = Vec::new();
        let mut cursor = Timecode::ZERO;
        let mut slot = 0;

        info!(
            multiplier = self.params.multiplier,
            target_ms = self.target.as_millis(),
            clips = self.pool.size(),
            repeat_gap = gap,
            seed = %sequencer.seed(),
            "scheduling timeline"
        );

        while cursor < self.target {
            let end = self.slot_end(slot).min(self.target);
            if end <= cursor {
                // Beats closer than a millisecond quantize to an empty slot.
                slot += 1;
                continue;
            }

            let mut duration = end - cursor;
            let mut choice = self.pick(duration, &recent, sequencer)?;
            if choice.is_none() {
                match self.params.fallback {
                    FallbackPolicy::Fail => {
                        return Err(ClipperError::UnsatisfiableSchedule {
                            slot,
                            required_ms: duration.as_millis(),
                            longest_ms: longest.as_millis(),
                            suggestion: UNSATISFIABLE_HINT,
                        });
                    }
                    FallbackPolicy::ShrinkSlot => {
                        let shrunk = self.pool.shortest_usable().unwrap_or(duration);
                        warn!(
                            slot,
                            segment = segments.len(),
                            from_ms = duration.as_millis(),
                            to_ms = shrunk.as_millis(),
                            "no clip fits slot, shrinking it"
                        );
                        duration = shrunk;
                        choice = self.pick(duration, &recent, sequencer)?;
                    }
                }
            }

            let (clip, in_start) = choice.ok_or(ClipperError::UnsatisfiableSchedule {
                slot,
                required_ms: duration.as_millis(),
                longest_ms: longest.as_millis(),
                suggestion: UNSATISFIABLE_HINT,
            })?;

            let segment = Segment {
                clip,
                source: self.pool.clip_at(clip).path().to_path_buf(),
                in_start,
                in_end: in_start + duration,
                output_start: cursor,
                output_end: cursor + duration,
            };
            debug!(
                index = segments.len(),
                clip = clip.0,
                source = %segment.source.display(),
                in_start = %segment.in_start,
                output_start = %segment.output_start,
                duration_ms = duration.as_millis(),
                "scheduled segment"
            );

            recent.push(clip);
            cursor = segment.output_end;
            segments.push(segment);
            if cursor == end {
                slot += 1;
            }
        }

        info!(segments = segments.len(), "timeline complete");
        Timeline::new(segments, self.pool)
    }

    /// Chooses a clip and an in-point for a slot of `duration`, or `None` when
    /// no clip is long enough.
    fn pick(
        &self,
        duration: Timecode,
        recent: &RecentClips,
        sequencer: &mut SeededSequencer,
    ) -> Result<Option<(ClipId, Timecode)>> {
        let eligible: Vec<ClipId> = self
            .pool
            .iter()
            .filter(|(_, clip)| clip.usable_duration() >= duration)
            .map(|(id, _)| id)
            .collect();
        if eligible.is_empty() {
            return Ok(None);
        }

        let fresh: Vec<ClipId> = eligible
            .iter()
            .copied()
            .filter(|id| !recent.contains(*id))
            .collect();
        let candidates = if !fresh.is_empty() {
            fresh
        } else {
            let not_previous: Vec<ClipId> = eligible
                .iter()
                .copied()
                .filter(|id| Some(*id) != recent.previous())
                .collect();
            if not_previous.is_empty() {
                eligible
            } else {
                not_previous
            }
        };

        let index = sequencer.next_int(0, candidates.len() as u64)? as usize;
        let clip_id = candidates[index];
        let clip = self.pool.clip_at(clip_id);
        let latest = clip.in_end() - duration;
        let offset = sequencer.next_int(clip.in_start().as_millis(), latest.as_millis() + 1)?;

        Ok(Some((clip_id, Timecode::from_millis(offset))))
    }
}

/// Convenience wrapper around [`ClipScheduler`].
pub fn schedule(
    grid: &BeatGrid,
    pool: &ClipPool,
    sequencer: &mut SeededSequencer,
    params: &ScheduleParameters,
) -> Result<Timeline> {
    ClipScheduler::new(grid, pool, params)?.schedule(sequencer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceClip;

    fn steady_grid(beats: usize, interval: f64) -> BeatGrid {
        BeatGrid::new((0..beats).map(|i| i as f64 * interval).collect()).unwrap()
    }

    fn long_pool(clips: usize) -> ClipPool {
        let entries: Vec<(String, f64)> = (0..clips)
            .map(|i| (format!("clip{i}.mp4"), 10.0 + i as f64))
            .collect();
        ClipPool::from_durations(&entries).unwrap()
    }

    fn run(
        grid: &BeatGrid,
        pool: &ClipPool,
        params: &ScheduleParameters,
        seed: &str,
    ) -> Result<Timeline> {
        let mut sequencer = SeededSequencer::new(seed);
        schedule(grid, pool, &mut sequencer, params)
    }

    fn output_bounds(timeline: &Timeline) -> Vec<(u64, u64)> {
        timeline
            .iter()
            .map(|s| (s.output_start.as_millis(), s.output_end.as_millis()))
            .collect()
    }

    fn assert_well_formed(timeline: &Timeline, pool: &ClipPool, target: Timecode) {
        let mut cursor = Timecode::ZERO;
        for segment in timeline {
            assert_eq!(segment.output_start, cursor);
            assert_eq!(
                segment.in_end - segment.in_start,
                segment.output_end - segment.output_start
            );
            let clip = pool.clip_at(segment.clip);
            assert!(segment.in_start >= clip.in_start());
            assert!(segment.in_end <= clip.in_end());
            assert!(segment.in_end <= clip.duration());
            cursor = segment.output_end;
        }
        assert_eq!(timeline.span(), target);
    }

    #[test]
    fn two_beat_slots_over_six_seconds() {
        let grid = BeatGrid::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let pool = long_pool(3);
        let params = ScheduleParameters::new(2, 6.0);

        let timeline = run(&grid, &pool, &params, "amaze me").unwrap();

        assert_eq!(
            output_bounds(&timeline),
            vec![(0, 2_000), (2_000, 4_000), (4_000, 6_000)]
        );
        assert_well_formed(&timeline, &pool, Timecode::from_millis(6_000));
    }

    #[test]
    fn single_clip_is_reused_at_varying_offsets() {
        let grid = steady_grid(8, 1.0);
        let pool = ClipPool::from_durations(&[("only.mp4", 3.0)]).unwrap();
        let params = ScheduleParameters::new(1, 5.0);

        let timeline = run(&grid, &pool, &params, "amaze me").unwrap();

        assert_eq!(timeline.len(), 5);
        assert!(timeline.iter().all(|s| s.clip == ClipId(0)));
        assert!(timeline.iter().all(|s| s.in_end.as_millis() <= 3_000));
        assert_well_formed(&timeline, &pool, Timecode::from_millis(5_000));
    }

    #[test]
    fn same_seed_yields_identical_timelines() {
        let grid = steady_grid(64, 0.48);
        let pool = long_pool(6);
        let params = ScheduleParameters::new(2, 20.0);

        let first = run(&grid, &pool, &params, "reproducible").unwrap();
        let second = run(&grid, &pool, &params, "reproducible").unwrap();
        let other = run(&grid, &pool, &params, "something else").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn longer_target_extends_shorter_run() {
        let grid = steady_grid(32, 1.0);
        let pool = long_pool(4);

        let short = run(&grid, &pool, &ScheduleParameters::new(2, 6.0), "prefix").unwrap();
        let long = run(&grid, &pool, &ScheduleParameters::new(2, 21.0), "prefix").unwrap();
        assert_eq!(short.segments(), &long.segments()[..short.len()]);

        // A truncated final slot keeps its clip draw but may move its offset.
        let clipped = run(&grid, &pool, &ScheduleParameters::new(2, 5.0), "prefix").unwrap();
        let n = clipped.len() - 1;
        assert_eq!(&clipped.segments()[..n], &long.segments()[..n]);
        assert_eq!(clipped.segments()[n].clip, long.segments()[n].clip);
    }

    #[test]
    fn final_slot_is_clamped_to_target() {
        let grid = steady_grid(16, 1.0);
        let pool = long_pool(3);
        let params = ScheduleParameters::new(4, 9.5);

        let timeline = run(&grid, &pool, &params, "clamp").unwrap();

        assert_eq!(
            output_bounds(&timeline),
            vec![(0, 4_000), (4_000, 8_000), (8_000, 9_500)]
        );
    }

    #[test]
    fn covers_target_for_many_seeds() {
        let beats: Vec<f64> = (0..40).map(|i| 0.3 + i as f64 * 0.5 + (i % 3) as f64 * 0.05).collect();
        let grid = BeatGrid::new(beats).unwrap();
        let pool = ClipPool::new(vec![
            SourceClip::new("a.mp4", 4.0).unwrap(),
            SourceClip::new("b.mp4", 9.0)
                .unwrap()
                .with_usable_range(1.0, 8.0)
                .unwrap(),
            SourceClip::new("c.mp4", 2.5).unwrap(),
        ])
        .unwrap();
        let params = ScheduleParameters::new(3, 17.25);

        for seed in 0..25u64 {
            let mut sequencer = SeededSequencer::new(seed);
            let timeline = schedule(&grid, &pool, &mut sequencer, &params).unwrap();
            assert_well_formed(&timeline, &pool, Timecode::from_millis(17_250));
        }
    }

    #[test]
    fn lead_in_is_absorbed_by_first_slot() {
        let grid = BeatGrid::new(vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        let pool = long_pool(2);
        let params = ScheduleParameters::new(1, 3.5);

        let timeline = run(&grid, &pool, &params, "lead").unwrap();

        assert_eq!(
            output_bounds(&timeline),
            vec![(0, 1_500), (1_500, 2_500), (2_500, 3_500)]
        );
    }

    #[test]
    fn beats_are_extrapolated_past_the_grid() {
        let grid = steady_grid(3, 0.5);
        let pool = long_pool(2);
        let params = ScheduleParameters::new(1, 2.0);

        let timeline = run(&grid, &pool, &params, "extrapolate").unwrap();

        assert_eq!(
            output_bounds(&timeline),
            vec![(0, 500), (500, 1_000), (1_000, 1_500), (1_500, 2_000)]
        );
    }

    #[test]
    fn recent_clips_are_not_repeated() {
        let grid = steady_grid(200, 0.5);
        let pool = long_pool(5);
        let params = ScheduleParameters::new(1, 60.0).with_min_repeat_gap(3);

        let timeline = run(&grid, &pool, &params, "variety").unwrap();
        let clips: Vec<ClipId> = timeline.iter().map(|s| s.clip).collect();

        for (index, clip) in clips.iter().enumerate().skip(1) {
            let window = &clips[index.saturating_sub(3)..index];
            assert!(!window.contains(clip), "clip {clip:?} repeated at {index}");
        }
    }

    #[test]
    fn small_pool_only_avoids_the_previous_clip() {
        let grid = steady_grid(64, 1.0);
        let pool = long_pool(2);
        let params = ScheduleParameters::new(1, 30.0).with_min_repeat_gap(5);

        let timeline = run(&grid, &pool, &params, "relaxed").unwrap();

        for pair in timeline.segments().windows(2) {
            assert_ne!(pair[0].clip, pair[1].clip);
        }
    }

    #[test]
    fn default_repeat_gap_is_half_the_pool() {
        let params = ScheduleParameters::new(1, 1.0);
        assert_eq!(params.effective_repeat_gap(&long_pool(1)), 0);
        assert_eq!(params.effective_repeat_gap(&long_pool(7)), 3);
        assert_eq!(params.with_min_repeat_gap(1).effective_repeat_gap(&long_pool(7)), 1);
    }

    #[test]
    fn short_clips_only_fill_short_slots() {
        let grid = steady_grid(32, 1.0);
        let pool = ClipPool::from_durations(&[("short.mp4", 1.2), ("long.mp4", 30.0)]).unwrap();
        let params = ScheduleParameters::new(2, 12.0).with_min_repeat_gap(1);

        let timeline = run(&grid, &pool, &params, "fit").unwrap();

        assert!(timeline.iter().all(|s| s.clip == ClipId(1)));
    }

    #[test]
    fn oversized_slot_is_shrunk_at_its_trailing_edge() {
        let grid = BeatGrid::new(vec![0.0, 1.0, 3.0, 4.0]).unwrap();
        let pool = ClipPool::from_durations(&[("a.mp4", 1.5), ("b.mp4", 1.2)]).unwrap();
        let params = ScheduleParameters::new(1, 4.0);

        let timeline = run(&grid, &pool, &params, "shrink").unwrap();

        assert_eq!(
            output_bounds(&timeline),
            vec![(0, 1_000), (1_000, 2_200), (2_200, 3_000), (3_000, 4_000)]
        );
        assert_well_formed(&timeline, &pool, Timecode::from_millis(4_000));
    }

    #[test]
    fn fail_policy_reports_the_oversized_slot() {
        let grid = BeatGrid::new(vec![0.0, 1.0, 3.0, 4.0]).unwrap();
        let pool = ClipPool::from_durations(&[("a.mp4", 1.5), ("b.mp4", 1.2)]).unwrap();
        let params = ScheduleParameters::new(1, 4.0).with_fallback(FallbackPolicy::Fail);

        match run(&grid, &pool, &params, "shrink") {
            Err(ClipperError::UnsatisfiableSchedule {
                slot, required_ms, ..
            }) => {
                assert_eq!(slot, 1);
                assert_eq!(required_ms, 2_000);
            }
            other => panic!("expected unsatisfiable schedule, got {other:?}"),
        }
    }

    #[test]
    fn failure_names_the_beat_slot_not_the_segment() {
        // The second beat pair quantizes to an empty slot, so slot 2 is the
        // second segment.
        let grid = BeatGrid::new(vec![0.0, 1.0, 1.0004, 3.0, 4.0]).unwrap();
        let pool = ClipPool::from_durations(&[("a.mp4", 1.5), ("b.mp4", 1.2)]).unwrap();
        let params = ScheduleParameters::new(1, 4.0).with_fallback(FallbackPolicy::Fail);

        match run(&grid, &pool, &params, "skip") {
            Err(ClipperError::UnsatisfiableSchedule {
                slot, required_ms, ..
            }) => {
                assert_eq!(slot, 2);
                assert_eq!(required_ms, 2_000);
            }
            other => panic!("expected unsatisfiable schedule, got {other:?}"),
        }
    }

    #[test]
    fn clips_shorter_than_every_slot_are_unsatisfiable() {
        let grid = steady_grid(16, 1.0);
        let pool = ClipPool::from_durations(&[("a.mp4", 2.0), ("b.mp4", 3.0)]).unwrap();
        let params = ScheduleParameters::new(4, 12.0);

        let err = run(&grid, &pool, &params, "short").unwrap_err();
        assert!(matches!(
            err,
            ClipperError::UnsatisfiableSchedule {
                required_ms: 4_000,
                longest_ms: 3_000,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let grid = steady_grid(4, 1.0);
        let pool = long_pool(2);

        assert!(run(&grid, &pool, &ScheduleParameters::new(0, 3.0), "x").is_err());
        assert!(run(&grid, &pool, &ScheduleParameters::new(1, 0.0), "x").is_err());
        assert!(run(&grid, &pool, &ScheduleParameters::new(1, f64::NAN), "x").is_err());
        assert!(run(&grid, &ClipPool::default(), &ScheduleParameters::new(1, 3.0), "x").is_err());
    }
}
