use tracing::warn;

/// Count of fixed steps taken since start plus the immutable step duration.
#[derive(Debug, Clone, Copy)]
pub struct SimTime {
    steps: u64,
    step_duration: f64,
}

impl SimTime {
    pub fn new(step_duration: f64) -> Self {
        assert!(
            step_duration.is_finite() && step_duration > 0.0,
            "fixed step duration must be a positive finite value, got {step_duration}"
        );
        Self {
            steps: 0,
            step_duration,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    /// Simulated seconds since start.
    pub fn elapsed_seconds(&self) -> f64 {
        self.steps as f64 * self.step_duration
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// Fixed steps taken this tick. Zero is normal when the wall delta is
    /// small relative to the step duration.
    pub steps: u32,
    /// Leftover accumulator as a fraction of the step duration, in `[0, 1)`.
    /// The render path blends the last two snapshots by this factor.
    pub alpha: f32,
    /// Wall time discarded by the catch-up clamp, zero on a healthy frame.
    pub discarded_seconds: f64,
}

/// Converts variable wall-clock deltas into whole fixed simulation steps.
///
/// Deltas are clamped to `max_frame_delta` before entering the accumulator,
/// so a long stall produces a bounded catch-up burst instead of an unbounded
/// one; the excess wall time is discarded, not simulated.
#[derive(Debug)]
pub struct FrameScheduler {
    accumulator: f64,
    sim_time: SimTime,
    max_frame_delta: f64,
}

impl FrameScheduler {
    pub fn new(step_duration: f64, max_frame_delta: f64) -> Self {
        assert!(
            max_frame_delta.is_finite() && max_frame_delta > 0.0,
            "frame delta clamp must be a positive finite value, got {max_frame_delta}"
        );
        Self {
            accumulator: 0.0,
            sim_time: SimTime::new(step_duration),
            max_frame_delta,
        }
    }

    pub fn sim_time(&self) -> SimTime {
        self.sim_time
    }

    pub fn accumulator_seconds(&self) -> f64 {
        self.accumulator
    }

    /// Advances the accumulator by `wall_delta` seconds and invokes `step_fn`
    /// once per whole fixed step, passing the step duration.
    ///
    /// Panics on a negative or non-finite delta: that indicates a broken
    /// clock source upstream, and simulating from it would corrupt state.
    pub fn tick(&mut self, wall_delta: f64, mut step_fn: impl FnMut(f64)) -> FrameTick {
        assert!(
            wall_delta.is_finite() && wall_delta >= 0.0,
            "frame scheduler received an invalid wall delta: {wall_delta}"
        );

        let clamped = wall_delta.min(self.max_frame_delta);
        let discarded_seconds = wall_delta - clamped;
        if discarded_seconds > 0.0 {
            warn!(
                wall_delta_ms = (wall_delta * 1000.0) as u64,
                discarded_ms = (discarded_seconds * 1000.0) as u64,
                "wall_delta_clamped"
            );
        }

        self.accumulator += clamped;
        let step_duration = self.sim_time.step_duration;
        let mut steps = 0u32;
        while self.accumulator >= step_duration {
            step_fn(step_duration);
            self.accumulator -= step_duration;
            self.sim_time.steps += 1;
            steps += 1;
        }

        FrameTick {
            steps,
            alpha: (self.accumulator / step_duration) as f32,
            discarded_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f64 = 1.0 / 60.0;

    fn tick_counting(scheduler: &mut FrameScheduler, delta: f64) -> (FrameTick, u32) {
        let mut calls = 0;
        let tick = scheduler.tick(delta, |_| calls += 1);
        (tick, calls)
    }

    #[test]
    fn small_delta_takes_no_steps_and_carries_accumulator() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        let (tick, calls) = tick_counting(&mut scheduler, 0.01);
        assert_eq!(tick.steps, 0);
        assert_eq!(calls, 0);
        assert!((scheduler.accumulator_seconds() - 0.01).abs() < 1.0e-12);
        assert!(tick.alpha > 0.0 && tick.alpha < 1.0);
    }

    #[test]
    fn accumulator_stays_below_step_duration_after_tick() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        for delta in [0.016, 0.033, 0.2, 0.0, 0.07] {
            scheduler.tick(delta, |_| {});
            assert!(scheduler.accumulator_seconds() < STEP);
            assert!(scheduler.accumulator_seconds() >= 0.0);
        }
    }

    #[test]
    fn total_steps_match_total_time_regardless_of_split() {
        let total = 1.0;
        let splits: &[&[f64]] = &[
            &[1.0],
            &[0.5, 0.5],
            &[0.25, 0.25, 0.25, 0.25],
            &[0.1; 10],
            &[0.013, 0.187, 0.2, 0.2, 0.2, 0.2],
        ];
        for deltas in splits {
            let sum: f64 = deltas.iter().sum();
            assert!((sum - total).abs() < 1.0e-9);
            let mut scheduler = FrameScheduler::new(STEP, 10.0);
            let mut steps = 0u64;
            for delta in *deltas {
                steps += u64::from(scheduler.tick(*delta, |_| {}).steps);
            }
            let expected = (total / STEP).floor() as u64;
            assert!(
                steps >= expected.saturating_sub(1) && steps <= expected + 1,
                "split {deltas:?} took {steps} steps, expected ~{expected}"
            );
        }
    }

    #[test]
    fn stall_is_clamped_not_simulated() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        let (tick, calls) = tick_counting(&mut scheduler, 5.0);
        let expected = (0.25 / STEP).floor() as u32;
        assert_eq!(tick.steps, expected);
        assert_eq!(calls, expected);
        assert!((tick.discarded_seconds - 4.75).abs() < 1.0e-9);
    }

    #[test]
    fn sim_time_counts_every_step() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        scheduler.tick(0.1, |_| {});
        scheduler.tick(0.1, |_| {});
        let steps = scheduler.sim_time().steps();
        assert!((11..=12).contains(&steps), "took {steps} steps");
        assert!((scheduler.sim_time().elapsed_seconds() - 0.2).abs() < STEP);
    }

    #[test]
    fn step_fn_receives_the_fixed_duration() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        let mut seen = Vec::new();
        scheduler.tick(0.05, |dt| seen.push(dt));
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|dt| *dt == STEP));
    }

    #[test]
    fn alpha_is_fraction_of_leftover_time() {
        let mut scheduler = FrameScheduler::new(0.01, 0.25);
        let tick = scheduler.tick(0.025, |_| {});
        assert_eq!(tick.steps, 2);
        assert!((f64::from(tick.alpha) - 0.5).abs() < 1.0e-6);
    }

    #[test]
    #[should_panic(expected = "invalid wall delta")]
    fn negative_delta_panics() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        scheduler.tick(-0.01, |_| {});
    }

    #[test]
    #[should_panic(expected = "invalid wall delta")]
    fn nan_delta_panics() {
        let mut scheduler = FrameScheduler::new(STEP, 0.25);
        scheduler.tick(f64::NAN, |_| {});
    }

    #[test]
    #[should_panic(expected = "positive finite value")]
    fn zero_step_duration_panics() {
        let _ = SimTime::new(0.0);
    }
}
