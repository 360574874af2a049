//! Sample-accurate parameter automation.
//!
//! An [`AudioParam`] carries an intrinsic scalar plus a sorted list of
//! automation events. The control thread mutates the list by rebuilding an
//! immutable vector and publishing it with an atomic swap (retried on
//! contention), so the render thread always evaluates against a consistent
//! snapshot and never takes a lock.
//!
//! Each block, [`compute`](AudioParam::compute) fills a 128-value slice:
//! audio-rate parameters evaluate per sample, control-rate parameters
//! evaluate once at block start and broadcast. Audio-rate modulation from a
//! hidden summing input is added before the final clamp.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::block::AudioBlock;
use crate::error::{GraphError, Result};
use crate::FRAMES_PER_BLOCK;

/// Minimum time constant for target approach, in seconds.
const MIN_TIME_CONSTANT: f64 = 0.001;

/// How a parameter produces values across a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationRate {
    /// One value per sample.
    Audio,
    /// One value per block, computed at block start.
    Control,
}

/// One scheduled automation event.
#[derive(Debug, Clone, Copy)]
pub enum AutomationEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
    ExponentialRamp { value: f32, time: f64 },
    SetTarget { target: f32, time: f64, time_constant: f64 },
}

impl AutomationEvent {
    fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. }
            | AutomationEvent::LinearRamp { time, .. }
            | AutomationEvent::ExponentialRamp { time, .. }
            | AutomationEvent::SetTarget { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            AutomationEvent::SetValue { value, .. }
            | AutomationEvent::LinearRamp { value, .. }
            | AutomationEvent::ExponentialRamp { value, .. } => value,
            AutomationEvent::SetTarget { target, .. } => target,
        }
    }

    /// Whether crossing this event moves the baseline.
    fn advances_baseline(&self) -> bool {
        !matches!(self, AutomationEvent::SetTarget { .. })
    }
}

/// A named automatable parameter.
///
/// Shared between the control thread (scheduling) and the render thread
/// (evaluation); all shared state is atomic.
pub struct AudioParam {
    name: &'static str,
    default: f32,
    min: f32,
    max: f32,
    rate: AutomationRate,
    /// Current intrinsic scalar, as f32 bits.
    intrinsic: AtomicU32,
    /// Published event snapshot, sorted by time.
    events: ArcSwap<Vec<AutomationEvent>>,
}

impl AudioParam {
    pub(crate) fn new(
        name: &'static str,
        default: f32,
        min: f32,
        max: f32,
        rate: AutomationRate,
    ) -> Arc<Self> {
        assert!(min <= default && default <= max, "invalid bounds for {name}");
        Arc::new(Self {
            name,
            default,
            min,
            max,
            rate,
            intrinsic: AtomicU32::new(default.to_bits()),
            events: ArcSwap::from_pointee(Vec::new()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn min_value(&self) -> f32 {
        self.min
    }

    pub fn max_value(&self) -> f32 {
        self.max
    }

    pub fn automation_rate(&self) -> AutomationRate {
        self.rate
    }

    /// The intrinsic scalar (the last value set, not the automated value).
    pub fn value(&self) -> f32 {
        f32::from_bits(self.intrinsic.load(Ordering::Acquire))
    }

    /// Set the intrinsic scalar and cancel every scheduled event.
    pub fn set_value(&self, value: f32) {
        self.intrinsic.store(value.to_bits(), Ordering::Release);
        self.events.store(Arc::new(Vec::new()));
    }

    /// Schedule an instantaneous value change at `time`.
    pub fn set_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        validate_time(time)?;
        self.insert(AutomationEvent::SetValue { value, time });
        Ok(())
    }

    /// Schedule a linear ramp ending with `value` at `time`.
    pub fn linear_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        validate_time(time)?;
        self.insert(AutomationEvent::LinearRamp { value, time });
        Ok(())
    }

    /// Schedule an exponential ramp ending with `value` at `time`.
    /// `value` must be strictly positive.
    pub fn exponential_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        validate_time(time)?;
        if value <= 0.0 {
            return Err(GraphError::argument(format!(
                "exponential ramp target {value} must be strictly positive"
            )));
        }
        self.insert(AutomationEvent::ExponentialRamp { value, time });
        Ok(())
    }

    /// Schedule an exponential approach toward `target` starting at `time`
    /// with the given time constant.
    pub fn set_target_at_time(&self, target: f32, time: f64, time_constant: f64) -> Result<()> {
        validate_time(time)?;
        if !(time_constant >= 0.0) {
            return Err(GraphError::argument(format!(
                "time constant {time_constant} must be non-negative"
            )));
        }
        self.insert(AutomationEvent::SetTarget {
            target,
            time,
            time_constant,
        });
        Ok(())
    }

    /// Drop every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&self, time: f64) -> Result<()> {
        validate_time(time)?;
        self.events.rcu(|current| {
            let mut next = (**current).clone();
            next.retain(|e| e.time() < time);
            next
        });
        Ok(())
    }

    /// Insert sorted by time, after any events already at the same time.
    /// Publication retries under contention; last writer wins.
    fn insert(&self, event: AutomationEvent) {
        self.events.rcu(|current| {
            let mut next = (**current).clone();
            let at = next.partition_point(|e| e.time() <= event.time());
            next.insert(at, event);
            next
        });
    }

    /// Evaluate the automated (unclamped, unmodulated) value at time `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        let events = self.events.load();
        value_from_events(&events, self.value(), t)
    }

    /// Fill `out` with the block's values: per-sample for audio-rate,
    /// block-start broadcast for control-rate. `modulation`'s first channel
    /// (when present) is summed in before the clamp to `[min, max]`;
    /// control-rate parameters read modulation sample 0.
    pub(crate) fn compute(
        &self,
        block_time: f64,
        sample_rate: f64,
        modulation: Option<&AudioBlock>,
        out: &mut [f32],
    ) {
        debug_assert_eq!(out.len(), FRAMES_PER_BLOCK);
        let events = self.events.load();
        let intrinsic = self.value();

        match self.rate {
            AutomationRate::Audio => {
                for (i, slot) in out.iter_mut().enumerate() {
                    let t = block_time + i as f64 / sample_rate;
                    *slot = value_from_events(&events, intrinsic, t);
                }
                if let Some(block) = modulation {
                    for (slot, &m) in out.iter_mut().zip(block.channel(0)) {
                        *slot += m;
                    }
                }
            }
            AutomationRate::Control => {
                let mut v = value_from_events(&events, intrinsic, block_time);
                if let Some(block) = modulation {
                    v += block.channel(0)[0];
                }
                out.fill(v);
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(self.min, self.max);
        }
    }
}

fn validate_time(time: f64) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(GraphError::argument(format!(
            "automation time {time} must be finite and non-negative"
        )));
    }
    Ok(())
}

/// The value-at-time law, evaluated against a sorted event snapshot.
fn value_from_events(events: &[AutomationEvent], intrinsic: f32, t: f64) -> f32 {
    if events.is_empty() {
        return intrinsic;
    }

    // First event strictly after t, and the baseline carried across every
    // earlier event (set-target does not advance it).
    let idx = events.partition_point(|e| e.time() <= t);
    let mut baseline = intrinsic;
    for e in &events[..idx] {
        if e.advances_baseline() {
            baseline = e.value();
        }
    }

    if idx == events.len() {
        // Past the last event: hold, or keep approaching the target.
        return match events[idx - 1] {
            AutomationEvent::SetTarget {
                target,
                time,
                time_constant,
            } => approach(target, baseline, t - time, time_constant),
            _ => baseline,
        };
    }

    if idx == 0 {
        return baseline;
    }

    let prev = &events[idx - 1];
    match events[idx] {
        AutomationEvent::LinearRamp { value, time } => {
            ramp_lerp(prev.value(), value, prev.time(), time, t)
        }
        AutomationEvent::ExponentialRamp { value, time } => {
            let v0 = prev.value();
            if v0 <= 0.0 || value <= 0.0 {
                // Degenerate endpoints fall back to a linear segment.
                ramp_lerp(v0, value, prev.time(), time, t)
            } else {
                let span = time - prev.time();
                if span <= 0.0 {
                    value
                } else {
                    let k = ((t - prev.time()) / span) as f32;
                    v0 * (value / v0).powf(k)
                }
            }
        }
        _ => match *prev {
            AutomationEvent::SetTarget {
                target,
                time,
                time_constant,
            } => approach(target, baseline, t - time, time_constant),
            _ => prev.value(),
        },
    }
}

#[inline]
fn ramp_lerp(v0: f32, v1: f32, t0: f64, t1: f64, t: f64) -> f32 {
    let span = t1 - t0;
    if span <= 0.0 {
        return v1;
    }
    let k = ((t - t0) / span) as f32;
    v0 + (v1 - v0) * k
}

#[inline]
fn approach(target: f32, from: f32, elapsed: f64, time_constant: f64) -> f32 {
    let tau = time_constant.max(MIN_TIME_CONSTANT);
    target + (from - target) * (-elapsed / tau).exp() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(rate: AutomationRate) -> Arc<AudioParam> {
        AudioParam::new("test", 1.0, -10.0, 10.0, rate)
    }

    #[test]
    fn test_intrinsic_without_events() {
        let p = param(AutomationRate::Audio);
        assert_eq!(p.value_at(0.0), 1.0);
        p.set_value(0.25);
        assert_eq!(p.value_at(5.0), 0.25);
    }

    #[test]
    fn test_set_value_cancels_schedule() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(3.0, 1.0).unwrap();
        p.set_value(0.5);
        assert_eq!(p.value_at(2.0), 0.5);
    }

    #[test]
    fn test_before_first_event_returns_intrinsic() {
        let p = param(AutomationRate::Audio);
        p.linear_ramp_to_value_at_time(5.0, 1.0).unwrap();
        // Strictly before event 0 the intrinsic baseline holds.
        assert_eq!(p.value_at(0.5), 1.0);
    }

    #[test]
    fn test_linear_ramp_interpolates() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(0.0, 0.0).unwrap();
        p.linear_ramp_to_value_at_time(1.0, 1.0).unwrap();
        assert_eq!(p.value_at(0.0), 0.0);
        assert!((p.value_at(0.25) - 0.25).abs() < 1e-6);
        assert!((p.value_at(0.75) - 0.75).abs() < 1e-6);
        assert_eq!(p.value_at(1.0), 1.0);
        assert_eq!(p.value_at(2.0), 1.0);
    }

    #[test]
    fn test_exponential_ramp_is_geometric() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(1.0, 0.0).unwrap();
        p.exponential_ramp_to_value_at_time(4.0, 1.0).unwrap();
        // Midpoint of a geometric ramp is the geometric mean.
        assert!((p.value_at(0.5) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_exponential_ramp_rejects_non_positive_target() {
        let p = param(AutomationRate::Audio);
        assert!(p.exponential_ramp_to_value_at_time(0.0, 1.0).is_err());
        assert!(p.exponential_ramp_to_value_at_time(-1.0, 1.0).is_err());
    }

    #[test]
    fn test_exponential_ramp_degrades_to_linear_from_zero() {
        let p = AudioParam::new("test", 0.0, -10.0, 10.0, AutomationRate::Audio);
        p.set_value_at_time(0.0, 0.0).unwrap();
        p.exponential_ramp_to_value_at_time(2.0, 1.0).unwrap();
        assert!((p.value_at(0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_target_approach() {
        let p = param(AutomationRate::Audio);
        p.set_value(1.0);
        p.set_target_at_time(0.0, 0.0, 0.5).unwrap();
        let v = p.value_at(0.5);
        assert!((v - (-1.0f64).exp() as f32).abs() < 1e-6);
        // Approaches but never overshoots.
        assert!(p.value_at(10.0) > 0.0);
        assert!(p.value_at(10.0) < 1e-6);
    }

    #[test]
    fn test_set_target_clamps_tiny_time_constant() {
        let p = param(AutomationRate::Audio);
        p.set_target_at_time(0.0, 0.0, 0.0).unwrap();
        // tau is floored at 1 ms, so the value is finite and decaying.
        let v = p.value_at(0.0005);
        assert!(v > 0.0 && v < 1.0);
    }

    #[test]
    fn test_cancel_scheduled_values_drops_suffix() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(2.0, 1.0).unwrap();
        p.set_value_at_time(3.0, 2.0).unwrap();
        p.cancel_scheduled_values(1.5).unwrap();
        assert_eq!(p.value_at(5.0), 2.0);
    }

    #[test]
    fn test_monotonic_between_events() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(0.0, 0.0).unwrap();
        p.linear_ramp_to_value_at_time(8.0, 1.0).unwrap();
        let mut last = f32::MIN;
        for i in 0..100 {
            let v = p.value_at(i as f64 / 100.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn test_compute_audio_rate_block() {
        let p = AudioParam::new("gain", 1.0, 0.0, 1.0, AutomationRate::Audio);
        p.set_value_at_time(0.0, 0.0).unwrap();
        p.linear_ramp_to_value_at_time(1.0, FRAMES_PER_BLOCK as f64 / 48000.0)
            .unwrap();

        let mut out = [0.0f32; FRAMES_PER_BLOCK];
        p.compute(0.0, 48000.0, None, &mut out);
        assert_eq!(out[0], 0.0);
        for i in 1..FRAMES_PER_BLOCK {
            let expected = i as f32 / FRAMES_PER_BLOCK as f32;
            assert!((out[i] - expected).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn test_compute_control_rate_broadcasts() {
        let p = AudioParam::new("freq", 440.0, 0.0, 24000.0, AutomationRate::Control);
        p.set_value_at_time(880.0, 0.0).unwrap();
        let mut out = [0.0f32; FRAMES_PER_BLOCK];
        p.compute(0.0, 48000.0, None, &mut out);
        assert!(out.iter().all(|&v| v == 880.0));
    }

    #[test]
    fn test_compute_clamps_after_modulation() {
        let p = AudioParam::new("gain", 0.9, 0.0, 1.0, AutomationRate::Audio);
        let mut modulation = AudioBlock::new(1);
        modulation.channel_mut(0).fill(0.5);

        let mut out = [0.0f32; FRAMES_PER_BLOCK];
        p.compute(0.0, 48000.0, Some(&modulation), &mut out);
        // 0.9 + 0.5 clamps to the max of 1.0.
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_events_sorted_on_out_of_order_insert() {
        let p = param(AutomationRate::Audio);
        p.set_value_at_time(3.0, 3.0).unwrap();
        p.set_value_at_time(2.0, 1.0).unwrap();
        assert_eq!(p.value_at(1.5), 2.0);
        assert_eq!(p.value_at(3.5), 3.0);
    }
}
