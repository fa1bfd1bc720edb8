//! Gain envelope — scheduled gain automation against the audio clock.
//!
//! Works like a web-audio gain parameter: events are placed on a timeline
//! (in seconds) and the value at any instant is derived from them. Scheduling
//! never blocks; the renderer evaluates the timeline sample by sample.

/// Smallest value an exponential segment may target.
const MIN_RAMP_VALUE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    /// Jump to `value` at `time`.
    Set { value: f64, time: f64 },
    /// Ramp exponentially from the previous event, arriving at `value` at `time`.
    Exponential { value: f64, time: f64 },
}

impl Event {
    fn time(&self) -> f64 {
        match *self {
            Event::Set { time, .. } | Event::Exponential { time, .. } => time,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            Event::Set { value, .. } | Event::Exponential { value, .. } => value,
        }
    }
}

/// Automation timeline for one voice's gain.
#[derive(Debug, Clone)]
pub struct GainEnvelope {
    /// Value before the first event.
    default_value: f64,
    /// Events in time order.
    events: Vec<Event>,
}

impl GainEnvelope {
    pub fn new(default_value: f64) -> Self {
        GainEnvelope {
            default_value,
            events: Vec::new(),
        }
    }

    /// Jump to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(Event::Set { value, time });
    }

    /// Ramp exponentially from the previous scheduled value to `value`,
    /// arriving at `time`.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(Event::Exponential {
            value: value.max(MIN_RAMP_VALUE),
            time,
        });
    }

    /// Drop every event after `time` and hold the value the envelope had at
    /// `time`. Already-elapsed automation is unaffected.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) {
        let held = self.value_at(time);
        let next = self.events.partition_point(|e| e.time() <= time);
        let ramp_in_progress = matches!(self.events.get(next), Some(Event::Exponential { .. }));
        self.events.truncate(next);
        if ramp_in_progress {
            // Truncate the ramp so the elapsed part keeps its curve.
            self.events.push(Event::Exponential { value: held, time });
        } else {
            self.events.push(Event::Set { value: held, time });
        }
    }

    /// Evaluate the gain at `time` (seconds on the audio clock).
    pub fn value_at(&self, time: f64) -> f64 {
        // Index of the first event strictly after `time`.
        let next = self.events.partition_point(|e| e.time() <= time);

        let (prev_value, prev_time) = match next.checked_sub(1) {
            Some(i) => (self.events[i].value(), self.events[i].time()),
            None => (self.default_value, 0.0),
        };

        match self.events.get(next) {
            Some(&Event::Exponential { value, time: end }) if end > prev_time => {
                let start = prev_value.max(MIN_RAMP_VALUE);
                let t = ((time - prev_time) / (end - prev_time)).clamp(0.0, 1.0);
                start * (value / start).powf(t)
            }
            _ => prev_value,
        }
    }

    /// Time of the last scheduled event (0 when empty).
    pub fn end_time(&self) -> f64 {
        self.events.last().map_or(0.0, Event::time)
    }

    /// True once all automation has elapsed and the gain sits at or below `floor`.
    pub fn is_settled_below(&self, time: f64, floor: f64) -> bool {
        time >= self.end_time() && self.value_at(time) <= floor
    }

    fn insert(&mut self, event: Event) {
        // Events at the same time keep insertion order.
        let at = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(at, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn default_before_events() {
        let env = GainEnvelope::new(0.7);
        assert!(approx(env.value_at(0.0), 0.7));
        assert!(approx(env.value_at(100.0), 0.7));
    }

    #[test]
    fn set_value_jumps() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(0.25, 2.0);
        assert!(approx(env.value_at(1.999), 1.0));
        assert!(approx(env.value_at(2.0), 0.25));
        assert!(approx(env.value_at(3.0), 0.25));
    }

    #[test]
    fn exponential_ramp_midpoint_is_geometric_mean() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(1.0, 0.0);
        env.exponential_ramp_to_value_at_time(0.01, 10.0);
        assert!(approx(env.value_at(0.0), 1.0));
        assert!(approx(env.value_at(5.0), 0.1), "got {}", env.value_at(5.0));
        assert!(approx(env.value_at(10.0), 0.01));
        assert!(approx(env.value_at(20.0), 0.01));
    }

    #[test]
    fn ramp_is_monotonic() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(1.5, 0.0);
        env.exponential_ramp_to_value_at_time(0.001, 13.0);
        let mut last = f64::MAX;
        for i in 0..=130 {
            let v = env.value_at(i as f64 * 0.1);
            assert!(v <= last, "Decay must never rise: {v} > {last}");
            last = v;
        }
    }

    #[test]
    fn cancel_and_hold_truncates_future_ramp() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(1.0, 0.0);
        env.exponential_ramp_to_value_at_time(0.01, 10.0);
        let at_five = env.value_at(5.0);

        env.cancel_and_hold_at_time(5.0);
        assert!(approx(env.value_at(5.0), at_five));
        assert!(approx(env.value_at(9.0), at_five), "Held value must not keep decaying");
        // Elapsed part of the ramp is untouched.
        assert!(approx(env.value_at(2.5), 1.0 * (0.01f64).powf(0.25)));
    }

    #[test]
    fn release_after_hold_ramps_quickly() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(1.0, 0.0);
        env.exponential_ramp_to_value_at_time(0.01, 10.0);
        env.cancel_and_hold_at_time(1.0);
        env.exponential_ramp_to_value_at_time(0.01, 1.5);
        assert!(approx(env.value_at(1.5), 0.01));
        assert!(env.is_settled_below(1.5, 0.01));
        assert!(!env.is_settled_below(1.2, 0.01));
        assert!(approx(env.end_time(), 1.5));
    }

    #[test]
    fn ramp_target_is_clamped_positive() {
        let mut env = GainEnvelope::new(1.0);
        env.set_value_at_time(1.0, 0.0);
        env.exponential_ramp_to_value_at_time(0.0, 1.0);
        let v = env.value_at(0.5);
        assert!(v.is_finite() && v > 0.0, "Ramp toward zero must stay finite, got {v}");
    }
}
