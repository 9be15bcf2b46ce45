//! Floating-delta interval accumulator.
//!
//! The heartbeat and announcement loops both wake on a short tick and act
//! only when enough wall-clock has accumulated; this keeps the cadence
//! independent of the tick length.

/// Accumulates elapsed time and fires each time `interval` is reached.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: f32,
    delta: f32,
}

impl Ticker {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            delta: 0.0,
        }
    }

    /// Add `dt` seconds.  When the accumulated delta reaches the interval,
    /// returns it and resets the accumulator.
    pub fn advance(&mut self, dt: f32) -> Option<f32> {
        self.delta += dt;
        if self.delta >= self.interval {
            let elapsed = self.delta;
            self.delta = 0.0;
            Some(elapsed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut ticker = Ticker::new(1.0);
        // 30 seconds of wall-clock in 100 ms ticks -> 30 firings.
        let mut fired = 0;
        for _ in 0..300 {
            if ticker.advance(0.1).is_some() {
                fired += 1;
            }
        }
        assert!((29..=30).contains(&fired));
    }

    #[test]
    fn reports_the_accumulated_delta() {
        let mut ticker = Ticker::new(0.05);
        assert_eq!(ticker.advance(0.04), None);
        let elapsed = ticker.advance(0.04).unwrap();
        assert!((elapsed - 0.08).abs() < 1e-6);
        // Accumulator restarts from zero after firing.
        assert_eq!(ticker.advance(0.04), None);
    }

    #[test]
    fn oversized_steps_fire_immediately() {
        let mut ticker = Ticker::new(1.0);
        assert!(ticker.advance(5.0).is_some());
    }
}
