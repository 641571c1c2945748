//! Trickle suppression timer.
//!
//! Each key owns one [`TrickleTimer`]. Every interval `I` has a single
//! transmission point `t`, drawn uniformly from `[I/2, I)`:
//!
//! 1. At `t`, transmit unless `k` consistent announcements were already
//!    heard during this interval.
//! 2. At the end of `I`, forget the heard count and double `I` up to `Imax`.
//! 3. On any observed inconsistency, drop back to `Imin`.
//!
//! Quiet networks therefore converge to one announcement per `Imax` per
//! neighbourhood, while a change spreads at `Imin` pace.
//!
//! # References
//!
//! Levis, Clausen, et al. "The Trickle Algorithm", RFC 6206 (2011)

use rand::Rng;
use std::time::{Duration, Instant};

/// Timer bounds and redundancy threshold for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrickleParams {
    /// Shortest interval, used right after an inconsistency
    pub imin: Duration,
    /// Longest interval reached by doubling
    pub imax: Duration,
    /// Number of consistent announcements that suppress a transmission
    pub redundancy: u32,
}

impl Default for TrickleParams {
    fn default() -> Self {
        Self {
            imin: Duration::from_millis(100),
            imax: Duration::from_millis(100 << 10),
            redundancy: 1,
        }
    }
}

impl TrickleParams {
    /// Create parameters from interval bounds and redundancy.
    #[must_use]
    pub fn new(imin: Duration, imax: Duration, redundancy: u32) -> Self {
        Self {
            imin,
            imax,
            redundancy,
        }
    }

    /// Check the parameters describe a runnable timer.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.imin.is_zero() {
            return Err(ParamError::ZeroImin);
        }
        if self.imin > self.imax {
            return Err(ParamError::IminAboveImax {
                imin: self.imin,
                imax: self.imax,
            });
        }
        if self.redundancy == 0 {
            return Err(ParamError::ZeroRedundancy);
        }
        Ok(())
    }
}

/// Unusable registration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    /// Values must hold at least one byte
    #[error("payload size must be at least one byte")]
    ZeroSize,
    /// `Imin` of zero
    #[error("imin must be greater than zero")]
    ZeroImin,
    /// `Imin` above `Imax`
    #[error("imin {imin:?} exceeds imax {imax:?}")]
    IminAboveImax {
        /// Shortest interval
        imin: Duration,
        /// Longest interval
        imax: Duration,
    },
    /// `k` of zero
    #[error("redundancy must be at least 1")]
    ZeroRedundancy,
}

/// What the timer asks its owner to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Transmission {
    /// Version and digest only
    Summary,
    /// The full value
    Data,
}

/// Per-key trickle state.
#[derive(Debug, Clone)]
pub struct TrickleTimer {
    params: TrickleParams,
    interval: Duration,
    started: Instant,
    fire_at: Instant,
    fired: bool,
    heard: u32,
    needs_data: bool,
}

impl TrickleTimer {
    /// Start a timer at `Imin`.
    pub fn new<R: Rng + ?Sized>(params: TrickleParams, now: Instant, rng: &mut R) -> Self {
        let mut timer = Self {
            params,
            interval: params.imin,
            started: now,
            fire_at: now,
            fired: false,
            heard: 0,
            needs_data: false,
        };
        timer.begin(now, rng);
        timer
    }

    /// Timer parameters.
    #[must_use]
    pub fn params(&self) -> TrickleParams {
        self.params
    }

    /// Current interval length.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consistent announcements heard in the current interval.
    #[must_use]
    pub fn heard_consistent(&self) -> u32 {
        self.heard
    }

    /// Whether the next transmission will carry the full value.
    #[must_use]
    pub fn needs_data(&self) -> bool {
        self.needs_data
    }

    /// Record a consistent announcement overheard from a neighbour.
    pub fn hear_consistent(&mut self) {
        self.heard = self.heard.saturating_add(1);
    }

    /// Make the next transmission a data message.
    pub fn request_data(&mut self) {
        self.needs_data = true;
    }

    /// React to an observed inconsistency.
    ///
    /// Falls back to `Imin` and clears the heard count. A pending
    /// transmission point in an `Imin` interval is kept, so repeated
    /// inconsistencies cannot postpone transmission forever.
    pub fn reset<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) {
        self.heard = 0;
        if self.interval == self.params.imin && !self.fired && now < self.fire_at {
            return;
        }
        self.interval = self.params.imin;
        self.begin(now, rng);
    }

    /// The next instant at which [`poll`](Self::poll) has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        if self.fired {
            self.started + self.interval
        } else {
            self.fire_at
        }
    }

    /// Advance the timer to `now`.
    ///
    /// Returns the transmission due, if any. When `now` lies several
    /// intervals ahead, all of them are run and at most one transmission is
    /// returned, a data message if any of them asked for one.
    pub fn poll<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Option<Transmission> {
        let mut due = None;
        loop {
            if !self.fired {
                if now < self.fire_at {
                    break;
                }
                self.fired = true;
                if self.heard < self.params.redundancy {
                    let kind = if std::mem::take(&mut self.needs_data) {
                        Transmission::Data
                    } else {
                        Transmission::Summary
                    };
                    due = due.max(Some(kind));
                } else {
                    tracing::trace!(heard = self.heard, "Suppressed announcement");
                }
            }

            let end = self.started + self.interval;
            if now < end {
                break;
            }
            self.interval = self.interval.saturating_mul(2).min(self.params.imax);
            self.begin(end, rng);
        }
        due
    }

    /// Start a new interval of the current length at `start`.
    fn begin<R: Rng + ?Sized>(&mut self, start: Instant, rng: &mut R) {
        let half = self.interval / 2;
        let span = self.interval - half;
        let span_nanos = u64::try_from(span.as_nanos()).unwrap_or(u64::MAX);
        let offset = if span_nanos == 0 {
            0
        } else {
            rng.gen_range(0..span_nanos)
        };

        self.started = start;
        self.fire_at = start + half + Duration::from_nanos(offset);
        self.fired = false;
        self.heard = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> TrickleParams {
        TrickleParams::new(Duration::from_millis(100), Duration::from_millis(800), 1)
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        assert_eq!(params().validate(), Ok(()));
        assert_eq!(
            TrickleParams::new(Duration::ZERO, Duration::from_secs(1), 1).validate(),
            Err(ParamError::ZeroImin)
        );
        assert_eq!(
            TrickleParams::new(Duration::from_secs(2), Duration::from_secs(1), 1).validate(),
            Err(ParamError::IminAboveImax {
                imin: Duration::from_secs(2),
                imax: Duration::from_secs(1),
            })
        );
        assert_eq!(
            TrickleParams::new(Duration::from_secs(1), Duration::from_secs(1), 0).validate(),
            Err(ParamError::ZeroRedundancy)
        );
    }

    #[test]
    fn fires_once_in_second_half_of_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let start = Instant::now();
        let mut timer = TrickleTimer::new(params(), start, &mut rng);

        let deadline = timer.next_deadline();
        assert!(deadline >= start + Duration::from_millis(50));
        assert!(deadline < start + Duration::from_millis(100));

        assert_eq!(timer.poll(start, &mut rng), None);
        assert_eq!(timer.poll(deadline, &mut rng), Some(Transmission::Summary));
        assert_eq!(timer.poll(deadline, &mut rng), None);
    }

    #[test]
    fn interval_doubles_up_to_imax() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut now = Instant::now();
        let mut timer = TrickleTimer::new(params(), now, &mut rng);

        let mut seen = Vec::new();
        for _ in 0..12 {
            now = timer.next_deadline();
            timer.poll(now, &mut rng);
            seen.push(timer.interval());
        }

        assert!(seen.contains(&Duration::from_millis(200)));
        assert!(seen.contains(&Duration::from_millis(400)));
        assert_eq!(timer.interval(), Duration::from_millis(800));
    }

    #[test]
    fn redundancy_suppresses_transmission() {
        let mut rng = StdRng::seed_from_u64(3);
        let start = Instant::now();
        let mut timer = TrickleTimer::new(params(), start, &mut rng);

        timer.hear_consistent();
        assert_eq!(timer.heard_consistent(), 1);
        assert_eq!(timer.poll(timer.next_deadline(), &mut rng), None);
    }

    #[test]
    fn suppression_needs_k_announcements() {
        let params = TrickleParams::new(Duration::from_millis(100), Duration::from_millis(800), 3);
        let start = Instant::now();

        let mut rng = StdRng::seed_from_u64(17);
        let mut timer = TrickleTimer::new(params, start, &mut rng);
        timer.hear_consistent();
        timer.hear_consistent();
        assert_eq!(
            timer.poll(timer.next_deadline(), &mut rng),
            Some(Transmission::Summary)
        );

        let mut rng = StdRng::seed_from_u64(17);
        let mut timer = TrickleTimer::new(params, start, &mut rng);
        for _ in 0..3 {
            timer.hear_consistent();
        }
        assert_eq!(timer.poll(timer.next_deadline(), &mut rng), None);
    }

    #[test]
    fn heard_count_clears_each_interval() {
        let mut rng = StdRng::seed_from_u64(3);
        let start = Instant::now();
        let mut timer = TrickleTimer::new(params(), start, &mut rng);

        timer.hear_consistent();
        timer.poll(start + Duration::from_millis(100), &mut rng);
        assert_eq!(timer.heard_consistent(), 0);
        assert_eq!(timer.interval(), Duration::from_millis(200));
    }

    #[test]
    fn data_request_is_sent_once() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut now = Instant::now();
        let mut timer = TrickleTimer::new(params(), now, &mut rng);

        timer.request_data();
        now = timer.next_deadline();
        assert_eq!(timer.poll(now, &mut rng), Some(Transmission::Data));
        assert!(!timer.needs_data());

        now = timer.next_deadline();
        timer.poll(now, &mut rng);
        now = timer.next_deadline();
        assert_eq!(timer.poll(now, &mut rng), Some(Transmission::Summary));
    }

    #[test]
    fn suppressed_data_request_survives() {
        let mut rng = StdRng::seed_from_u64(5);
        let now = Instant::now();
        let mut timer = TrickleTimer::new(params(), now, &mut rng);

        timer.request_data();
        timer.hear_consistent();
        assert_eq!(timer.poll(timer.next_deadline(), &mut rng), None);
        assert!(timer.needs_data());
    }

    #[test]
    fn reset_returns_to_imin() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut now = Instant::now();
        let mut timer = TrickleTimer::new(params(), now, &mut rng);

        for _ in 0..8 {
            now = timer.next_deadline();
            timer.poll(now, &mut rng);
        }
        assert!(timer.interval() > Duration::from_millis(100));

        timer.hear_consistent();
        timer.reset(now, &mut rng);
        assert_eq!(timer.interval(), Duration::from_millis(100));
        assert_eq!(timer.heard_consistent(), 0);
        assert!(timer.next_deadline() < now + Duration::from_millis(100));
    }

    #[test]
    fn reset_keeps_pending_imin_transmission() {
        let mut rng = StdRng::seed_from_u64(13);
        let start = Instant::now();
        let mut timer = TrickleTimer::new(params(), start, &mut rng);
        let deadline = timer.next_deadline();

        timer.reset(start + Duration::from_millis(10), &mut rng);
        assert_eq!(timer.next_deadline(), deadline);
    }

    #[test]
    fn long_gap_runs_every_interval() {
        let mut rng = StdRng::seed_from_u64(21);
        let start = Instant::now();
        let mut timer = TrickleTimer::new(params(), start, &mut rng);

        timer.request_data();
        let due = timer.poll(start + Duration::from_secs(10), &mut rng);
        assert_eq!(due, Some(Transmission::Data));
        assert_eq!(timer.interval(), Duration::from_millis(800));
    }
}
