//! Virtual clock (§4.1). A monotonic simulated-time source with an explicit init/step lifecycle.
//!
//! The source treats this as a process-wide singleton; per [`crate::sim::SimContext`] (§9 Design
//! Notes), this implementation instead hands out an explicit handle that every agent and
//! subcomponent receives at construction, so multiple independent simulations (e.g. in tests) can
//! coexist in one process.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The time unit every timestamp in a given simulation run is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    /// Julian days, via [`hifitime::Epoch`].
    JulianDate,
    /// Plain seconds since an arbitrary epoch.
    Seconds,
    /// No calendar semantics at all; just a dimensionless counter.
    Arbitrary,
}

#[derive(Debug, Clone, Copy)]
enum ClockState {
    Uninitialised,
    Initialised {
        t0: f64,
        now: f64,
        dt: f64,
        duration: f64,
    },
}

/// Monotonic simulated-time source. All arithmetic on timestamps is direct subtraction in the
/// configured [`TimeType`]'s unit.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    state: ClockState,
    time_type: TimeType,
}

impl VirtualClock {
    /// An uninitialised clock; call [`VirtualClock::init`] before using `now`/`step`.
    pub fn new(time_type: TimeType) -> Self {
        VirtualClock {
            state: ClockState::Uninitialised,
            time_type,
        }
    }

    /// Initialises the clock at `t0`, with step `dt` and total `duration`, all in the clock's
    /// configured time unit.
    pub fn init(&mut self, t0: f64, dt: f64, duration: f64) {
        self.state = ClockState::Initialised {
            t0,
            now: t0,
            dt,
            duration,
        };
    }

    pub fn time_type(&self) -> TimeType {
        self.time_type
    }

    /// Current virtual time. Panics if the clock has not been initialised: reading the clock
    /// before `init` is a programming error, not a recoverable condition.
    pub fn now(&self) -> f64 {
        match self.state {
            ClockState::Initialised { now, .. } => now,
            ClockState::Uninitialised => panic!("VirtualClock::now() called before init()"),
        }
    }

    pub fn dt(&self) -> f64 {
        match self.state {
            ClockState::Initialised { dt, .. } => dt,
            ClockState::Uninitialised => panic!("VirtualClock::dt() called before init()"),
        }
    }

    pub fn t0(&self) -> f64 {
        match self.state {
            ClockState::Initialised { t0, .. } => t0,
            ClockState::Uninitialised => panic!("VirtualClock::t0() called before init()"),
        }
    }

    /// Advances virtual time by `dt`. Returns the new `now()`.
    pub fn step(&mut self) -> f64 {
        match &mut self.state {
            ClockState::Initialised { now, dt, .. } => {
                *now += *dt;
                *now
            }
            ClockState::Uninitialised => panic!("VirtualClock::step() called before init()"),
        }
    }

    /// True once the elapsed virtual time exceeds the configured duration.
    pub fn finished(&self) -> bool {
        match self.state {
            ClockState::Initialised { t0, now, duration, .. } => now - t0 >= duration,
            ClockState::Uninitialised => false,
        }
    }

    /// Formats a timestamp. `absolute` renders `t0 + t` rather than the bare elapsed value (only
    /// meaningful for [`TimeType::JulianDate`]/[`TimeType::Seconds`]); `simple` drops sub-second
    /// precision and calendar decoration in favour of a compact numeric form.
    pub fn to_string(&self, t: f64, absolute: bool, simple: bool) -> String {
        let t0 = match self.state {
            ClockState::Initialised { t0, .. } => t0,
            ClockState::Uninitialised => 0.0,
        };
        let value = if absolute { t0 + t } else { t };
        match self.time_type {
            TimeType::JulianDate => {
                if simple {
                    format!("{value:.3} JD")
                } else {
                    let epoch = hifitime::Epoch::from_jde_utc(value);
                    format!("{epoch}")
                }
            }
            TimeType::Seconds => {
                if simple {
                    format!("{value:.0}s")
                } else {
                    humantime::format_duration(std::time::Duration::from_secs_f64(value.max(0.0)))
                        .to_string()
                }
            }
            TimeType::Arbitrary => format!("{value:.3}"),
        }
    }
}

impl fmt::Display for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ClockState::Initialised { now, .. } => write!(f, "{}", self.to_string(now, false, true)),
            ClockState::Uninitialised => write!(f, "<uninitialised clock>"),
        }
    }
}
