//! Stage tables and the desired-concurrency curve derived from them.
use crate::error::{ConfigError, StageParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A stage ramps the number of virtual users to `target` over `duration`.
///
/// A zero `duration` jumps to `target` instantly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration_str")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }

    /// Build a stage from a human readable duration such as `"5m"` or `"0s"`.
    pub fn parse(duration: &str, target: usize) -> Result<Self, StageParseError> {
        Ok(Self {
            duration: humantime::parse_duration(duration.trim())?,
            target,
        })
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    /// Parses `<duration>:<target>`, e.g. `5m:100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .rsplit_once(':')
            .ok_or_else(|| StageParseError::Format(s.to_string()))?;
        Stage::parse(duration, target.trim().parse()?)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

/// How the desired concurrency moves between two stage targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RampMode {
    /// Interpolate linearly from the previous target over the stage duration.
    #[default]
    Linear,
    /// Hold the stage target for the whole stage window.
    Hold,
}

/// Desired concurrency as a pure function of elapsed run time.
///
/// The level before the first stage is the first stage's target, so `desired_concurrency(0)`
/// is always the first target a run observes. A time exactly on a boundary belongs to the
/// stage starting there.
#[derive(Clone, Debug)]
pub struct StageSchedule {
    stages: Vec<Stage>,
    ramp: RampMode,
    total: Duration,
}

impl StageSchedule {
    pub fn new(stages: Vec<Stage>, ramp: RampMode) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        let total = stages.iter().map(|s| s.duration).sum();
        Ok(Self {
            stages,
            ramp,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn ramp(&self) -> RampMode {
        self.ramp
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.total
    }

    /// Largest target across the table.
    pub fn peak(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn desired_concurrency(&self, elapsed: Duration) -> usize {
        let mut previous = self.stages[0].target;
        let mut start = Duration::ZERO;

        for stage in &self.stages {
            let end = start + stage.duration;
            // Zero length windows are never entered; they only move `previous`.
            if elapsed < end {
                return match self.ramp {
                    RampMode::Hold => stage.target,
                    RampMode::Linear => {
                        let progress =
                            (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                        interpolate(previous, stage.target, progress)
                    }
                };
            }
            previous = stage.target;
            start = end;
        }

        previous
    }

    /// The first stage boundary strictly after `elapsed`, if any remain.
    pub fn next_boundary(&self, elapsed: Duration) -> Option<Duration> {
        self.stages
            .iter()
            .scan(Duration::ZERO, |end, stage| {
                *end += stage.duration;
                Some(*end)
            })
            .find(|end| *end > elapsed)
    }
}

fn interpolate(from: usize, to: usize, progress: f64) -> usize {
    let progress = progress.clamp(0., 1.);
    let value = from as f64 + (to as f64 - from as f64) * progress;
    value.round().max(0.) as usize
}

pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
