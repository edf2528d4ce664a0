//! Command line shared by the `user` and `stress` binaries.
use crate::Target;
use anyhow::Context;
use clap::Parser;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use volley::core::{ConfigError, RunReport, Stage, StageParseError, CONFIG_ERROR_EXIT_CODE};
use volley::prelude::*;

/// Built-in stage table, thresholds and target of a scenario.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub base_url: &'static str,
    pub stages: &'static [&'static str],
    pub thresholds: &'static [(&'static str, &'static str)],
}

impl Defaults {
    pub fn stages(&self) -> Result<Vec<Stage>, StageParseError> {
        self.stages.iter().map(|s| s.parse()).collect()
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Run a staged load test against the user/stress service")]
pub struct Args {
    /// Base URL of the service under test
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// `<duration>:<target>`, repeatable; replaces the built-in stage table
    #[arg(long = "stage", value_name = "DURATION:TARGET")]
    pub stages: Vec<Stage>,

    /// `<metric>=<expression>`, repeatable; replaces the built-in thresholds
    #[arg(long = "threshold", value_name = "METRIC=EXPR", value_parser = parse_threshold)]
    pub thresholds: Vec<(String, String)>,

    /// Jump to each stage's target at its start instead of ramping linearly
    #[arg(long)]
    pub hold: bool,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub tick: Option<Duration>,

    /// How long stopping users may take to finish their iteration
    #[arg(long, value_parser = humantime::parse_duration)]
    pub grace: Option<Duration>,

    /// Cap on requests per second across all users
    #[arg(long)]
    pub max_rps: Option<NonZeroU32>,

    /// Also write the report as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,
}

fn parse_threshold(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((metric, expr)) if !metric.trim().is_empty() && !expr.trim().is_empty() => {
            Ok((metric.trim().to_string(), expr.trim().to_string()))
        }
        _ => Err(format!("expected <metric>=<expression>, got `{s}`")),
    }
}

impl Args {
    pub fn target(&self, defaults: &Defaults) -> Target {
        Target::new(self.base_url.as_deref().unwrap_or(defaults.base_url))
    }

    /// Apply the command line, falling back to `defaults` where nothing was given.
    pub fn configure<S, T>(&self, scenario: S, defaults: &Defaults) -> anyhow::Result<S>
    where
        S: ConfigurableScenario<T>,
        T: Send,
    {
        let stages = if self.stages.is_empty() {
            defaults.stages().context("built-in stage table")?
        } else {
            self.stages.clone()
        };
        let mut scenario = scenario.stages(stages);

        if self.thresholds.is_empty() {
            for (metric, expr) in defaults.thresholds {
                scenario = scenario.threshold(metric, expr);
            }
        } else {
            for (metric, expr) in &self.thresholds {
                scenario = scenario.threshold(metric, expr);
            }
        }

        if self.hold {
            scenario = scenario.ramp(RampMode::Hold);
        }
        if let Some(tick) = self.tick {
            scenario = scenario.tick(tick);
        }
        if let Some(grace) = self.grace {
            scenario = scenario.grace(grace);
        }
        if let Some(rps) = self.max_rps {
            scenario = scenario.max_rps(rps);
        }
        Ok(scenario)
    }
}

pub fn init_tracing() {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("volley=info,demos=info")),
        )
        .init();
}

/// Print the report, optionally persist it, and map it to the process exit code.
pub fn finish(
    result: Result<RunReport, ConfigError>,
    json: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!("Refusing to run: {err}");
            return Ok(ExitCode::from(CONFIG_ERROR_EXIT_CODE));
        }
    };

    println!("{report}");
    if let Some(path) = json {
        let bytes = serde_json::to_vec_pretty(&report)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok((&report).into())
}
