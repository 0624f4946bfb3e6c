//! Threshold search over repeated probes of the parity solver.
use std::fmt;
use std::io::Write;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use super::mdp::ParityMDP;
use super::parity_solver::{ProbeOutcome, Synthesis};
use super::value_iteration::{ActionRecording, SolverConfig, SweepMode};
use crate::error::{RampsError, Result, SynthesisError};

pub const DEFAULT_SEGMENTS: &str = "b:0.01:0.05";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchSegment {
    /// Bisect `[min, max]` until it is narrower than `tolerance`.
    Binary { tolerance: f64, epsilon: f64 },
    /// Raise the floor by `step` until a probe fails.
    Incremental { step: f64, epsilon: f64 }
}

impl SearchSegment {
    pub fn epsilon(&self) -> f64 {
        match self {
            SearchSegment::Binary { epsilon, .. } => *epsilon,
            SearchSegment::Incremental { epsilon, .. } => *epsilon
        }
    }

    /// Parses a comma separated list of `b:<tolerance>:<epsilon>` and `i:<step>:<epsilon>` segments.
    pub fn parse_list(spec: &str) -> Result<Vec<SearchSegment>> {
        let re: Regex = Regex::new(r"^(?P<kind>[bi]):(?P<x>[^:]+):(?P<eps>[^:]+)$").expect("valid regex");
        let mut segments: Vec<SearchSegment> = Vec::new();
        for part in spec.split(',').map(|x| x.trim()) {
            let c = re.captures(part)
                .ok_or_else(|| RampsError::Usage(format!("bad search segment '{}', expected b:<tolerance>:<epsilon> or i:<step>:<epsilon>", part)))?;
            let x = positive(&c["x"], part)?;
            let epsilon = positive(&c["eps"], part)?;
            segments.push(match &c["kind"] {
                "b" => SearchSegment::Binary { tolerance: x, epsilon },
                _ => SearchSegment::Incremental { step: x, epsilon }
            });
        }
        Ok(segments)
    }
}

impl fmt::Display for SearchSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchSegment::Binary { tolerance, epsilon } => write!(f, "b:{}:{}", tolerance, epsilon),
            SearchSegment::Incremental { step, epsilon } => write!(f, "i:{}:{}", step, epsilon)
        }
    }
}

fn positive(s: &str, part: &str) -> Result<f64> {
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() && x > 0.0 => Ok(x),
        _ => Err(RampsError::Usage(format!("'{}' in search segment '{}' is not a positive number", s, part)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub segments: Vec<SearchSegment>,
    pub min_quality: f64,
    pub max_quality: f64,
    pub sweep: SweepMode,
    pub recording: ActionRecording
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            segments: vec![SearchSegment::Binary { tolerance: 0.01, epsilon: 0.05 }],
            min_quality: 0.0,
            max_quality: 1.0,
            sweep: SweepMode::DoubleBuffered,
            recording: ActionRecording::TwoPhase
        }
    }
}

impl SearchConfig {
    pub fn new(segments: Vec<SearchSegment>, min_quality: f64, max_quality: f64) -> Result<SearchConfig> {
        let in_range = |x: f64| (0.0..=1.0).contains(&x);
        if !in_range(min_quality) || !in_range(max_quality) {
            return Err(RampsError::Usage(format!("quality bounds must lie in [0,1], got {} and {}", min_quality, max_quality)));
        }
        if min_quality > max_quality {
            return Err(RampsError::Usage(format!("--min {} exceeds --max {}", min_quality, max_quality)));
        }
        if segments.is_empty() {
            return Err(RampsError::Usage("no search segments".to_string()));
        }
        Ok(SearchConfig {
            segments,
            min_quality,
            max_quality,
            ..SearchConfig::default()
        })
    }

    fn solver(&self, epsilon: f64) -> SolverConfig {
        SolverConfig {
            epsilon,
            sweep: self.sweep,
            recording: self.recording
        }
    }
}

/// One row of the probe history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Probe {
    pub segment: usize,
    pub threshold: f64,
    pub epsilon: f64,
    pub quality: f64,
    pub feasible: bool
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: Option<Synthesis>,
    pub probes: Vec<Probe>
}

impl SearchOutcome {
    pub fn quality(&self) -> Option<f64> {
        self.best.as_ref().map(|x| x.quality)
    }
}

struct Prober<'a> {
    pmdp: &'a ParityMDP,
    config: &'a SearchConfig,
    probes: Vec<Probe>
}

impl<'a> Prober<'a> {
    /// Returns the synthesis when it reaches `threshold`.
    fn probe(&mut self, segment: usize, threshold: f64, epsilon: f64) -> std::result::Result<Option<Synthesis>, SynthesisError> {
        let outcome = self.pmdp.compute_ra_policy(threshold, &self.config.solver(epsilon))?;
        let quality = outcome.quality();
        let result = match outcome {
            ProbeOutcome::Feasible(x) => Some(x),
            ProbeOutcome::Infeasible { .. } => None
        };
        debug!(segment, threshold, quality, feasible = result.is_some(), "probe");
        self.probes.push(Probe {
            segment,
            threshold,
            epsilon,
            quality,
            feasible: result.is_some()
        });
        Ok(result)
    }
}

/// Runs the configured segments in order and keeps the last strategy that met its probe.
pub fn search(pmdp: &ParityMDP, config: &SearchConfig) -> std::result::Result<SearchOutcome, SynthesisError> {
    let mut prober = Prober { pmdp, config, probes: Vec::new() };
    let mut min_quality = config.min_quality;
    let mut max_quality = config.max_quality;
    let mut best: Option<Synthesis> = None;
    for (k, segment) in config.segments.iter().enumerate() {
        info!(segment = %segment, min_quality, max_quality, "search segment");
        match *segment {
            SearchSegment::Binary { tolerance, epsilon } => {
                while max_quality - min_quality > tolerance {
                    let threshold = (min_quality + max_quality) / 2.0;
                    match prober.probe(k, threshold, epsilon)? {
                        Some(x) => {
                            min_quality = x.quality;
                            best = Some(x);
                        }
                        None => max_quality = threshold
                    }
                }
            }
            SearchSegment::Incremental { step, epsilon } => {
                let mut threshold = min_quality + step;
                while let Some(x) = prober.probe(k, threshold, epsilon)? {
                    min_quality = x.quality;
                    best = Some(x);
                    threshold = min_quality + step;
                }
            }
        }
    }
    Ok(SearchOutcome {
        best,
        probes: prober.probes
    })
}

/// Writes the probe history as CSV with a header row.
pub fn write_probes<W: Write>(probes: &[Probe], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for probe in probes.iter() {
        wtr.serialize(probe)?;
    }
    wtr.flush().map_err(|source| RampsError::Io { path: "probe history".to_string(), source })?;
    Ok(())
}
