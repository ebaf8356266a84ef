use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use skein_analyzer::{
    Analysis, AnalyzerConfig, CancelFlag, CancelReason, analyze, spawn_memory_supervisor,
};
use skein_core::{Finding, FindingKind, Severity, Trace};
use skein_fuzzer::{FuzzSession, FuzzerConfig, FuzzingMode};
use tracing::{error, info, warn};

use crate::{
    logging::{self, target},
    output,
    runtime::{ProcessRuntime, ReplayOutcome, RuntimeDriver, RuntimeError},
    stats::SessionStats,
};

mod errors;
pub use errors::{CliError, exit_code};

/// Default trace file name inside the working directory.
const DEFAULT_TRACE_NAME: &str = "skein.trace";

/// Default memory budget for the supervisor, in megabytes.
const DEFAULT_MEMORY_LIMIT_MB: u64 = 8192;

// FLAGS
// ================================================================================================

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    Record,
    #[default]
    Analyze,
    Fuzz,
}

/// Offline concurrency-bug analyzer and guided fuzzer for CSP-style traces.
#[derive(Debug, Parser)]
#[command(name = "skein", version, about)]
pub struct Cli {
    /// Working directory holding traces and results.
    #[arg(long)]
    pub path: Option<PathBuf>,
    /// Program under test, handed to the recording runtime.
    #[arg(long)]
    pub prog: Option<PathBuf>,
    /// Executable or test name inside the program under test.
    #[arg(long)]
    pub exec: Option<String>,
    /// An already recorded trace file.
    #[arg(long)]
    pub trace: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Mode::Analyze)]
    pub mode: Mode,
    /// Mutation family: GFuzz, Flow, GoPie, GoCR, or GoPieHB.
    #[arg(long = "fuzzingMode", default_value = "GFuzz")]
    pub fuzzing_mode: String,
    /// Recording timeout, seconds.
    #[arg(long = "timeoutRec", default_value_t = 600)]
    pub timeout_rec: u64,
    /// Replay timeout, seconds.
    #[arg(long = "timeoutRep", default_value_t = 900)]
    pub timeout_rep: u64,
    /// Whole-session fuzzing timeout, seconds.
    #[arg(long = "timeoutFuz", default_value_t = 7200)]
    pub timeout_fuz: u64,
    #[arg(long = "maxFuzzingRuns", default_value_t = 100)]
    pub max_fuzzing_runs: usize,
    /// Skip atomic events entirely.
    #[arg(long = "ignoreAtomics")]
    pub ignore_atomics: bool,
    /// Keep intermediate trace files instead of deleting them.
    #[arg(long = "keepTrace")]
    pub keep_trace: bool,
    /// Write session statistics as JSON next to the results.
    #[arg(long)]
    pub stats: bool,
    #[arg(long = "noWarning")]
    pub no_warning: bool,
    #[arg(long = "noInfo")]
    pub no_info: bool,
    #[arg(long = "noProgress")]
    pub no_progress: bool,
    /// Output directory for result files; defaults to the working directory.
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Treat recovered scenario-check panics as fatal.
    #[arg(long)]
    pub panic: bool,
    #[arg(long = "cancelTestIfBugFound")]
    pub cancel_test_if_bug_found: bool,
    /// Abort the analysis after this many events.
    #[arg(long = "maxNumberElements")]
    pub max_number_elements: Option<usize>,
    /// Length of fuzzing schedule chains.
    #[arg(long = "scSize", default_value_t = 6)]
    pub sc_size: usize,
    #[arg(long = "sameElemTypeInSC")]
    pub same_elem_type_in_sc: bool,
    /// Emit replay directives without invoking the runtime.
    #[arg(long = "fuzzingWithoutReplay")]
    pub fuzzing_without_replay: bool,
    #[arg(long = "finishIfBugFound")]
    pub finish_if_bug_found: bool,
    /// JSON settings file; explicit flags win over its values.
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

// SETTINGS FILE
// ================================================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct Settings {
    analyzer: AnalyzerConfig,
    fuzzer: FuzzerConfig,
    memory_limit_mb: Option<u64>,
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let Some(path) = path else { return Ok(Self::default()) };
        let text = fs::read_to_string(path)
            .map_err(|err| CliError::io("cannot read settings file", err))?;
        serde_json::from_str(&text)
            .map_err(|err| CliError::Config(format!("malformed settings file: {err}")))
    }
}

// ENTRY POINT
// ================================================================================================

impl Cli {
    pub fn run(self) -> Result<(), CliError> {
        logging::init(self.no_info, self.no_progress);
        let settings = Settings::load(self.settings.as_deref())?;

        let cancel = CancelFlag::new();
        let limit = settings.memory_limit_mb.unwrap_or(DEFAULT_MEMORY_LIMIT_MB) * 1024 * 1024;
        spawn_memory_supervisor(cancel.clone(), limit, Duration::from_millis(200));

        match self.mode {
            Mode::Analyze => self.run_analyze(settings, &cancel),
            Mode::Record => self.run_record(),
            Mode::Fuzz => self.run_fuzz(settings, &cancel),
        }
    }

    // CONFIG ASSEMBLY
    // --------------------------------------------------------------------------------------------

    fn analyzer_config(&self, settings: &Settings) -> AnalyzerConfig {
        let mut cfg = settings.analyzer.clone();
        cfg.ignore_atomics |= self.ignore_atomics;
        if self.max_number_elements.is_some() {
            cfg.max_events = self.max_number_elements;
        }
        cfg
    }

    fn fuzzer_config(&self, settings: &Settings) -> Result<FuzzerConfig, CliError> {
        let mut cfg = settings.fuzzer.clone();
        cfg.mode = FuzzingMode::from_flag(&self.fuzzing_mode).ok_or_else(|| {
            CliError::Config(format!("unknown fuzzing mode '{}'", self.fuzzing_mode))
        })?;
        cfg.max_runs = self.max_fuzzing_runs;
        cfg.chain_length = self.sc_size;
        cfg.same_type_in_chain_only |= self.same_elem_type_in_sc;
        cfg.cancel_on_first_bug |= self.cancel_test_if_bug_found;
        Ok(cfg)
    }

    fn workdir(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    fn trace_path(&self) -> PathBuf {
        self.trace.clone().unwrap_or_else(|| self.workdir().join(DEFAULT_TRACE_NAME))
    }

    fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| self.workdir())
    }

    fn min_severity(&self) -> Severity {
        if self.no_warning {
            Severity::Critical
        } else if self.no_info {
            Severity::Warning
        } else {
            Severity::Information
        }
    }

    // ANALYZE
    // --------------------------------------------------------------------------------------------

    fn run_analyze(&self, settings: Settings, cancel: &CancelFlag) -> Result<(), CliError> {
        let mut stats = SessionStats::default();
        let (_, analysis) = self.analyze_trace_file(&self.trace_path(), &settings, cancel)?;
        stats.record_run(analysis.findings.len());
        self.finish(&analysis.findings, stats, analysis.cancelled)
    }

    /// Parses and analyzes a trace file; the returned trace carries the assigned clocks the
    /// fuzzer's planning needs.
    fn analyze_trace_file(
        &self,
        trace_path: &Path,
        settings: &Settings,
        cancel: &CancelFlag,
    ) -> Result<(Trace, Analysis), CliError> {
        let text = fs::read_to_string(trace_path).map_err(|err| {
            CliError::io(format!("cannot read trace '{}'", trace_path.display()), err)
        })?;
        let mut trace = Trace::parse(&trace_path.display().to_string(), &text)?;
        info!(
            target: target::PROGRESS,
            routines = trace.num_routines(),
            events = trace.num_events(),
            "trace loaded"
        );
        let analysis = analyze(&mut trace, &self.analyzer_config(settings), cancel)?;
        info!(
            target: target::PROGRESS,
            events = analysis.events_processed,
            findings = analysis.findings.len(),
            "analysis finished"
        );
        Ok((trace, analysis))
    }

    // RECORD
    // --------------------------------------------------------------------------------------------

    fn run_record(&self) -> Result<(), CliError> {
        let runtime = ProcessRuntime::from_env().map_err(runtime_unavailable)?;
        let prog = self.prog.clone().ok_or_else(|| {
            CliError::Usage("record mode needs --prog pointing at the program under test".into())
        })?;
        runtime
            .record(
                &prog,
                self.exec.as_deref(),
                &self.trace_path(),
                Duration::from_secs(self.timeout_rec),
            )
            .map_err(record_error)?;
        info!(target: target::RESULT, trace = %self.trace_path().display(), "trace recorded");
        Ok(())
    }

    // FUZZ
    // --------------------------------------------------------------------------------------------

    fn run_fuzz(&self, settings: Settings, cancel: &CancelFlag) -> Result<(), CliError> {
        let fuzz_cfg = self.fuzzer_config(&settings)?;
        let mut session = FuzzSession::new(fuzz_cfg);
        let mut stats = SessionStats::default();
        let mut all_findings: Vec<Finding> = Vec::new();
        let mut cancelled = None;
        let output_dir = self.output_dir();
        let trace_path = self.trace_path();

        let runtime = if self.fuzzing_without_replay {
            None
        } else {
            Some(ProcessRuntime::from_env().map_err(runtime_unavailable)?)
        };

        let mut replay_counter = 0usize;
        let deadline = Instant::now() + Duration::from_secs(self.timeout_fuz);
        'session: while !session.exhausted() {
            if Instant::now() >= deadline {
                warn!(target: target::TIMEOUT, "fuzzing session timed out");
                stats.timeouts += 1;
                break;
            }
            let (trace, analysis) = match self.analyze_trace_file(&trace_path, &settings, cancel) {
                Ok(outcome) => outcome,
                Err(CliError::Trace(err)) => {
                    // a broken trace aborts only this run, not the whole invocation
                    warn!(target: target::ERROR, error = %err, "trace rejected, ending session");
                    stats.errors += 1;
                    break;
                },
                Err(other) => return Err(other),
            };
            stats.record_run(analysis.findings.len());
            cancelled = cancelled.or(analysis.cancelled);
            let found_bug = analysis.has_bug();
            all_findings.extend(analysis.findings);

            if cancelled.is_some() {
                break;
            }
            if found_bug && (self.finish_if_bug_found || self.cancel_test_if_bug_found) {
                info!(target: target::IMPORTANT, "bug found, finishing session");
                break;
            }

            let plan = session.plan(&trace);
            if plan.runs.is_empty() {
                info!(target: target::PROGRESS, "no unexplored mutations remain");
                break;
            }
            for run in &plan.runs {
                replay_counter += 1;
                let directives = output_dir.join(format!("replay_{replay_counter}.txt"));
                fs::create_dir_all(&output_dir)
                    .map_err(|err| CliError::io("cannot create output directory", err))?;
                fs::write(&directives, run.replay_directives(&trace, 0))
                    .map_err(|err| CliError::io("cannot write replay directives", err))?;

                let Some(runtime) = &runtime else { continue };
                let Some(prog) = &self.prog else {
                    return Err(CliError::Usage(
                        "fuzz mode with replay needs --prog; use --fuzzingWithoutReplay otherwise"
                            .into(),
                    ));
                };
                match runtime.replay(prog, &directives, Duration::from_secs(self.timeout_rep)) {
                    Ok(ReplayOutcome::BugConfirmed) => {
                        stats.confirmed += 1;
                        info!(target: target::IMPORTANT, run = replay_counter, "bug confirmed");
                        if session.cfg().cancel_on_first_bug {
                            break 'session;
                        }
                    },
                    Ok(ReplayOutcome::Clean) => (),
                    Err(RuntimeError::Timeout(t)) => {
                        warn!(target: target::TIMEOUT, run = replay_counter, timeout = ?t, "replay timed out");
                        stats.timeouts += 1;
                    },
                    Err(err) => {
                        error!(target: target::ERROR, run = replay_counter, error = %err, "replay failed");
                        stats.errors += 1;
                    },
                }
                if !self.keep_trace {
                    let _ = fs::remove_file(&directives);
                }
            }

            if runtime.is_none() {
                // without re-execution there is nothing new to analyze
                break;
            }
        }

        self.finish(&all_findings, stats, cancelled)
    }

    // COMPLETION
    // --------------------------------------------------------------------------------------------

    fn finish(
        &self,
        findings: &[Finding],
        stats: SessionStats,
        cancelled: Option<CancelReason>,
    ) -> Result<(), CliError> {
        let output_dir = self.output_dir();
        let (machine, readable) = output::write_results(&output_dir, findings, self.min_severity())
            .map_err(|err| CliError::io("cannot write result files", err))?;
        info!(
            target: target::RESULT,
            machine = %machine.display(),
            readable = %readable.display(),
            "results written"
        );
        if self.stats {
            let stats_path = output_dir.join("stats.json");
            stats
                .write_json(&stats_path)
                .map_err(|err| CliError::io("cannot write statistics", err))?;
        }
        stats.log_summary();

        if self.panic
            && findings.iter().any(|finding| finding.kind == FindingKind::ScenarioInternal)
        {
            return Err(CliError::Internal(
                "a scenario check panicked and --panic treats that as fatal".into(),
            ));
        }
        match cancelled {
            Some(CancelReason::OutOfMemory) => Err(CliError::OutOfMemory),
            _ => Ok(()),
        }
    }
}

fn runtime_unavailable(err: RuntimeError) -> CliError {
    CliError::Config(err.to_string())
}

fn record_error(err: RuntimeError) -> CliError {
    match err {
        RuntimeError::Timeout(t) => CliError::Config(format!("recording timed out after {t:?}")),
        other => CliError::Config(other.to_string()),
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn flag_surface_parses() {
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from([
            "skein",
            "--mode",
            "analyze",
            "--trace",
            "t.log",
            "--fuzzingMode",
            "GoPie",
            "--maxFuzzingRuns",
            "7",
            "--noWarning",
            "--scSize",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Analyze);
        assert_eq!(cli.max_fuzzing_runs, 7);
        assert_eq!(cli.sc_size, 4);
        assert!(cli.no_warning);
    }

    #[test]
    fn unknown_fuzzing_mode_is_a_config_error() {
        let cli = Cli::try_parse_from(["skein", "--fuzzingMode", "Nope"]).unwrap();
        let err = cli.fuzzer_config(&Settings::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
