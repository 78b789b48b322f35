//! Top-level control flow: select the probe, resolve its options, run
//! the check once and report.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::{ContextKind, ErrorKind};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, info, warn};

use checker_core::config::HEALTH_CHECKER_CONFIG;
use checker_core::{CheckResult, CheckerConfig, HEALTH_CHECKER_TYPE, ProbeError, ResolvedOptions};
use checker_probes::{HealthProbe, Probe, ProbeFactory};

/// Process name shown in usage text.
pub const BIN_NAME: &str = "health-checker";

/// Exit status for every failure.
const FAILURE_STATUS: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ParsingOptions,
    Checking,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            RunState::Succeeded => ExitCode::SUCCESS,
            _ => ExitCode::from(FAILURE_STATUS),
        }
    }
}

/// The environment inputs of one run, captured up front so the runner
/// never reads process state itself.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Raw `HEALTH_CHECKER_TYPE` value.
    pub probe_type: Option<String>,
    /// Path from `HEALTH_CHECKER_CONFIG`.
    pub config_path: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            probe_type: std::env::var(HEALTH_CHECKER_TYPE).ok(),
            config_path: std::env::var_os(HEALTH_CHECKER_CONFIG)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_type(probe_type: &str) -> Self {
        Self {
            probe_type: Some(probe_type.to_string()),
            config_path: None,
        }
    }

    pub fn with_config(mut self, path: &Path) -> Self {
        self.config_path = Some(path.to_path_buf());
        self
    }

    /// The captured value of one of the checker's environment variables.
    pub fn var(&self, key: &str) -> Option<String> {
        match key {
            HEALTH_CHECKER_TYPE => self.probe_type.clone(),
            HEALTH_CHECKER_CONFIG => self
                .config_path
                .as_ref()
                .map(|path| path.display().to_string()),
            _ => None,
        }
    }
}

/// Why a run stopped before reaching `Succeeded`.
enum Halt {
    /// `--help` or `--version` was requested; the text goes to stdout.
    Display(String),
    Failed(ProbeError),
}

impl From<ProbeError> for Halt {
    fn from(err: ProbeError) -> Self {
        Halt::Failed(err)
    }
}

pub struct Runner {
    environment: Environment,
    state: RunState,
}

impl Runner {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run once. `args` includes the program name. The rendered response
    /// goes to `out`; usage and diagnostics for a failure go to `err`.
    pub fn run<I, T>(&mut self, args: I, out: &mut dyn Write, err: &mut dyn Write) -> RunState
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.state = RunState::ParsingOptions;

        let config = match self.load_config() {
            Ok(config) => config,
            Err(e) => return self.fail(None, &e, err),
        };
        let probe = match self.select_probe(config.as_ref()) {
            Ok(probe) => probe,
            Err(e) => return self.fail(None, &e, err),
        };

        let options = match self.resolve_options(&probe, config.as_ref(), args) {
            Ok(options) => options,
            Err(Halt::Display(text)) => {
                if let Err(e) = write!(out, "{text}") {
                    warn!(error = %e, "failed to write help");
                }
                self.state = RunState::Succeeded;
                return self.state;
            }
            Err(Halt::Failed(e)) => return self.fail(Some(&probe), &e, err),
        };

        self.state = RunState::Checking;
        debug!(kind = ?probe.kind(), "running check");
        match probe.check(&options, out) {
            Ok(outcome) => {
                info!(matched = outcome.matched, "check succeeded");
                self.state = RunState::Succeeded;
                self.state
            }
            Err(e) => self.fail(Some(&probe), &e, err),
        }
    }

    fn load_config(&self) -> CheckResult<Option<CheckerConfig>> {
        match &self.environment.config_path {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                CheckerConfig::from_file(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// The environment type wins over the config file's `type`.
    fn select_probe(&self, config: Option<&CheckerConfig>) -> CheckResult<Probe> {
        let from_file = config.and_then(|c| c.probe_type.as_deref());
        ProbeFactory::create(|key| self.environment.var(key), from_file)
    }

    fn resolve_options<I, T>(
        &self,
        probe: &Probe,
        config: Option<&CheckerConfig>,
        args: I,
    ) -> Result<ResolvedOptions, Halt>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut options = ResolvedOptions::new(probe.parameters());
        if probe.is_default() {
            return Ok(options);
        }

        let matches = match command(probe).try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                return Err(Halt::Display(e.render().to_string()));
            }
            Err(e) => return Err(Halt::Failed(parse_failure(&e))),
        };

        supply_matches(&mut options, &matches);
        if let Some(config) = config {
            config.apply(&mut options)?;
        }
        Ok(options)
    }

    fn fail(&mut self, probe: Option<&Probe>, error: &ProbeError, err: &mut dyn Write) -> RunState {
        warn!(error = %error, "check failed");
        let usage = command_for(probe).render_help().to_string();
        if let Err(e) = write!(err, "{usage}").and_then(|()| writeln!(err, "{error}")) {
            warn!(error = %e, "failed to write diagnostics");
        }
        self.state = RunState::Failed;
        self.state
    }
}

/// The option parser for `probe`, one repeatable `Arg` per parameter.
/// Help is long-only: several probes use `-h` themselves.
pub fn command(probe: &Probe) -> Command {
    let mut command = Command::new(BIN_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about(probe))
        .disable_help_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .help("Print help")
                .action(ArgAction::Help),
        );
    for spec in probe.parameters() {
        command = command.arg(
            Arg::new(spec.long)
                .short(spec.short)
                .long(spec.long)
                .help(spec.help())
                .value_name("VALUE")
                .num_args(1)
                .allow_hyphen_values(true)
                .action(ArgAction::Append),
        );
    }
    command
}

fn command_for(probe: Option<&Probe>) -> Command {
    match probe {
        Some(probe) => command(probe),
        None => Command::new(BIN_NAME)
            .about(format!("Set {HEALTH_CHECKER_TYPE} to choose a probe"))
            .disable_help_flag(true),
    }
}

fn about(probe: &Probe) -> String {
    match probe.kind() {
        Some(kind) => format!("Single-shot {kind} health check"),
        None => format!("Set {HEALTH_CHECKER_TYPE} to choose a probe"),
    }
}

/// Map a command-line parse error onto the option it concerns.
fn parse_failure(error: &clap::Error) -> ProbeError {
    let context = |kind: ContextKind| error.get(kind).map(ToString::to_string).unwrap_or_default();
    let arg = context(ContextKind::InvalidArg);
    let option = arg
        .trim_start_matches('-')
        .split([' ', '='])
        .next()
        .unwrap_or_default()
        .to_string();
    ProbeError::InvalidOption {
        option,
        value: context(ContextKind::InvalidValue),
        reason: error.kind().as_str().unwrap_or("invalid arguments").to_string(),
    }
}

fn supply_matches(options: &mut ResolvedOptions, matches: &ArgMatches) {
    for spec in options.specs() {
        if let Some(values) = matches.get_many::<String>(spec.long) {
            for value in values {
                options.supply(spec.long, value.clone());
            }
        }
    }
}
