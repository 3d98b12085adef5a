//! rapply - remote apply
//!
//! Converges one or more remote targets against a local policy archive:
//! connects to each target, makes sure a compatible configuration agent is
//! installed, uploads the archive and runs the agent against it.

#![forbid(unsafe_code)]

mod ui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use rapply_common::{
    ApplyConfig, ApplyError, LogConfig, LogFormat, PipelineOptions, Protocol, TargetSpec,
    init_logging,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Every target converged.
const EXIT_SUCCESS: u8 = 0;
/// At least one target failed to connect, install or converge.
const EXIT_RUN_FAILED: u8 = 1;
/// Bad input, configuration problems or an internal failure.
const EXIT_UNEXPECTED: u8 = 32;

#[derive(Parser, Debug)]
#[command(name = "rapply")]
#[command(author, version, about = "Converge remote targets against a local policy archive")]
struct Cli {
    /// Comma-separated targets: [ssh|winrm://][user@]host[:port]
    targets: String,

    /// Policy archive to upload and apply
    archive: PathBuf,

    /// Protocol for targets that do not name one
    #[arg(long)]
    protocol: Option<Protocol>,

    /// User for targets that do not name one
    #[arg(short, long)]
    user: Option<String>,

    /// Port for targets that do not name one
    #[arg(short, long)]
    port: Option<u16>,

    /// Private key used for authentication
    #[arg(short = 'i', long)]
    identity_file: Option<PathBuf>,

    /// Run remote commands through sudo
    #[arg(long, overrides_with = "no_sudo")]
    sudo: bool,

    /// Never use sudo
    #[arg(long)]
    no_sudo: bool,

    /// Privilege escalation command used instead of `sudo`
    #[arg(long)]
    sudo_command: Option<String>,

    /// Password fed to sudo on stdin
    #[arg(long, env = "RAPPLY_SUDO_PASSWORD", hide_env_values = true)]
    sudo_password: Option<String>,

    /// Install or upgrade the agent when needed (default)
    #[arg(long, overrides_with = "no_install")]
    install: bool,

    /// Fail instead of installing a missing or outdated agent
    #[arg(long)]
    no_install: bool,

    /// Configuration file (default: ~/.rapply/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn sudo(&self, config: &ApplyConfig) -> bool {
        if self.no_sudo {
            false
        } else {
            self.sudo || config.connection.sudo
        }
    }

    fn install(&self) -> bool {
        self.install || !self.no_install
    }

    /// Resolve the target list, filling gaps from flags then config.
    fn target_specs(&self, config: &ApplyConfig) -> Result<Vec<TargetSpec>> {
        let protocol = self.protocol.unwrap_or(config.connection.default_protocol);
        let mut specs = TargetSpec::parse_list(&self.targets, protocol)
            .map_err(anyhow::Error::msg)
            .context("invalid target list")?;
        if specs.is_empty() {
            bail!("no targets given");
        }

        let user = self
            .user
            .clone()
            .or_else(|| config.connection.default_user.clone());
        let sudo_command = self
            .sudo_command
            .clone()
            .or_else(|| config.connection.sudo_command.clone());
        for spec in &mut specs {
            if spec.user.is_none() {
                spec.user = user.clone();
            }
            if spec.port.is_none() {
                spec.port = self.port;
            }
            spec.identity_file = self.identity_file.clone();
            spec.sudo = self.sudo(config);
            spec.sudo_command = sudo_command.clone();
            spec.sudo_password = self.sudo_password.clone();
        }
        Ok(specs)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            ExitCode::from(EXIT_UNEXPECTED)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = ApplyConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let mut log_config = LogConfig::from_env(&config.log.level)
        .with_stderr()
        .with_file(&config.log.location);
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.log_json {
        log_config = log_config.with_format(LogFormat::Json);
    }
    let _logging_guards = init_logging(&log_config)?;

    if !cli.archive.is_file() {
        bail!("policy archive {} does not exist", cli.archive.display());
    }
    let specs = cli.target_specs(&config)?;
    info!(targets = specs.len(), archive = %cli.archive.display(), "Starting run");

    let options = PipelineOptions::new(&cli.archive).with_install(cli.install());
    converge(specs, config, options, cli.log_json).await
}

#[cfg(unix)]
async fn converge(
    specs: Vec<TargetSpec>,
    config: ApplyConfig,
    options: PipelineOptions,
    quiet: bool,
) -> Result<u8> {
    use rapply_common::{OmnitruckSource, Reporter, SshOptions, SshTransport, converge_targets};
    use std::time::Duration;

    let ssh_options = SshOptions {
        connect_timeout: Duration::from_secs(config.connection.connect_timeout_secs),
        ..SshOptions::default()
    };
    let source = Arc::new(OmnitruckSource::new(&config.cache.path));
    let ui = ui::TerminalUi::new(quiet);

    let result = converge_targets(
        specs,
        Arc::new(config),
        source,
        Arc::new(options),
        |spec: &TargetSpec| SshTransport::new(spec.clone(), ssh_options.clone()),
        |spec: &TargetSpec| -> Arc<dyn Reporter> { Arc::new(ui.reporter(&spec.host)) },
    )
    .await;

    match result {
        Ok(outcomes) => {
            for outcome in &outcomes {
                let elapsed = outcome.finished_at - outcome.started_at;
                debug!(
                    prefix = %outcome.prefix,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "Target finished"
                );
            }
            println!(
                "{} {} target(s) converged",
                style("✔").green(),
                outcomes.len()
            );
            Ok(EXIT_SUCCESS)
        }
        Err(err @ ApplyError::JobPanicked { .. }) => Err(err.into()),
        Err(err) => {
            report_failure(&err);
            Ok(EXIT_RUN_FAILED)
        }
    }
}

#[cfg(not(unix))]
async fn converge(
    _specs: Vec<TargetSpec>,
    _config: ApplyConfig,
    _options: PipelineOptions,
    _quiet: bool,
) -> Result<u8> {
    bail!("the bundled ssh transport needs a unix host")
}

fn report_failure(err: &ApplyError) {
    eprintln!("{} {err}", style("error:").red().bold());
    if let Some(details) = failure_details(err) {
        eprint!("{details}");
    }
}

/// Catalog text with remediation steps. Aggregated failures already list
/// each target's code.
fn failure_details(err: &ApplyError) -> Option<String> {
    match err {
        ApplyError::MultiJobFailure(_) => None,
        _ => Some(format!("\n{}", err.entry().format_full())),
    }
}
