use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use range_probe::config::{ClientConfig, ProbeMode};
use range_probe::error::ConfigError;
use range_probe::logging;
use range_probe::probe::ProbeHarness;

#[derive(Parser, Debug)]
#[command(name = "range-probe", about = "Check that byte-range requests survive the path to a range-server", version)]
struct Cli {
    /// host of server
    #[arg(long, default_value = "")]
    host: String,

    /// port of server
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// header used for request, ie 'Range: bytes=0-100'
    #[arg(long)]
    header: Option<String>,

    /// url encoded query params used for request, ie 'range=bytes%3D0%2D100'
    #[arg(long)]
    params: Option<String>,

    /// request all contents
    #[arg(long)]
    all: bool,

    /// log verbosely
    #[arg(long)]
    verbose: bool,

    /// use http2
    #[arg(long)]
    http2: bool,

    /// tls skip verify
    #[arg(long = "tls-skip-verify")]
    tls_skip_verify: bool,

    /// path to tls cert file
    #[arg(long = "tls-cert-file")]
    cert_file: Option<PathBuf>,

    /// path to tls key file
    #[arg(long = "tls-key-file")]
    key_file: Option<PathBuf>,
}

impl TryFrom<Cli> for ClientConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, ConfigError> {
        let mode = match (cli.header, cli.params, cli.all) {
            (Some(header), None, false) => ProbeMode::Header(header),
            (None, Some(params), false) => ProbeMode::Params(params),
            (None, None, true) => ProbeMode::All,
            (None, None, false) => ProbeMode::Battery,
            _ => return Err(ConfigError::ConflictingModes),
        };

        Ok(ClientConfig {
            host: cli.host,
            port: cli.port,
            http2: cli.http2,
            tls_skip_verify: cli.tls_skip_verify,
            cert_file: cli.cert_file,
            key_file: cli.key_file,
            mode,
            verbose: cli.verbose,
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = ClientConfig::try_from(cli)?;
    config.validate()?;

    let transport = config.transport().build().context("failed to set up transport")?;
    let harness = ProbeHarness::new(transport, config.verbose);
    let report = harness.run(&config.mode).await?;

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
