use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use range_probe::config::{ServerConfig, DEFAULT_PORT, DEFAULT_SECURE_PORT};
use range_probe::{logging, server};

#[derive(Parser, Debug)]
#[command(name = "range-server", about = "Serve a fixed document honouring byte ranges from headers and query params", version)]
struct Cli {
    /// http listening port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// https listening port
    #[arg(long = "secure-port", default_value_t = DEFAULT_SECURE_PORT)]
    secure_port: u16,

    /// path to tls cert file
    #[arg(long = "tls-cert-file", default_value = "")]
    cert_file: PathBuf,

    /// path to tls key file
    #[arg(long = "tls-key-file", default_value = "")]
    key_file: PathBuf,

    /// log verbosely
    #[arg(long)]
    verbose: bool,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            port: cli.port,
            secure_port: cli.secure_port,
            cert_file: cli.cert_file,
            key_file: cli.key_file,
            verbose: cli.verbose,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = ServerConfig::from(cli);
    config.validate()?;

    server::run(config).await.context("range-server failed")
}
