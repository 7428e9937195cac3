use clap::Parser;
use staplechecker::client::Target;
use staplechecker::config::Config;
use staplechecker::output::{self, OutputFormat};
use staplechecker::{check_host, HostReport, StapleValidator, TracingSink};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod metrics;

const DEFAULT_CONFIG_FILE: &str = "staplechecker.toml";

#[derive(Parser, Debug)]
#[command(name = "staplechecker", version, author, about, long_about = None)]
struct Cli {
    /// Hosts to check: host, host:port, tls://host:port or nats://host:port
    #[arg(short = 'H', long = "host", num_args = 1..)]
    hosts: Vec<String>,

    /// Output format: text, json or summary
    #[arg(short, long)]
    output: Option<String>,

    /// Exit code used when any staple is rejected
    #[arg(long)]
    exit_code: Option<i32>,

    /// Configuration file (defaults to ./staplechecker.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Reject staples outside their thisUpdate/nextUpdate window
    #[arg(long)]
    check_freshness: bool,

    /// Clock skew tolerated by --check-freshness, in seconds
    #[arg(long)]
    max_clock_skew: Option<u64>,

    /// CA certificate to verify servers against
    #[arg(long)]
    ca_file: Option<String>,

    /// TLS client certificate file
    #[arg(long)]
    client_cert: Option<String>,

    /// Private key file for the client certificate
    #[arg(long)]
    client_key: Option<String>,

    /// Push results to a Prometheus push gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus push gateway address
    #[arg(long)]
    prometheus_address: Option<String>,
}

impl Cli {
    fn as_config(&self) -> Config {
        Config {
            hosts: if self.hosts.is_empty() {
                None
            } else {
                Some(self.hosts.clone())
            },
            output: self.output.clone(),
            exit_code: self.exit_code,
            check_freshness: self.check_freshness.then_some(true),
            max_clock_skew_secs: self.max_clock_skew,
            ca_file: self.ca_file.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            prometheus: Some(staplechecker::config::PrometheusConfig {
                enabled: self.prometheus.then_some(true),
                address: self.prometheus_address.clone(),
            }),
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let file_config = match &cli.config {
        Some(path) => Config::from_file(path).map_err(|e| e.to_string())?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file(DEFAULT_CONFIG_FILE).map_err(|e| e.to_string())?
        }
        None => Config::empty(),
    };
    let config = Config::default()
        .merge_with(file_config)
        .merge_with(cli.as_config());
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            exit(2);
        }
    };
    let format = config
        .output
        .as_deref()
        .map(OutputFormat::from_str)
        .transpose()
        .unwrap_or_else(|_| {
            eprintln!("Unknown output format, expected text, json or summary");
            exit(2);
        })
        .unwrap_or(OutputFormat::Text);

    let mut targets = Vec::new();
    for host in config.hosts.clone().unwrap_or_default() {
        match Target::parse(&host) {
            Ok(target) => targets.push(target),
            Err(err) => {
                eprintln!("{}", err);
                exit(2);
            }
        }
    }

    let validator = Arc::new(StapleValidator::new(config.validator_options()));
    let client_options = config.client_options();
    let (sender, receiver): (Sender<HostReport>, Receiver<HostReport>) = mpsc::channel();
    let hosts_len = targets.len();
    for target in targets {
        let thread_tx = sender.clone();
        let validator = Arc::clone(&validator);
        let client_options = client_options.clone();
        thread::spawn(move || {
            info!(host = %target, "checking staple");
            let report = check_host(&target, &client_options, &validator, &TracingSink);
            if !report.accepted {
                warn!(host = %report.host, reason = ?report.reason, "staple rejected");
            }
            let _ = thread_tx.send(report);
        });
    }
    drop(sender);

    let mut reports: Vec<HostReport> = Vec::with_capacity(hosts_len);
    for report in receiver {
        reports.push(report);
    }
    reports.sort_by(|a, b| a.host.cmp(&b.host));

    print!("{}", output::render(format, &reports));

    if config.prometheus_enabled() {
        if let Some(address) = config.prometheus_address() {
            metrics::prom::prometheus_metrics(&reports, address);
        }
    }

    let rejected = reports.iter().any(|report| !report.accepted);
    if rejected {
        exit(config.exit_code.unwrap_or(1));
    }
    exit(0);
}
