use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use autoinvest::clock::{Clock, SystemClock};
use autoinvest::config::{default_config_path, ResolvedConfig};
use autoinvest::credentials::Secrets;
use autoinvest::exchange_rate::{KoreaEximRateSource, RateResolver};
use autoinvest::pipeline::{ReportDeriver, Savings};
use autoinvest::present::render_report;
use autoinvest::report::{load_report, write_report, Currency};
use autoinvest::sources::build_registry;
use clap::{ArgGroup, Parser};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "autoinvest", version)]
#[command(about = "Derive this period's investment plan from the last report")]
#[command(group(
    ArgGroup::new("sink")
        .required(true)
        .multiple(true)
        .args(["output", "print_report"])
))]
struct Cli {
    /// Path to config file (default: ./autoinvest.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Report the new one is derived from
    #[arg(short, long)]
    reference: PathBuf,

    /// Where to write the new report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the reference and the new report as tables
    #[arg(short, long)]
    print_report: bool,

    /// This period's saving in the secondary currency (KRW)
    #[arg(long, default_value_t = 0.0)]
    saving_secondary: f64,

    /// This period's saving in the base currency (USD)
    #[arg(long, default_value_t = 0.0)]
    saving_base: f64,
}

fn init_tracing(level: tracing::Level, json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let plain = (!json).then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let structured = json.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.log_json);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let resolved = ResolvedConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load autoinvest config: {}", config_path.display()))?;
    let config = &resolved.config;

    let reference = load_report(&cli.reference)?;
    let secrets = Secrets::load(&resolved.secrets_path)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let rate_source = KoreaEximRateSource::with_client(
        config.http.build_client()?,
        secrets.exchange_rate()?,
    )
    .with_base_url(config.exchange_rate.base_url.clone())
    .with_data_code(config.exchange_rate.data_code.clone());
    let resolver = RateResolver::new(
        Arc::new(rate_source),
        clock.clone(),
        config.exchange_rate.max_lookback_days,
    );
    let rate = resolver
        .resolve(Currency::BASE)
        .await
        .context("Failed to resolve exchange rate")?;

    let registry = build_registry(config, &secrets, clock, &reference)?;
    let savings = Savings::new(cli.saving_secondary, cli.saving_base);
    let next = ReportDeriver::new(registry)
        .derive(&reference, savings, rate.rate)
        .await?;

    if let Some(output) = &cli.output {
        write_report(output, &next)?;
    }

    if cli.print_report {
        println!("Reference: {}", cli.reference.display());
        println!("{}", render_report(&reference, &config.display));
        println!("New report (rate of {}):", rate.date);
        println!("{}", render_report(&next, &config.display));
    }

    info!(
        saving = ?next.saving,
        total_appraisement = ?next.total_appraisement,
        "Done"
    );
    Ok(())
}
