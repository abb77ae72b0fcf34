use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use txflood::{AuditConfig, Cli, Command, LoadTestConfig, LogFormat, TargetConfig};

fn init_logging(log_format: LogFormat, log_level: Level) {
    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    match log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // TXFLOOD_* settings may come from a .env file
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match cli.command {
        Command::Run(args) => {
            let config = LoadTestConfig::from_args(&args)?;
            txflood::run_load_test(config).await?;
        }
        Command::Audit(args) => {
            txflood::run_audit(AuditConfig::from_args(&args)?).await?;
        }
        Command::Status(args) => {
            txflood::run_status(TargetConfig::from_args(&args.target)?).await?;
        }
    }
    Ok(())
}
