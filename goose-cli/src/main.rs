mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;

use goose_broker::BrokerService;
use goose_candles::CandleService;
use goose_core::{Interval, LifecycleSignal, Service};
use goose_exchange::BinanceClient;
use goose_monitor::{MonitorConfig, MonitorService};
use goose_strategy::{HammerPattern, MaCrossConfig, MovingAverageCross};
use goose_writer::WriterService;

const BACKTEST_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Parser)]
#[command(author, version, about = "Candlestick-driven trading engine")]
struct Cli {
    /// Base asset to trade and monitor; the quote is always USD
    #[arg(long, default_value = "BTC")]
    asset: String,
    /// Enable the mock broker; otherwise signals are observed but not acted on
    #[arg(long)]
    mock: bool,
    /// Initial amount of USD to fund the mock trader with
    #[arg(long = "mock-amount", default_value_t = 1000)]
    mock_amount: i64,
    /// Proportional maker/taker fee charged per mock trade
    #[arg(long = "mock-fee", default_value = "0.00075")]
    mock_fee: Decimal,
    /// Period length (in minutes) the moving-average strategy watches; 1, 5, or 15
    #[arg(long = "ma-period", default_value_t = 5)]
    ma_period: i64,
    /// Length (in periods) of the long moving average
    #[arg(long = "ma-long-length", default_value_t = 15)]
    ma_long_length: u32,
    /// Length (in periods) of the short moving average
    #[arg(long = "ma-short-length", default_value_t = 5)]
    ma_short_length: u32,
    /// Use exponential rather than simple moving averages
    #[arg(long = "ma-exp")]
    ma_exp: bool,
    /// Replay a historical interval instead of streaming live trades
    #[arg(long)]
    backtest: bool,
    /// Start of the backtest interval, "YYYY-MM-DD HH:MM" (UTC)
    #[arg(long = "backtest-start")]
    backtest_start: Option<String>,
    /// End of the backtest interval, inclusive, "YYYY-MM-DD HH:MM" (UTC)
    #[arg(long = "backtest-end")]
    backtest_end: Option<String>,
    /// API key for the historical candle source
    #[arg(long = "binance-key")]
    binance_key: Option<String>,
    /// API secret for the historical candle source
    #[arg(long = "binance-secret")]
    binance_secret: Option<String>,
    /// Directory to write the performance CSV into; defaults to the working directory
    #[arg(long = "writer-dir")]
    writer_dir: Option<PathBuf>,
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    telemetry::init_tracing(filter)?;

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let interval = Interval::from_minutes(cli.ma_period)
        .with_context(|| format!("ma-period must be 1, 5, or 15 (got {})", cli.ma_period))?;
    let writer_dir = match cli.writer_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to determine the working directory")?,
    };

    let writer = Arc::new(WriterService::new(writer_dir));
    let candles = Arc::new(CandleService::new());
    let broker = Arc::new(BrokerService::new(writer.clone()));
    broker.set_asset(cli.asset.as_str());
    if cli.mock {
        broker.enable_mock_trading(Decimal::from(cli.mock_amount), cli.mock_fee);
    }
    let monitor = MonitorService::new(
        MonitorConfig::new(cli.asset.as_str()),
        candles.clone(),
        writer.clone(),
    );

    await_transition(writer.start().await?).await?;
    await_transition(candles.start().await?).await?;
    await_transition(broker.start().await?).await?;

    let ma_strategy = MovingAverageCross::new(
        MaCrossConfig {
            interval,
            short_len: cli.ma_short_length,
            long_len: cli.ma_long_length,
            exponential: cli.ma_exp,
        },
        broker.clone(),
    )?;
    monitor.register_close_handler(ma_strategy.interval(), Box::new(ma_strategy));
    monitor.register_one_min_close_handler(Box::new(HammerPattern::new()));

    if cli.backtest {
        let start = parse_backtest_stamp(cli.backtest_start.as_deref(), "backtest-start")?;
        let end = parse_backtest_stamp(cli.backtest_end.as_deref(), "backtest-end")?;

        let mut source = BinanceClient::new();
        if let (Some(key), Some(secret)) = (&cli.binance_key, &cli.binance_secret) {
            source.auth(key, secret);
            info!("historical source will send authenticated requests");
        }

        monitor
            .run_backtest(&source, start, end)
            .await
            .context("backtest failed")?;
    } else {
        await_transition(monitor.start().await?).await?;

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for the interrupt signal")?;
        info!("interrupt received; shutting down all services");

        await_transition(monitor.stop().await?).await?;
    }

    // Reverse dependency order: the monitor is already down.
    await_transition(broker.stop().await?).await?;
    await_transition(candles.stop().await?).await?;
    await_transition(writer.stop().await?).await?;

    info!("goodbye");

    Ok(())
}

async fn await_transition(signal: LifecycleSignal) -> Result<()> {
    signal
        .await
        .context("service dropped its lifecycle signal")?;
    Ok(())
}

fn parse_backtest_stamp(value: Option<&str>, flag: &str) -> Result<DateTime<Utc>> {
    let raw = value.with_context(|| format!("{flag} is required in backtest mode"))?;
    let naive = NaiveDateTime::parse_from_str(raw, BACKTEST_STAMP_FORMAT)
        .with_context(|| format!("{flag} must look like \"YYYY-MM-DD HH:MM\" (got '{raw}')"))?;
    Ok(naive.and_utc())
}
