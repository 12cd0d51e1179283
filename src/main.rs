use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use marketpulse::analytics::{Severity, SeverityBands};
use marketpulse::cache::PersistentCache;
use marketpulse::config::Config;
use marketpulse::logger::Logger;
use marketpulse::models::{PriceObservation, RecordOrigin, TimeWindow};
use marketpulse::orchestrator::SubjectInput;
use marketpulse::provider::PerplexityClient;
use marketpulse::Orchestrator;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "marketpulse")]
#[command(about = "Commodity market intelligence with cached, volatility-gated AI commentary")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "marketpulse.json")]
    config: PathBuf,

    /// CSV price history with columns: commodity,date,price
    #[arg(long)]
    prices: Option<PathBuf>,

    /// Analysis window: "1 week" or "1 month"
    #[arg(long, default_value = "1 week")]
    window: String,

    /// Only analyze these commodities (default: all in the price file)
    #[arg(long, value_delimiter = ',')]
    commodities: Vec<String>,

    /// Query the provider for every commodity, ignoring caches
    #[arg(long)]
    force_refresh: bool,

    /// Remove expired cache entries and exit
    #[arg(long)]
    sweep: bool,

    /// Write a starter config file and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    commodity: String,
    date: chrono::NaiveDate,
    price: f64,
}

fn load_price_series(path: &PathBuf, filter: &[String]) -> Result<Vec<SubjectInput>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open price file {}", path.display()))?;

    let mut grouped: BTreeMap<String, Vec<PriceObservation>> = BTreeMap::new();
    for row in reader.deserialize() {
        let row: PriceRow = row.context("Malformed price row")?;
        if !filter.is_empty() && !filter.iter().any(|name| name == &row.commodity) {
            continue;
        }
        grouped
            .entry(row.commodity)
            .or_default()
            .push(PriceObservation::new(row.date, row.price));
    }

    Ok(grouped
        .into_iter()
        .map(|(name, mut series)| {
            series.sort_by_key(|obs| obs.date);
            series.dedup_by_key(|obs| obs.date);
            SubjectInput { name, series }
        })
        .collect())
}

fn render_results(
    records: &BTreeMap<String, marketpulse::IntelligenceRecord>,
    bands: &SeverityBands,
) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Commodity", "Z-Score", "Severity", "Origin", "Price", "Change", "Trend", "As Of",
        ]);

    for record in records.values() {
        let (zscore, severity) = match record.zscore {
            Some(z) => {
                let severity = match bands.classify(z) {
                    Severity::Normal => "normal",
                    Severity::Notice => "notice",
                    Severity::Notable => "notable",
                    Severity::Extreme => "extreme",
                };
                (format!("{:+.2}", z), severity)
            }
            None => ("-".to_string(), "unknown"),
        };

        let (price, change, trend) = match &record.summary {
            Some(summary) => (
                summary.current_price.clone().unwrap_or_else(|| "-".to_string()),
                summary.price_change.clone().unwrap_or_else(|| "-".to_string()),
                format!("{} {}", summary.trend.icon(), summary.trend),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };

        let as_of = match record.data_date {
            Some(date) if record.stale => format!("{} (stale)", date),
            Some(date) => date.to_string(),
            None => "-".to_string(),
        };

        table.add_row(vec![
            Cell::new(&record.commodity),
            Cell::new(zscore),
            Cell::new(severity),
            Cell::new(record.origin.as_str()),
            Cell::new(price),
            Cell::new(change),
            Cell::new(trend),
            Cell::new(as_of),
        ]);
    }
    println!("{table}");

    for record in records.values() {
        if let Some(warning) = &record.warning {
            Logger::warn(&format!("{}: {}", record.commodity, warning));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    Logger::header("market intelligence");

    if cli.init_config {
        Config::default().save(&cli.config)?;
        Logger::success(&format!("Wrote starter config to {}", cli.config.display()));
        return Ok(());
    }

    let config = Config::load(&cli.config)?;

    if cli.sweep {
        let cache = PersistentCache::open(&config.cache.database_path)?;
        let removed = cache.sweep_expired(config.cache.retention_days)?;
        Logger::cache(&format!("Swept {} expired entries", removed));
        return Ok(());
    }

    let prices = cli
        .prices
        .context("--prices is required unless running --sweep or --init-config")?;
    let window = TimeWindow::parse(&cli.window)
        .with_context(|| format!("Unknown window '{}'", cli.window))?;

    let subjects = load_price_series(&prices, &cli.commodities)?;
    anyhow::ensure!(!subjects.is_empty(), "No price series matched the request");
    Logger::analytics(&format!(
        "Loaded {} price series from {}",
        subjects.len(),
        prices.display()
    ));

    let provider = Arc::new(PerplexityClient::new(&config.provider)?);
    let orchestrator = Orchestrator::new(provider, config.clone());

    let records = orchestrator
        .resolve_batch(&subjects, window, cli.force_refresh)
        .await;

    let fresh = records
        .values()
        .filter(|r| r.origin == RecordOrigin::FreshQuery)
        .count();
    let cached = records
        .values()
        .filter(|r| matches!(r.origin, RecordOrigin::Memory | RecordOrigin::PersistentCache))
        .count();
    Logger::provider(&format!(
        "Resolved {} commodities: {} fresh, {} cached",
        records.len(),
        fresh,
        cached
    ));

    // Stable ordering for display.
    let ordered: BTreeMap<_, _> = records.into_iter().collect();
    render_results(&ordered, &SeverityBands::default());

    Logger::separator();
    Logger::success("Done");
    Ok(())
}
