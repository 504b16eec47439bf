//! StockForge: ABC segmentation and demand forecasting CLI
//!
//! This is the main entrypoint that orchestrates data loading, segmentation,
//! forecasting and the optional JSON report.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use stockforge::{
    items_in, load_transactions, segment_transactions, summarize, AnalysisReport, Args, Category,
    ForecastEngine, ForecastOutcome, ForecastResult, InsufficientData, SegmentationResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_filter = if args.verbose {
        "stockforge=debug"
    } else {
        "stockforge=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run_pipeline(&args)
}

/// Run segmentation and, unless disabled, a forecast for one item
fn run_pipeline(args: &Args) -> Result<()> {
    let thresholds = args.parse_thresholds()?;
    let forecast_config = args.forecast_config()?;

    println!("=== Inventory Segmentation Pipeline ===\n");
    let start_time = Instant::now();

    // Step 1: Load and clean data
    let data_start = Instant::now();
    let dataset = load_transactions(&args.input, &args.column_map())?;
    tracing::debug!(
        input = %args.input,
        elapsed_ms = data_start.elapsed().as_millis() as u64,
        "data loaded"
    );

    println!(
        "✓ Data loaded: {} transactions ({} rows dropped during cleaning)",
        dataset.transactions.len(),
        dataset.rows_dropped
    );
    if let Some(last) = dataset.last_timestamp() {
        println!("  Latest transaction: {}", last);
    }

    // Step 2: ABC segmentation
    let results = segment_transactions(&dataset.transactions, thresholds)?;
    println!(
        "✓ Segmented {} items (A ≤ {:.0}%, B ≤ {:.0}%)",
        results.len(),
        thresholds.a * 100.0,
        thresholds.b * 100.0
    );

    print_top_items(&results, args.top);
    print_category_summary(&results);

    // Step 3: Forecast
    let outcome = if args.no_forecast {
        None
    } else {
        let item = match &args.forecast {
            Some(item) => Some(item.clone()),
            None => items_in(&results, Category::A).first().map(|s| s.to_string()),
        };

        match item {
            Some(item) => {
                let span = tracing::info_span!("forecast", item_id = %item);
                let engine = ForecastEngine::new(forecast_config)?.with_span(span);

                let forecast_start = Instant::now();
                let outcome = engine.forecast(&dataset.transactions, &item, args.horizon)?;
                tracing::debug!(
                    elapsed_ms = forecast_start.elapsed().as_millis() as u64,
                    "forecast finished"
                );

                match &outcome {
                    ForecastOutcome::Forecast(result) => print_forecast(result),
                    ForecastOutcome::Insufficient(signal) => print_insufficient(signal),
                }
                Some(outcome)
            }
            None => {
                println!("\nNo 'A' category items found for forecasting. Check your data or thresholds.");
                None
            }
        }
    };

    // Step 4: Report
    if let Some(output_path) = &args.output {
        AnalysisReport::new(&dataset, thresholds, &results, outcome.as_ref())
            .write_json(output_path)?;
        println!("\nReport saved to: {}", output_path);
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

fn print_top_items(results: &[SegmentationResult], top: usize) {
    println!("\n=== Top {} Items ===", top.min(results.len()));
    println!(
        "{:<12} {:>14} {:>10} {:>8}",
        "Item", "Total Value", "Cum. Share", "Category"
    );
    for result in results.iter().take(top) {
        println!(
            "{:<12} {:>14.2} {:>9.2}% {:>8}",
            result.item_id,
            result.total_value,
            result.cumulative_share * 100.0,
            result.category
        );
    }
}

fn print_category_summary(results: &[SegmentationResult]) {
    let total_value: f64 = results.iter().map(|r| r.total_value).sum();

    println!("\n=== Category Summary ===");
    println!("Total value of analyzed items: {:.2}", total_value);
    for summary in summarize(results) {
        println!(
            "Category {}: {} items ({:.1}% of items), value {:.2} ({:.1}%)",
            summary.category,
            summary.item_count,
            summary.item_share * 100.0,
            summary.total_value,
            summary.value_share * 100.0
        );
    }
}

fn print_forecast(result: &ForecastResult) {
    println!(
        "\n=== Forecast for {} (next {} days after {}) ===",
        result.item_id, result.horizon_days, result.split_date
    );
    println!(
        "{:<12} {:>12} {:>12} {:>12}",
        "Date", "Predicted", "Lower", "Upper"
    );
    for point in result.projected() {
        println!(
            "{:<12} {:>12.2} {:>12.2} {:>12.2}",
            point.date.to_string(),
            point.predicted,
            point.lower,
            point.upper
        );
    }
}

fn print_insufficient(signal: &InsufficientData) {
    println!(
        "\nNot enough history to forecast item '{}' ({} observed days): {:?}",
        signal.item_id, signal.observed_days, signal.reason
    );
}
