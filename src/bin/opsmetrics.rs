use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use opsmetrics::date_util::parse_instant_str;
use opsmetrics::transform::detect_outliers;
use opsmetrics::{
    AnalyticsEngine, CustomMetric, DataSource, Dataset, EngineConfig, FilterState, Formula,
    MetricCategory, MetricQuery, MetricValue, TimeRange, TrendDirection,
};

#[derive(Parser)]
#[command(name = "opsmetrics", about = "Operations dashboard metrics engine")]
struct Cli {
    /// Config file (default: $OPSMETRICS_CONFIG or ~/.opsmetrics/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered metrics
    List {
        /// Only show one category: performance, operations, compliance, financial, team, resources
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Calculate built-in metrics over a dataset snapshot
    Calc {
        /// Dataset JSON file with tasks/sites/users/resources/documents arrays
        #[arg(long)]
        data: PathBuf,
        /// Metric id (repeatable; default: all)
        #[arg(long)]
        metric: Vec<String>,
        /// Time range: 7d, 30d, 90d, ytd, custom, all
        #[arg(long)]
        range: Option<String>,
        /// Custom range start (implies --range custom)
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Custom range end
        #[arg(long, requires = "start")]
        end: Option<String>,
        #[arg(long)]
        status: Vec<String>,
        #[arg(long)]
        priority: Vec<String>,
        #[arg(long)]
        assignee: Vec<String>,
        #[arg(long)]
        site: Vec<String>,
        #[arg(long)]
        tag: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run a custom metric definition
    Custom {
        #[arg(long)]
        data: PathBuf,
        /// Custom metric JSON file
        #[arg(long)]
        metric: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate a formula over one entity slice
    Formula {
        #[arg(long)]
        data: PathBuf,
        /// Entity kind: tasks, sites, users, resources, documents
        #[arg(long, default_value = "tasks")]
        source: String,
        /// e.g. "SUM(actualHours) / COUNT()"
        formula: String,
    },
    /// Print values outside the 1.5 IQR fences
    Outliers {
        #[arg(allow_negative_numbers = true, required = true)]
        values: Vec<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = EngineConfig::load(cli.config.as_deref())?;
    let engine = AnalyticsEngine::with_config(&config);
    engine.cache().start()?;

    match cli.command {
        Commands::List { category, json } => handle_list(&engine, category.as_deref(), json)?,
        Commands::Calc {
            data,
            metric,
            range,
            start,
            end,
            status,
            priority,
            assignee,
            site,
            tag,
            json,
        } => {
            let dataset = Dataset::from_json_file(&data)?;
            let filters = FilterState {
                status,
                priority,
                assignee,
                site,
                tags: tag,
                ..Default::default()
            };
            let query = build_query(&filters, range.as_deref(), start.as_deref(), end.as_deref())?;
            let ids: Vec<String> = if metric.is_empty() {
                engine.registry().ids().into_iter().map(String::from).collect()
            } else {
                for id in &metric {
                    engine.metric_definition(id)?;
                }
                metric
            };
            let results = engine.calculate_metrics_with(&ids, &dataset, &query);
            print_results(&engine, &results, json)?;
        }
        Commands::Custom { data, metric, json } => {
            let dataset = Dataset::from_json_file(&data)?;
            let metric = CustomMetric::from_json_file(&metric)?;
            let value = engine
                .calculate_custom_metric(&metric, &dataset)
                .ok_or_else(|| anyhow::anyhow!("Custom metric {} could not be calculated", metric.id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}: {}", metric.name, format_value(&value, None));
            }
        }
        Commands::Formula {
            data,
            source,
            formula,
        } => {
            let dataset = Dataset::from_json_file(&data)?;
            let source = DataSource::parse(&source).ok_or_else(|| {
                anyhow::anyhow!("Unknown source: {source}. Use: tasks, sites, users, resources, documents")
            })?;
            let parsed = Formula::parse(&formula)?;
            let value = parsed.evaluate(dataset.slice(source))?;
            println!("{value}");
        }
        Commands::Outliers { values } => {
            let outliers = detect_outliers(&values);
            if outliers.is_empty() {
                println!("No outliers");
            } else {
                let list: Vec<String> = outliers.iter().map(f64::to_string).collect();
                println!("{}", list.join(", "));
            }
        }
    }

    engine.cache().destroy();
    Ok(())
}

fn build_query(
    filters: &FilterState,
    range: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> anyhow::Result<MetricQuery> {
    let query = MetricQuery::new().filters(filters.to_filters());
    if let (Some(start), Some(end)) = (start, end) {
        let parse = |s: &str| {
            parse_instant_str(s).ok_or_else(|| anyhow::anyhow!("Invalid date: {s}. Use YYYY-MM-DD or RFC 3339"))
        };
        return Ok(query.custom_range(parse(start)?, parse(end)?));
    }
    let range = range.map(TimeRange::parse).transpose()?;
    Ok(query.maybe_time_range(range))
}

fn handle_list(engine: &AnalyticsEngine, category: Option<&str>, json: bool) -> anyhow::Result<()> {
    let registry = engine.registry();
    let definitions = match category {
        Some(name) => {
            let category = MetricCategory::parse(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown category: {name}"))?;
            registry.get_metrics_by_category(category)
        }
        None => registry.definitions().iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    let mut by_category: BTreeMap<MetricCategory, Vec<_>> = BTreeMap::new();
    for def in definitions {
        by_category.entry(def.category).or_default().push(def);
    }
    for (category, defs) in by_category {
        println!("{category}");
        for def in defs {
            println!("  {:<28} {}", def.id, def.description);
        }
    }
    Ok(())
}

fn print_results(
    engine: &AnalyticsEngine,
    results: &BTreeMap<String, MetricValue>,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for (id, value) in results {
        let unit = engine
            .registry()
            .get_metric(id)
            .and_then(|def| def.unit.as_deref());
        println!("{id:<28} {}", format_value(value, unit));
    }
    Ok(())
}

fn format_value(value: &MetricValue, unit: Option<&str>) -> String {
    let mut out = match unit {
        Some("%") if value.value.as_f64().is_some() => format!("{}%", value.value),
        Some(unit) if value.value.as_f64().is_some() => format!("{} {unit}", value.value),
        _ => value.value.to_string(),
    };
    out.push_str(&format!("  ({})", value.label));
    if let Some(trend) = &value.trend {
        let arrow = match trend.direction {
            TrendDirection::Up => "↑",
            TrendDirection::Down => "↓",
            TrendDirection::Stable => "→",
        };
        out.push_str(&format!("  {arrow} {:.1}% vs {}", trend.percentage, trend.comparison_period));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmetrics::MetricScalar;

    fn value(scalar: MetricScalar) -> MetricValue {
        MetricValue {
            value: scalar,
            label: "label".into(),
            trend: None,
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_format_value_units() {
        let percent = value(MetricScalar::Number(62.5));
        assert_eq!(format_value(&percent, Some("%")), "62.5%  (label)");
        let hours = value(MetricScalar::Number(12.0));
        assert_eq!(format_value(&hours, Some("h")), "12 h  (label)");
    }

    #[test]
    fn test_format_value_text_skips_unit() {
        let na = value(MetricScalar::Text("N/A".into()));
        assert_eq!(format_value(&na, Some("%")), "N/A  (label)");
        assert_eq!(format_value(&na, Some("h")), "N/A  (label)");
    }
}
