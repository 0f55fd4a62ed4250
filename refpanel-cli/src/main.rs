//! Refpanel CLI: panel loads and metadata lookups over a table directory.
//!
//! The data directory holds one `<schema>.<table>.parquet` (or `.csv`) file
//! per table.
//!
//! Commands:
//! - `load`: assemble prices, fundamentals and estimates and export them
//! - `tables`, `columns`, `where`: browse the catalog
//! - `describe field|code|table`, `search`: reference metadata
//! - `init-config`: print the default settings as TOML

mod log;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use refpanel_core::config::Settings;
use refpanel_core::domain::{DateWindow, Frequency, TableId};
use refpanel_core::output::{ExportFormat, PanelOutput};
use refpanel_core::panel::{PanelAssembler, PanelRequest};
use refpanel_core::source::{Catalog, FrameWarehouse, SymbologyMapper};
use refpanel_core::MetadataService;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "refpanel",
    about = "Refpanel CLI: price, fundamentals and estimates panels from a reference warehouse"
)]
struct Cli {
    /// Directory of exported tables.
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Settings file (TOML). Defaults to the built-in FactSet layout.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log loader flow at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a panel and write its frames to a directory.
    Load {
        /// ISINs to load.
        #[arg(required = true)]
        isins: Vec<String>,

        /// Window start (YYYY-MM-DD). Defaults to 1990-01-01.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Window end (YYYY-MM-DD). Defaults to 2030-12-31.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Price fields, comma-separated (e.g. price,price_open,currency).
        #[arg(long, value_delimiter = ',')]
        prices: Vec<String>,

        /// Fundamentals fields, comma-separated.
        #[arg(long, value_delimiter = ',')]
        fundamentals: Vec<String>,

        /// Reporting frequency: qf, af, ltm, ytd, saf.
        #[arg(long, default_value = "qf")]
        frequency: Frequency,

        /// Resolve fundamentals outside the priority tables.
        #[arg(long, default_value_t = false)]
        fallback: bool,

        /// Skip corporate-action adjustment (the `_adj` columns equal the raw ones).
        #[arg(long, default_value_t = false)]
        no_adjust: bool,

        /// Estimate kinds, comma-separated (e.g. conh,act,guid).
        #[arg(long, value_delimiter = ',')]
        estimates: Vec<String>,

        /// Estimate items, comma-separated (e.g. EPS,BPS,SAL).
        #[arg(long, value_delimiter = ',')]
        items: Vec<String>,

        /// Estimate frequency. Defaults to --frequency.
        #[arg(long)]
        estimate_frequency: Option<Frequency>,

        /// Output directory.
        #[arg(long, default_value = "panel")]
        output_dir: PathBuf,

        /// Output format: csv or parquet.
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Print the load summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List tables, optionally of one schema.
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },
    /// List the columns of a table (schema.table).
    Columns { table: TableId },
    /// List the tables carrying a column.
    Where { column: String },
    /// Look up a reference description.
    Describe {
        #[arg(value_enum)]
        kind: DescribeKind,
        name: String,
    },
    /// Search field descriptions (case-insensitive).
    Search { text: String },
    /// Write the default settings as TOML.
    InitConfig {
        /// Destination file. Prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DescribeKind {
    Field,
    Code,
    Table,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_logging(cli.verbose);

    let open = || open_warehouse(&cli.data_dir, cli.config.as_deref());

    match cli.command {
        Commands::Load {
            isins,
            start,
            end,
            prices,
            fundamentals,
            frequency,
            fallback,
            no_adjust,
            estimates,
            items,
            estimate_frequency,
            output_dir,
            format,
            json,
        } => {
            let (settings, warehouse) = open()?;
            let window = build_window(start, end)?;
            let mut request = PanelRequest::new(isins)
                .window(window)
                .prices(prices)
                .fundamentals(fundamentals)
                .frequency(frequency)
                .fallback(fallback)
                .adjust(!no_adjust)
                .estimates(estimates, items);
            request.estimate_frequency = estimate_frequency;
            run_load(&warehouse, &settings, &request, &output_dir, format, json)
        }
        Commands::Tables { schema } => {
            let (_, warehouse) = open()?;
            run_tables(&warehouse, schema.as_deref())
        }
        Commands::Columns { table } => {
            let (settings, warehouse) = open()?;
            let meta = MetadataService::new(&warehouse, &warehouse, &settings.metadata);
            let columns = meta
                .table_columns(&table)
                .with_context(|| format!("failed to list columns of {table}"))?;
            for column in columns {
                println!("{column}");
            }
            Ok(())
        }
        Commands::Where { column } => {
            let (settings, warehouse) = open()?;
            let meta = MetadataService::new(&warehouse, &warehouse, &settings.metadata);
            let tables = meta.column_tables(&column)?;
            if tables.is_empty() {
                println!("No table carries column '{column}'");
            }
            for table in tables {
                println!("{table}");
            }
            Ok(())
        }
        Commands::Describe { kind, name } => {
            let (settings, warehouse) = open()?;
            let meta = MetadataService::new(&warehouse, &warehouse, &settings.metadata);
            let description = match kind {
                DescribeKind::Field => meta.field_description(&name),
                DescribeKind::Code => meta.code_description(&name),
                DescribeKind::Table => meta.table_description(&name),
            }
            .with_context(|| format!("failed to look up '{name}'"))?;
            match description {
                Some(text) => println!("{name}: {text}"),
                None => println!("{name}: (no description)"),
            }
            Ok(())
        }
        Commands::Search { text } => {
            let (settings, warehouse) = open()?;
            let meta = MetadataService::new(&warehouse, &warehouse, &settings.metadata);
            let hits = meta.search_fields(&text)?;
            if hits.is_empty() {
                println!("No field matches '{text}'");
            }
            for hit in hits {
                println!("{:<32} {}", hit.name, hit.description);
            }
            Ok(())
        }
        Commands::InitConfig { output, force } => run_init_config(output.as_deref(), force),
    }
}

fn open_warehouse(data_dir: &Path, config: Option<&Path>) -> Result<(Settings, FrameWarehouse)> {
    let settings = match config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let warehouse = FrameWarehouse::from_dir(data_dir)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    if warehouse.is_empty() {
        eprintln!("Warning: no tables found in {}", data_dir.display());
    }
    Ok((settings, warehouse))
}

fn build_window(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<DateWindow> {
    let default = DateWindow::default();
    let window = DateWindow::new(
        start.unwrap_or_else(|| default.start()),
        end.unwrap_or_else(|| default.end()),
    )?;
    Ok(window)
}

fn run_load(
    warehouse: &FrameWarehouse,
    settings: &Settings,
    request: &PanelRequest,
    output_dir: &Path,
    format: ExportFormat,
    json: bool,
) -> Result<()> {
    if request.price_fields.is_empty()
        && request.fundamental_fields.is_empty()
        && (request.estimate_kinds.is_empty() || request.estimate_items.is_empty())
    {
        bail!("nothing to load: pass --prices, --fundamentals, or --estimates with --items");
    }

    let mapper = SymbologyMapper::new(warehouse, settings.symbology.clone());
    let output = PanelAssembler::new(warehouse, warehouse, &mapper, settings)
        .load(request)
        .context("panel load failed")?;

    let manifest = output
        .write_to(output_dir, format)
        .with_context(|| format!("failed to export panel to {}", output_dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(output.summary())?);
    } else {
        print_summary(&output);
    }
    println!(
        "Wrote {} frames to {}",
        manifest.frames.len(),
        output_dir.display()
    );
    Ok(())
}

fn print_summary(output: &PanelOutput) {
    let summary = output.summary();
    println!("Request: {}", &summary.fingerprint[..12.min(summary.fingerprint.len())]);
    println!();
    println!("{:<24} {:>8} {:>8}", "Frame", "Rows", "Columns");
    println!("{}", "-".repeat(42));
    for key in output.keys() {
        let df = output.get(key);
        println!("{:<24} {:>8} {:>8}", key, df.height(), df.width());
    }

    let unresolved = summary.resolution.unresolved();
    if !unresolved.is_empty() {
        println!();
        println!("Unresolved fundamentals (null columns): {}", unresolved.join(", "));
    }
    if !summary.dropped_price_fields.is_empty() {
        println!(
            "Unavailable price fields: {}",
            summary.dropped_price_fields.join(", ")
        );
    }
    for (kind, items) in &summary.synthesized_items {
        println!("Estimates {kind}: no data for {}", items.join(", "));
    }
}

fn run_tables(warehouse: &FrameWarehouse, schema: Option<&str>) -> Result<()> {
    let tables = match schema {
        Some(schema) => warehouse.tables(schema)?,
        None => warehouse.all_tables()?,
    };
    if tables.is_empty() {
        println!("No tables");
        return Ok(());
    }
    for table in tables {
        let columns = warehouse.columns(&table).map(|c| c.len()).unwrap_or(0);
        println!("{:<48} {:>4} columns", table.to_string(), columns);
    }
    Ok(())
}

fn run_init_config(output: Option<&Path>, force: bool) -> Result<()> {
    let toml = Settings::default().to_toml()?;
    match output {
        None => print!("{toml}"),
        Some(path) => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            std::fs::write(path, toml)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote default settings to {}", path.display());
        }
    }
    Ok(())
}
