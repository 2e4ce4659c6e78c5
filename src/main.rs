//! logtree - print and follow structured event logs

use anyhow::{Context, Result};
use clap::Parser;
use logtree::column::Column;
use logtree::config::AppConfig;
use logtree::highlighter::{load_filter, load_filter_file, HighlightRule};
use logtree::live_tail::{LiveTail, TailOptions, TailTarget};
use logtree::model::EventModel;
use logtree::notation::Notation;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "logtree", about = "Structured event log viewer with live capture")]
struct Cli {
    /// Log file or directory of log files
    path: PathBuf,

    /// Keep printing events as they are appended
    #[arg(short, long)]
    follow: bool,

    /// Saved highlight filter to apply
    #[arg(long, conflicts_with = "filter_file")]
    filter: Option<String>,

    /// Highlight filter JSON file to apply
    #[arg(long)]
    filter_file: Option<PathBuf>,

    /// Only print highlighted events
    #[arg(long)]
    highlight_only: bool,

    /// Value notation: flat, json or yaml
    #[arg(long)]
    notation: Option<Notation>,

    /// Maximum events kept while following
    #[arg(long)]
    max_events: Option<usize>,

    /// Configuration file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Using default configuration: {:#}", e);
            AppConfig::default()
        }),
    };

    let mut display = config.display_options();
    if let Some(notation) = cli.notation {
        display.notation = notation;
    }
    let notation_name = display.notation.name();
    tracing::debug!("Rendering values as {}", notation_name);
    let mut tail_options = config.tail_options();
    if let Some(max_events) = cli.max_events {
        tail_options.max_events = max_events;
    }

    let rules = load_rules(&cli, &config)?;
    let mut model = EventModel::with_rules(config.parse_options(), display, rules);
    model.set_name_filters(tail_options.name_filters.clone());

    let summary = if cli.path.is_dir() {
        model.load_directory(&cli.path)?
    } else {
        model.load_file(&cli.path)?
    };
    eprintln!("{}", summary);

    if cli.highlight_only && !model.set_highlight_only(true) {
        tracing::warn!("--highlight-only ignored: no highlight rules loaded");
    }
    if model.matcher().has_rules() {
        eprintln!("{}", model.highlight_summary());
    }

    print_rows(&model, 0);

    if cli.follow {
        follow(&mut model, &cli, tail_options)?;
    }
    Ok(())
}

/// Rules from the command line, falling back to the configured default filter
fn load_rules(cli: &Cli, config: &AppConfig) -> Result<Vec<HighlightRule>> {
    if let Some(path) = &cli.filter_file {
        return load_filter_file(path).with_context(|| format!("Failed to load {}", path.display()));
    }
    if let Some(name) = &cli.filter {
        return load_filter(&AppConfig::filters_dir()?, name)
            .with_context(|| format!("Failed to load filter '{}'", name));
    }
    if let Some(name) = &config.highlight.default_filter {
        match AppConfig::filters_dir().and_then(|dir| Ok(load_filter(&dir, name)?)) {
            Ok(rules) => return Ok(rules),
            Err(e) => tracing::warn!("Default filter '{}' not loaded: {:#}", name, e),
        }
    }
    Ok(Vec::new())
}

fn follow(model: &mut EventModel, cli: &Cli, options: TailOptions) -> Result<()> {
    let notifications = model.subscribe();
    let ticker = crossbeam_channel::tick(options.interval);
    let mut tail = LiveTail::new(TailTarget::from_path(&cli.path), options);
    tail.start(model)?;
    tracing::debug!("{}", tail.debug_info());

    loop {
        ticker.recv().context("Tick timer stopped")?;
        let report = tail.tick(model);
        for event in notifications.try_iter() {
            tracing::trace!("{:?}", event);
        }
        if let Some(first_row) = report.first_row {
            print_rows(model, first_row);
        }
    }
}

/// Print visible rows from `first_row` on, one tab-separated line each
fn print_rows(model: &EventModel, first_row: usize) {
    let store = model.store();
    for row in first_row..store.row_count() {
        if !model.matcher().is_row_visible(store, row) {
            continue;
        }
        let marker = model
            .color_for(row)
            .map(|color| format!("{} ", color.to_hex()))
            .unwrap_or_default();
        println!(
            "{}{}\t{}\t{}\t{}\t{}",
            marker,
            store.get(row, Column::Id),
            store.get(row, Column::Time),
            store.get(row, Column::File),
            store.get(row, Column::Key),
            store.get(row, Column::Value),
        );
    }
}
