use clap::{Parser, Subcommand};
use log::error;
use nephrogene::api::{GeneFilter, Pagination, SortBy};
use nephrogene::config::Settings;
use nephrogene::progress::{Event, SourceState};
use nephrogene::App;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "nephrogene", version, about = "Kidney-disease gene panel annotation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single source and wait for it to finish
    Trigger { source: String },
    /// Run every source in dependency order and wait
    TriggerAll,
    /// Print the progress row of every source
    Status,
    /// List genes from the scoring view
    Genes {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        min_percentage: Option<f64>,
    },
    /// Export the evidence and annotation store as stable JSON
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let settings = Settings::from_env();
    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();

    let cli = Cli::parse();
    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<nephrogene::ApiError>()
                .map(nephrogene::ApiError::code)
                .unwrap_or("Internal");
            error!("{err:#}");
            eprintln!("error[{code}]: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let app = App::bootstrap(settings)?;

    let result: anyhow::Result<()> = match cli.command {
        Command::Trigger { source } => {
            app.trigger(&source)?;
            wait_for(&app, &[source]).map_err(Into::into)
        }
        Command::TriggerAll => {
            let sources: Vec<String> = app.registry.names().map(str::to_string).collect();
            app.trigger_all()?;
            wait_for(&app, &sources).map_err(Into::into)
        }
        Command::Status => {
            for row in app.status() {
                let eta = row
                    .eta_seconds()
                    .map(|s| format!(" eta {s}s"))
                    .unwrap_or_default();
                println!(
                    "{:24} {:10} {:>6}/{:<6} +{} ~{} !{}{}{}",
                    row.source,
                    row.state.to_string(),
                    row.processed,
                    row.total,
                    row.added,
                    row.updated,
                    row.failed,
                    eta,
                    row.last_error
                        .map(|e| format!("  [{e}]"))
                        .unwrap_or_default(),
                );
            }
            Ok(())
        }
        Command::Genes { limit, min_percentage } => {
            let filter = GeneFilter {
                min_percentage,
                ..GeneFilter::default()
            };
            let page = app.list_genes(
                &filter,
                Pagination { offset: 0, limit },
                SortBy::ScoreDesc,
            )?;
            println!("{:12} {:>8}  {:24} sources", "symbol", "score", "tier");
            for row in page.items {
                println!(
                    "{:12} {:>7.2}%  {:24} {}",
                    row.symbol,
                    row.percentage_score,
                    row.tier.to_string(),
                    row.source_scores.len(),
                );
            }
            println!("({} of {} genes)", page.limit.min(page.total), page.total);
            Ok(())
        }
        Command::Export { out } => {
            match out {
                Some(path) => {
                    let mut file = File::create(&path)?;
                    app.export_snapshot(&mut file)?;
                    println!("exported to {}", path.display());
                }
                None => {
                    let stdout = std::io::stdout();
                    app.export_snapshot(&mut stdout.lock())?;
                }
            }
            Ok(())
        }
    };

    app.shutdown();
    result
}

/// Follows the event bus until every named source reaches a terminal
/// state, printing transitions as they happen.
fn wait_for(app: &App, sources: &[String]) -> Result<(), nephrogene::ApiError> {
    let subscription = app.subscribe("cli");
    let mut pending: std::collections::HashSet<&str> =
        sources.iter().map(String::as_str).collect();

    // Sources already terminal (or unknown) at subscription time are
    // settled by the initial snapshot.
    while !pending.is_empty() {
        match subscription.receiver.recv_timeout(Duration::from_secs(600)) {
            Ok(Event::InitialStatus(rows)) => {
                for row in rows {
                    if row.state.is_terminal() {
                        pending.remove(row.source.as_str());
                    }
                }
            }
            Ok(Event::StatusChange(row)) => {
                println!("{}: {}", row.source, row.state);
                if row.state.is_terminal() {
                    pending.remove(row.source.as_str());
                }
            }
            Ok(Event::ProgressUpdate(_)) => {}
            Err(_) => {
                return Err(nephrogene::ApiError::Unavailable(
                    "timed out waiting for run to finish".to_string(),
                ));
            }
        }
    }

    let failed: Vec<String> = app
        .status()
        .into_iter()
        .filter(|row| {
            sources.contains(&row.source) && row.state == SourceState::Failed
        })
        .map(|row| row.source)
        .collect();
    if !failed.is_empty() {
        eprintln!("failed sources: {}", failed.join(", "));
    }
    Ok(())
}
