use anyhow::Result;
use clap::{Parser, Subcommand};
use gatelock::{analyze_repository, build_graphs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Gatelock - dynamic deadlock-potential detection for multithreaded programs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a captured repository and print every deadlock potential
    Analyze {
        /// Path to the event repository directory
        repository: PathBuf,
        /// Emit diagnostics as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Print size statistics of the graphs built from a repository
    Stats {
        /// Path to the event repository directory
        repository: PathBuf,
    },
    /// Write the lock graph in Graphviz dot format to stdout
    Dot {
        /// Path to the event repository directory
        repository: PathBuf,
    },
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()?;

    match Cli::parse().command {
        Command::Analyze { repository, json } => {
            let diagnostics = analyze_repository(&repository)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            } else if diagnostics.is_empty() {
                println!("no deadlock potential found");
            } else {
                for (i, diagnostic) in diagnostics.iter().enumerate() {
                    if i > 0 {
                        println!();
                    }
                    println!("{diagnostic}");
                }
            }
        }
        Command::Stats { repository } => {
            let (lock_graph, segmentation) = build_graphs(&repository)?;
            println!(
                "lock graph: {} locks, {} edges",
                lock_graph.vertex_count(),
                lock_graph.edge_count()
            );
            println!(
                "segmentation graph: {} segments, {} edges",
                segmentation.vertex_count(),
                segmentation.edge_count()
            );
        }
        Command::Dot { repository } => {
            let (lock_graph, _) = build_graphs(&repository)?;
            println!("digraph locks {{");
            for edge in lock_graph.edges() {
                println!(
                    "    \"{}\" -> \"{}\" [label=\"thread {}\"];",
                    edge.source, edge.target, edge.thread
                );
            }
            println!("}}");
        }
    }
    Ok(())
}
