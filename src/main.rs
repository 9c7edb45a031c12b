use apparel_product_crawler::orchestrator::{self, ProcessUnit, RunAllArgs};
use apparel_product_crawler::spiders::{self, SPIDERS};
use apparel_product_crawler::{run_crawl, CrawlArgs};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(about = "Collects apparel products from brand storefronts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single spider
    Crawl(CrawlArgs),
    /// Run every spider in turn and write the run summary
    RunAll(RunAllArgs),
    /// List the known spiders
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info,sqlx=warn".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Crawl(args) => {
            let report = run_crawl(&args).await?;
            info!(
                "[{}] Done: {} products in {} pages",
                args.spider, report.emitted, report.pages
            );
        }
        Command::RunAll(args) => {
            let unit = ProcessUnit::current(args.output_dir.clone())?;
            let summary = orchestrator::run_all(&unit, &SPIDERS, &args).await?;
            if summary.exit_code() != 0 {
                std::process::exit(summary.exit_code());
            }
        }
        Command::List => {
            for entry in SPIDERS {
                let urls = spiders::build(entry.name)?
                    .start_urls()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                println!("{}\t{}\t{}", entry.name, entry.brand, urls.join(" "));
            }
        }
    }

    Ok(())
}
