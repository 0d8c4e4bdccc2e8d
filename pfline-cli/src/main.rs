//! pfline CLI: portfolio lines, prices and raw timeseries from the portfolio server.
//!
//! Commands:
//! - `line`: a line of an original or synthetic portfolio
//! - `price`: a price line
//! - `series`: a single timeseries by name
//! - `warm-cache`: list all timeseries of every portfolio and persist their ids
//! - `portfolios`, `lines`, `prices`: what the structure file declares
//! - `example`: write a bundled example structure or api file

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pfline_core::data::{ApiConfig, FetchOptions, MissingPolicy, RestSource};
use pfline_core::example::{self, Document, Which};
use pfline_core::Structure;
use pfline_runner::{export_leaves_csv, export_line_csv, FetchMode, Tenant, Window};

#[derive(Parser)]
#[command(name = "pfline", about = "pfline CLI: portfolio lines from the portfolio management server")]
struct Cli {
    /// Structure file (YAML, TOML or JSON).
    #[arg(long, global = true, default_value = "structure.yaml")]
    structure: PathBuf,

    /// Api file with server, tenant and optional cache file.
    #[arg(long, global = true, default_value = "api.yaml")]
    api: PathBuf,

    /// User name on the server.
    #[arg(long, global = true, env = "PFLINE_USER")]
    user: Option<String>,

    /// Password on the server.
    #[arg(long, global = true, env = "PFLINE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a portfolio line.
    Line {
        /// Portfolio id, original or synthetic.
        portfolio: String,
        /// Line id from the structure file.
        line: String,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Fetch a price line.
    Price {
        /// Price id from the structure file.
        price: String,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Fetch a single timeseries by portfolio and name.
    Series {
        portfolio: String,
        /// Exact timeseries name.
        name: String,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// List every timeseries of every portfolio and store the ids in the cache file. Slow.
    WarmCache,
    /// List portfolio ids.
    Portfolios {
        /// Only portfolios known to the server.
        #[arg(long, default_value_t = false)]
        original_only: bool,
    },
    /// List line ids available for a portfolio.
    Lines { portfolio: String },
    /// List price ids.
    Prices,
    /// Write a bundled example file. Refuses to overwrite.
    Example {
        #[arg(value_enum)]
        document: DocumentArg,
        /// Target file.
        path: PathBuf,
        /// basic or complex.
        #[arg(long, default_value_t = Which::Basic)]
        which: Which,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Start of the window: YYYY-MM-DD, YYYY-MM-DDTHH:MM (structure timezone) or RFC 3339.
    #[arg(long)]
    start: String,

    /// End of the window (exclusive), same formats as --start.
    #[arg(long)]
    end: String,

    /// Value to use where the server reports a missing value.
    #[arg(long, value_enum, default_value_t = MissingArg::Zero)]
    missing: MissingArg,

    /// Fetch the leaves of a tree in parallel.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Print the raw per-leaf series instead of the aggregated line.
    #[arg(long, default_value_t = false)]
    series_only: bool,

    /// Write CSV here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MissingArg {
    Zero,
    Nan,
}

impl From<MissingArg> for MissingPolicy {
    fn from(arg: MissingArg) -> Self {
        match arg {
            MissingArg::Zero => MissingPolicy::Zero,
            MissingArg::Nan => MissingPolicy::Nan,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DocumentArg {
    Structure,
    Api,
}

impl From<DocumentArg> for Document {
    fn from(arg: DocumentArg) -> Self {
        match arg {
            DocumentArg::Structure => Document::Structure,
            DocumentArg::Api => Document::Api,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Line { portfolio, line, fetch } => run_query(&cli, fetch, Query::Line { portfolio, line }),
        Commands::Price { price, fetch } => run_query(&cli, fetch, Query::Price { price }),
        Commands::Series { portfolio, name, fetch } => run_query(&cli, fetch, Query::Series { portfolio, name }),
        Commands::WarmCache => run_warm_cache(&cli),
        Commands::Portfolios { original_only } => {
            let structure = load_structure(&cli.structure)?;
            for id in structure.available_portfolio_ids(*original_only) {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Lines { portfolio } => {
            let structure = load_structure(&cli.structure)?;
            for id in structure.available_line_ids(portfolio)? {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Prices => {
            let structure = load_structure(&cli.structure)?;
            for id in structure.available_price_ids() {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Example { document, path, which } => {
            example::write_to((*document).into(), *which, path)?;
            println!("Wrote {} example to {}", which, path.display());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

enum Query<'a> {
    Line { portfolio: &'a str, line: &'a str },
    Price { price: &'a str },
    Series { portfolio: &'a str, name: &'a str },
}

fn run_query(cli: &Cli, fetch: &FetchArgs, query: Query<'_>) -> Result<()> {
    let tenant = connect(cli)?;
    let mode = if fetch.parallel {
        FetchMode::Parallel
    } else {
        FetchMode::Sequential
    };
    let tenant = tenant.with_fetch_mode(mode);

    let tz = tenant.structure().tz();
    let left = parse_time(&fetch.start, tz).with_context(|| format!("invalid --start '{}'", fetch.start))?;
    let right = parse_time(&fetch.end, tz).with_context(|| format!("invalid --end '{}'", fetch.end))?;
    let window = Window::new(left, right).with_options(FetchOptions::default().with_missing(fetch.missing.into()));

    let csv = if fetch.series_only {
        let trees = match query {
            Query::Line { portfolio, line } => tenant.portfolio_line_series_only(portfolio, line, &window)?,
            Query::Price { price } => tenant.price_series_only(price, &window)?,
            Query::Series { portfolio, name } => tenant.arbitrary_series_only(portfolio, name, &window)?,
        };
        export_leaves_csv(&trees)?
    } else {
        let line = match query {
            Query::Line { portfolio, line } => tenant.portfolio_line(portfolio, line, &window)?,
            Query::Price { price } => tenant.price_series(price, &window)?,
            Query::Series { portfolio, name } => tenant.arbitrary_series(portfolio, name, &window)?,
        };
        export_line_csv(&line)?
    };
    emit(&csv, fetch.output.as_deref())
}

fn run_warm_cache(cli: &Cli) -> Result<()> {
    let tenant = connect(cli)?;
    let counts = tenant.warm_cache()?;
    for (portfolio, count) in &counts {
        println!("{portfolio:<30} {count:>6} timeseries");
    }
    Ok(())
}

fn load_structure(path: &Path) -> Result<Structure> {
    Structure::from_file(path).with_context(|| format!("failed to load structure {}", path.display()))
}

fn connect(cli: &Cli) -> Result<Tenant> {
    let structure = load_structure(&cli.structure)?;
    let api = ApiConfig::from_file(&cli.api).with_context(|| format!("failed to load api file {}", cli.api.display()))?;
    let (Some(user), Some(password)) = (&cli.user, &cli.password) else {
        bail!("--user and --password (or PFLINE_USER and PFLINE_PASSWORD) are required");
    };
    let server = api.server.clone();
    let source = RestSource::connect(api, user, password).with_context(|| format!("failed to connect to {server}"))?;
    tracing::debug!(%server, user = %user, "connected");
    Ok(Tenant::new(Arc::new(structure), Box::new(source)))
}

fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// Parse a timestamp; values without an offset are wall-clock times in `tz`.
fn parse_time(s: &str, tz: Tz) -> Result<DateTime<Tz>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&tz));
    }
    let naive = if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)
    } else {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
            .ok()
    };
    let Some(naive) = naive else {
        bail!("expected YYYY-MM-DD, YYYY-MM-DDTHH:MM or RFC 3339");
    };
    match naive.and_local_timezone(tz).earliest() {
        Some(ts) => Ok(ts),
        None => bail!("{naive} does not exist in {tz}"),
    }
}
