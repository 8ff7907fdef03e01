/*!
 * Orbit Catalog CLI - browse remote catalogs and read array blocks
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use orbit_catalog::{
    array::executor_from_config,
    config::{ClientConfig, ExecutorConfig, LogLevel},
    error::{CatalogError, EXIT_FATAL, EXIT_SUCCESS},
    logging, CatalogNode, ContainerDispatch, Indexer, Node, Query, RemoteArraySource,
    RemoteCatalog, Selection,
};
use std::ops::Range;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orbit-catalog")]
#[command(
    version,
    about = "Browse remote data catalogs and fetch array blocks on demand",
    long_about = None
)]
struct Cli {
    /// Catalog server URL (overrides the config file)
    #[arg(short = 'u', long = "url", value_name = "URL", global = true)]
    url: Option<String>,

    /// Load configuration from TOML file
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Fetch array blocks on this many threads (0 = sequential)
    #[arg(long, value_name = "N", global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of a catalog
    Ls {
        /// Catalog path, segments separated by '/'
        path: Option<String>,

        /// Full-text filter (repeat to narrow further)
        #[arg(long = "search", value_name = "TEXT")]
        search: Vec<String>,

        /// Position or slice to list, e.g. "3", "10:20", "5:"
        #[arg(long = "range", value_name = "INDEXER")]
        range: Option<String>,
    },

    /// Print the number of entries in a catalog
    Len {
        path: Option<String>,

        #[arg(long = "search", value_name = "TEXT")]
        search: Vec<String>,
    },

    /// Print the metadata of a node as JSON
    Meta { path: Option<String> },

    /// Print the declared structure of an array
    Describe { path: String },

    /// Fetch and print a single array block
    Block {
        path: String,

        /// Block coordinate, e.g. "0,1"
        #[arg(long = "block", value_name = "COORD")]
        block: String,
    },

    /// Fetch a region of an array, only transferring overlapping blocks
    Read {
        path: String,

        /// One range per dimension, e.g. "0:2,0:4" (default: whole array)
        #[arg(long = "region", value_name = "REGION")]
        region: Option<String>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<CatalogError>()
                .map(CatalogError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    logging::init_logging(&config)?;

    let root = RemoteCatalog::from_config(&config, ContainerDispatch::new())
        .with_context(|| format!("connecting to {}", config.base_url))?;

    match cli.command {
        Commands::Ls {
            path,
            search,
            range,
        } => {
            let catalog = narrow(open_catalog(&root, path.as_deref())?, &search);
            match range {
                Some(range) => {
                    let indexer: Indexer = range.parse()?;
                    match catalog.items_index(indexer)? {
                        Selection::One(item) => print_item(&item),
                        Selection::Many(items) => items.iter().for_each(print_item),
                    }
                }
                None => {
                    for item in catalog.items() {
                        print_item(&item?);
                    }
                }
            }
        }
        Commands::Len { path, search } => {
            let catalog = narrow(open_catalog(&root, path.as_deref())?, &search);
            println!("{}", catalog.len()?);
        }
        Commands::Meta { path } => {
            let node = root.get_path(segments(path.as_deref()).as_slice())?;
            println!("{}", serde_json::to_string_pretty(&node.metadata().to_value())?);
        }
        Commands::Describe { path } => {
            let structure = open_array(&root, &path)?.describe()?;
            println!("{}", serde_json::to_string_pretty(&structure)?);
        }
        Commands::Block { path, block } => {
            let coordinate = parse_coordinate(&block)?;
            let array = open_array(&root, &path)?.read()?;
            println!("{}", array.compute_block(&coordinate)?);
        }
        Commands::Read { path, region } => {
            let array = open_array(&root, &path)?.read()?;
            let region = match region {
                Some(spec) => parse_region(&spec, array.shape())?,
                None => array.shape().iter().map(|&extent| 0..extent).collect(),
            };
            let executor = executor_from_config(&config.executor)?;
            let data = array.compute_region(&region, executor.as_ref())?;
            println!("{}", data);
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(ref url) = cli.url {
        config.base_url = url.clone();
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    config.verbose |= cli.verbose;
    match cli.threads {
        Some(0) => config.executor = ExecutorConfig::Sequential,
        Some(threads) => config.executor = ExecutorConfig::Threads { threads },
        None => {}
    }
    config.validate()?;
    Ok(config)
}

/// CLI paths are '/'-separated; the library only ever sees segments
fn segments(path: Option<&str>) -> Vec<String> {
    path.unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn open_catalog(root: &RemoteCatalog, path: Option<&str>) -> Result<RemoteCatalog> {
    let segments = segments(path);
    root.get_path(segments.as_slice())?
        .into_catalog()
        .ok_or_else(|| anyhow!("/{} is not a catalog", segments.join("/")))
}

fn open_array(root: &RemoteCatalog, path: &str) -> Result<RemoteArraySource> {
    let node = root.get_path(segments(Some(path)).as_slice())?;
    match node.as_array() {
        Some(array) => Ok(array.clone()),
        None => bail!(
            "/{} is not an array (container: {})",
            path.trim_start_matches('/'),
            node.container().unwrap_or("catalog")
        ),
    }
}

fn narrow(catalog: RemoteCatalog, search: &[String]) -> RemoteCatalog {
    search
        .iter()
        .fold(catalog, |catalog, text| catalog.search(Query::full_text(text.as_str())))
}

fn print_item((key, node): &(String, Node)) {
    println!("{}\t{}", key, node.container().unwrap_or("catalog"));
}

fn parse_coordinate(spec: &str) -> Result<Vec<usize>> {
    spec.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| {
                    CatalogError::InvalidIndexer(format!("bad block coordinate '{}'", spec)).into()
                })
        })
        .collect()
}

/// "0:2,1:" style region; each component is an indexer resolved against `shape`
fn parse_region(spec: &str, shape: &[usize]) -> Result<Vec<Range<usize>>> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != shape.len() {
        return Err(CatalogError::InvalidIndexer(format!(
            "region '{}' has {} components, array has {} dimensions",
            spec,
            parts.len(),
            shape.len()
        ))
        .into());
    }
    parts
        .iter()
        .zip(shape)
        .map(|(part, &extent)| -> Result<Range<usize>> {
            Ok(match part.parse::<Indexer>()? {
                Indexer::Position(index) => {
                    let end = index.checked_add(1).ok_or_else(|| {
                        CatalogError::InvalidIndexer(format!("position {} is too large", index))
                    })?;
                    index..end
                }
                Indexer::Slice { start, stop } => start..stop.unwrap_or(extent),
            })
        })
        .collect()
}
