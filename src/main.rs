use clap::{Parser as ClapParser, Subcommand};
use clove_query::{
    Source,
    cli::{self, CliError, RunOptions},
};
use std::{
    io::{self, Read},
    path::PathBuf,
};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "clove-query")]
#[command(about = "Query JSON documents with filter paths and relational operators")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against a JSON document
    Run {
        /// Filter path selecting the elements (defaults to the root array items)
        path: Option<String>,

        /// JSON file to read (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Decode incrementally, only what the path reaches
        #[arg(long)]
        stream: bool,

        #[arg(long)]
        skip: Option<i64>,

        #[arg(long)]
        take: Option<i64>,

        /// Sort by this member
        #[arg(long)]
        sort_by: Option<String>,

        /// Sort descending
        #[arg(long, requires = "sort_by")]
        desc: bool,

        /// Drop duplicate elements
        #[arg(long)]
        distinct: bool,

        /// Print the number of results
        #[arg(long)]
        count: bool,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Check the syntax of a filter path
    Check {
        /// The filter path to compile
        path: String,
    },
}

fn main() {
    let filter =
        EnvFilter::try_from_env("CLOVE_QUERY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            path,
            input,
            stream,
            skip,
            take,
            sort_by,
            desc,
            distinct,
            count,
            pretty,
        } => {
            let options = RunOptions {
                path,
                stream,
                skip,
                take,
                sort_by,
                descending: desc,
                distinct,
                count,
                pretty,
            };
            run_query(options, input)
        }
        Commands::Check { path } => run_check(&path),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_query(options: RunOptions, input: Option<PathBuf>) -> Result<(), CliError> {
    let source = match input {
        Some(file) => Source::file(file),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer).map_err(CliError::Io)?;
            Source::bytes(buffer)
        }
        None => return Err(CliError::NoInput),
    };

    let output = cli::execute_run(&options, source)?;
    println!("{}", output.render(options.pretty)?);
    Ok(())
}

fn run_check(path: &str) -> Result<(), CliError> {
    let result = cli::execute_check(path)?;
    let mode = if result.streamable { "streamable" } else { "buffered" };
    println!("Path is valid ({} segment(s), {})", result.segments, mode);
    Ok(())
}
