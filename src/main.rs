use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use log::{error, info};
use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;
use std::time::{Duration, Instant};

mod domain;
mod error;
mod output;
mod runner;
mod sources;

use crate::output::{OutputSink, COMBINED_FILE_NAME};

const BANNER: &str = r#"
                 _    __ _           _
   ___ ___ _ __| |_ / _(_)_ __   __| | ___ _ __
  / __/ _ \ '__| __| |_| | '_ \ / _` |/ _ \ '__|
 | (_|  __/ |  | |_|  _| | | | | (_| |  __/ |
  \___\___|_|   \__|_| |_|_| |_|\__,_|\___|_|
    "#;

/// Exit code used when the domains cannot be read.
const EXIT_INPUT_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Find subdomains of a domain in certificate transparency logs (crt.sh)",
    long_about = None,
    after_help = "Examples:\n  \
        cat domains.txt | certfinder -o domains-crt\n  \
        certfinder -o domains-crt example.com\n  \
        certfinder < domains.txt\n  \
        certfinder -s https://example.com/ | sort"
)]
struct Args {
    /// Domain or URL to look up; one per line is read from stdin when omitted
    domain: Option<String>,

    /// Output directory for the subdomains found for each domain
    #[arg(short, long, default_value = "certfinder")]
    output: String,

    /// Also append all subdomains to a single combined file
    #[arg(short, long)]
    combine: bool,

    /// Only print subdomains to stdout, without status messages or files
    #[arg(short, long)]
    stdout: bool,

    /// Number of domains looked up concurrently
    #[arg(short = 'n', long, default_value = "10", value_parser = clap::value_parser!(u16).range(1..))]
    threads: u16,

    /// Timeout in seconds for requests
    #[arg(short = 't', long, default_value = "30")]
    timeout: u64,

    /// Proxy URL (e.g., http://proxy.example.com:8080 or host:port:user:pass)
    #[arg(short = 'p', long)]
    proxy: Option<String>,

    /// Certificate transparency search endpoint
    #[arg(long, env = "CERTFINDER_BASE_URL", default_value = sources::DEFAULT_BASE_URL)]
    base_url: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool, stdout_only: bool) {
    let mut builder = env_logger::Builder::new();

    if verbose {
        builder.filter_level(log::LevelFilter::Debug);

        // Filter out noisy dependencies
        for module in ["mio", "want", "hyper", "rustls", "tokio_util"] {
            builder.filter_module(module, log::LevelFilter::Off);
        }
        builder.filter_module("reqwest", log::LevelFilter::Warn);
    } else if stdout_only {
        builder.filter_level(log::LevelFilter::Off);
    } else {
        builder.filter_level(log::LevelFilter::Warn);
    }

    builder.write_style(env_logger::WriteStyle::Never).init();
}

/// Reads one token per line, skipping blank lines.
fn read_domains<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read domains from stdin")?;
        if !line.trim().is_empty() {
            tokens.push(line);
        }
    }
    Ok(tokens)
}

fn collect_tokens(args: &Args) -> Result<Vec<String>> {
    match &args.domain {
        Some(domain) => Ok(vec![domain.clone()]),
        None => {
            let stdin = io::stdin();
            if stdin.is_terminal() && !args.stdout {
                eprintln!("Reading domains from stdin, one per line (Ctrl-D to finish)");
            }
            read_domains(stdin.lock())
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    let millis = duration.subsec_millis();

    if minutes > 0 {
        format!("{}m {}s {}ms", minutes, seconds, millis)
    } else if seconds > 0 {
        format!("{}s {}ms", seconds, millis)
    } else {
        format!("{}ms", millis)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let start_time = Instant::now();
    let quiet = args.stdout;

    init_logging(args.verbose, quiet);

    if args.verbose && !quiet {
        println!("{}", BANNER.bright_cyan());
        println!("{}", format!("[ certfinder v{} ]", env!("CARGO_PKG_VERSION")).bright_blue());
        println!();
    }

    let tokens = match collect_tokens(&args) {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "[!]".red(), e);
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };

    let domains = domain::normalize_all(&tokens);
    info!("{} input tokens, {} distinct domains", tokens.len(), domains.len());

    match run(args, domains).await {
        Ok(report) => {
            if !quiet {
                println!("{}", "-".repeat(50).dimmed());
                println!(
                    "{} Done: {}/{} domains, {} subdomains in {}",
                    "[+]".green(),
                    report.succeeded(),
                    report.domains.len(),
                    report.total_subdomains(),
                    format_duration(start_time.elapsed())
                );
                for failed in report.failed() {
                    if let Err(e) = &failed.outcome {
                        println!("  {} {} ({})", "failed:".red(), failed.domain, e.kind());
                    }
                }
            }

            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "[!]".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, domains: Vec<String>) -> Result<runner::RunReport> {
    let sink = if args.stdout {
        OutputSink::stdout()
    } else {
        if args.combine {
            info!("Combined output goes to {}/{}", args.output, COMBINED_FILE_NAME);
        }
        OutputSink::files(&args.output, args.combine)
    };

    let config = runner::Config {
        threads: usize::from(args.threads),
        timeout: Duration::from_secs(args.timeout),
        proxy: args.proxy.as_deref().map(sources::format_proxy),
        base_url: args.base_url,
        quiet: args.stdout,
    };

    let runner = runner::Runner::new(config, sink)?;
    Ok(runner.run(domains).await)
}
