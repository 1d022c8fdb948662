use anyhow::Result;
use colored::*;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::DomainError;
use crate::output::OutputSink;
use crate::sources::{create_client, extract_subdomains, CrtShSource};

pub struct Config {
    pub threads: usize,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub base_url: String,
    /// Suppresses every status line, used when only hostnames go to stdout.
    pub quiet: bool,
}

/// Lifecycle of a single domain lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Pending,
    Fetching,
    Extracting,
    Sinking,
    Done,
    Failed,
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DomainState::Pending => "pending",
            DomainState::Fetching => "fetching",
            DomainState::Extracting => "extracting",
            DomainState::Sinking => "sinking",
            DomainState::Done => "done",
            DomainState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct DomainReport {
    pub domain: String,
    /// Number of subdomains saved, or why the domain failed.
    pub outcome: Result<usize, DomainError>,
    pub elapsed: Duration,
}

impl DomainReport {
    pub fn state(&self) -> DomainState {
        match self.outcome {
            Ok(_) => DomainState::Done,
            Err(_) => DomainState::Failed,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub domains: Vec<DomainReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.domains.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &DomainReport> {
        self.domains.iter().filter(|r| r.outcome.is_err())
    }

    pub fn total_subdomains(&self) -> usize {
        self.domains
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

struct Worker {
    source: CrtShSource,
    sink: Arc<OutputSink>,
    quiet: bool,
}

impl Worker {
    fn transition(&self, domain: &str, state: &mut DomainState, next: DomainState) {
        debug!("{}: {} -> {}", domain, state, next);
        *state = next;
    }

    async fn process(&self, domain: &str) -> Result<usize, DomainError> {
        let mut state = DomainState::Pending;

        self.transition(domain, &mut state, DomainState::Fetching);
        if !self.quiet {
            println!("{} Fetching {}", "[*]".blue(), domain);
        }
        let result = self.pipeline(domain, &mut state).await;

        match &result {
            Ok(_) => self.transition(domain, &mut state, DomainState::Done),
            Err(_) => self.transition(domain, &mut state, DomainState::Failed),
        }
        result
    }

    async fn pipeline(&self, domain: &str, state: &mut DomainState) -> Result<usize, DomainError> {
        let body = self.source.fetch(domain).await?;

        self.transition(domain, state, DomainState::Extracting);
        let subdomains = extract_subdomains(&body)?;

        self.transition(domain, state, DomainState::Sinking);
        let saved_to: Option<PathBuf> = self.sink.save(domain, &subdomains).await?;

        if !self.quiet {
            match saved_to {
                Some(path) => println!(
                    "{} Saved {} subdomains of {} to {}",
                    "[+]".green(),
                    subdomains.len(),
                    domain,
                    path.display()
                ),
                None => println!("{} {} subdomains of {}", "[+]".green(), subdomains.len(), domain),
            }
        }
        Ok(subdomains.len())
    }
}

// the one place a failed domain is reported
fn failure_line(domain: &str, e: &DomainError) -> String {
    format!("{} failed ({}): {}", domain, e.kind(), e)
}

pub struct Runner {
    config: Config,
    worker: Arc<Worker>,
}

impl Runner {
    pub fn new(config: Config, sink: OutputSink) -> Result<Self> {
        let client = create_client(config.timeout, config.proxy.as_deref())?;
        let source = CrtShSource::new(client, &config.base_url);

        let worker = Arc::new(Worker {
            source,
            sink: Arc::new(sink),
            quiet: config.quiet,
        });

        Ok(Runner { config, worker })
    }

    /// Looks up every domain, at most `threads` at a time.
    ///
    /// Returns once each domain has either been saved or failed; a failed domain
    /// never stops the others.
    pub async fn run(&self, domains: Vec<String>) -> RunReport {
        let run_start = Instant::now();
        let total = domains.len();
        let semaphore = Arc::new(Semaphore::new(self.config.threads.max(1)));
        let mut tasks = FuturesUnordered::new();

        for domain in domains {
            let sem = semaphore.clone();
            let worker = self.worker.clone();

            tasks.push(async move {
                // the semaphore is never closed
                let _permit = sem.acquire_owned().await.ok();
                let start = Instant::now();
                let outcome = worker.process(&domain).await;
                DomainReport {
                    domain,
                    outcome,
                    elapsed: start.elapsed(),
                }
            });
        }

        let mut report = RunReport::default();
        while let Some(domain_report) = tasks.next().await {
            if let Err(e) = &domain_report.outcome {
                let line = failure_line(&domain_report.domain, e);
                if self.config.quiet {
                    warn!("{}", line);
                } else {
                    eprintln!("{} {}", "[!]".red(), line);
                }
            }
            debug!(
                "{}/{} domains finished ({} {} in {:?})",
                report.domains.len() + 1,
                total,
                domain_report.domain,
                domain_report.state(),
                domain_report.elapsed
            );
            report.domains.push(domain_report);
        }

        debug!("Run finished in {:?}", run_start.elapsed());
        report
    }
}
