use log::debug;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::DomainError;

/// `+` is always percent-encoded in a normalized domain, so no domain file can take this name.
pub const COMBINED_FILE_NAME: &str = "+combined.txt";

/// Where the subdomains of a domain end up.
pub enum OutputSink {
    Files {
        dir: PathBuf,
        combine: bool,
        // serializes appends to the combined file
        combined_lock: Mutex<()>,
    },
    Stream {
        writer: std::sync::Mutex<Box<dyn Write + Send>>,
        // set once the reader went away, e.g. `certfinder -s ... | head`
        closed: AtomicBool,
    },
}

impl OutputSink {
    pub fn files(dir: impl Into<PathBuf>, combine: bool) -> Self {
        OutputSink::Files {
            dir: dir.into(),
            combine,
            combined_lock: Mutex::new(()),
        }
    }

    pub fn stdout() -> Self {
        Self::writer(io::stdout())
    }

    /// Streams each domain's hostnames to `writer` as one contiguous block.
    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        OutputSink::Stream {
            writer: std::sync::Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Writes the results of one domain. Returns the per-domain file, if any.
    pub async fn save(
        &self,
        domain: &str,
        hostnames: &[String],
    ) -> Result<Option<PathBuf>, DomainError> {
        match self {
            OutputSink::Files {
                dir,
                combine,
                combined_lock,
            } => {
                let path = write_domain_file(dir, domain, hostnames).await?;
                if *combine {
                    let _guard = combined_lock.lock().await;
                    append_combined_file(dir, hostnames).await?;
                }
                Ok(Some(path))
            }
            OutputSink::Stream { writer, closed } => {
                print_hostnames(writer, closed, hostnames)?;
                Ok(None)
            }
        }
    }
}

fn render(hostnames: &[String]) -> String {
    let mut buf = String::with_capacity(hostnames.iter().map(|h| h.len() + 1).sum());
    for hostname in hostnames {
        buf.push_str(hostname);
        buf.push('\n');
    }
    buf
}

async fn ensure_dir(dir: &Path) -> Result<(), DomainError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DomainError::filesystem(dir, e))
}

/// Creates or truncates `dir/domain` and writes one hostname per line.
pub async fn write_domain_file(
    dir: &Path,
    domain: &str,
    hostnames: &[String],
) -> Result<PathBuf, DomainError> {
    ensure_dir(dir).await?;

    let path = dir.join(domain);
    fs::write(&path, render(hostnames))
        .await
        .map_err(|e| DomainError::filesystem(&path, e))?;

    debug!("Wrote {} lines to {}", hostnames.len(), path.display());
    Ok(path)
}

/// Appends the hostnames to the combined file in `dir` as a single write.
///
/// Callers running concurrently must hold a shared lock around this call.
pub async fn append_combined_file(dir: &Path, hostnames: &[String]) -> Result<(), DomainError> {
    ensure_dir(dir).await?;

    let path = dir.join(COMBINED_FILE_NAME);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| DomainError::filesystem(&path, e))?;

    file.write_all(render(hostnames).as_bytes())
        .await
        .map_err(|e| DomainError::filesystem(&path, e))?;
    file.flush()
        .await
        .map_err(|e| DomainError::filesystem(&path, e))?;
    Ok(())
}

fn print_hostnames(
    writer: &std::sync::Mutex<Box<dyn Write + Send>>,
    closed: &AtomicBool,
    hostnames: &[String],
) -> Result<(), DomainError> {
    if closed.load(Ordering::SeqCst) {
        return Ok(());
    }

    // a poisoned lock only means another block panicked halfway; keep writing
    let mut out = writer.lock().unwrap_or_else(|e| e.into_inner());
    let result = out
        .write_all(render(hostnames).as_bytes())
        .and_then(|_| out.flush());

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Output stream closed, dropping the remaining results");
            closed.store(true, Ordering::SeqCst);
            Ok(())
        }
        Err(e) => Err(DomainError::filesystem("<stdout>", e)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};
    use std::sync::Arc;

    /// In-memory writer whose contents stay readable after the sink takes it.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
