//! Log viewer: follow mode and keyword search

use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use relaygate_core::status::{search_logs, tail_lines, LogMatch};

/// Poll interval while following a log
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Lines printed before following starts
pub const FOLLOW_BACKLOG: usize = 20;

/// Read position in a growing log
///
/// A file that shrinks (rotation, truncation) is read again from the start.
pub struct LogCursor {
    path: PathBuf,
    offset: u64,
}

impl LogCursor {
    /// Cursor positioned at the current end of `path`
    pub fn at_end(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let offset = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        Ok(Self { path, offset })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended since the last call
    pub fn read_new(&mut self) -> io::Result<Vec<u8>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut bytes)?;
        self.offset += bytes.len() as u64;
        Ok(bytes)
    }
}

/// Print the end of `path`, then everything appended until `stop` resolves
pub async fn follow<W, F>(path: &Path, out: &mut W, stop: F) -> io::Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    let mut cursor = LogCursor::at_end(path)?;
    for line in tail_lines(path, FOLLOW_BACKLOG)? {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;

    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut stop => return Ok(()),
            _ = ticker.tick() => {
                let bytes = cursor.read_new()?;
                if !bytes.is_empty() {
                    out.write_all(&bytes)?;
                    out.flush()?;
                }
            }
        }
    }
}

/// `file:line: text`
pub fn format_match(m: &LogMatch) -> String {
    format!("{}:{}: {}", m.path.display(), m.line, m.text)
}

/// Search `logs` for `keyword` and print each hit; returns the hit count
pub fn print_search<W: Write>(
    logs: &[(&str, PathBuf)],
    keyword: &str,
    out: &mut W,
) -> io::Result<usize> {
    let matches = search_logs(logs, keyword)?;
    for m in &matches {
        writeln!(out, "{}", format_match(m))?;
    }
    out.flush()?;
    Ok(matches.len())
}
