//! Append-only audit log of insertions.
//!
//! One line per insertion, stored in `index` at the cache root:
//!
//! ```text
//! 20240131 <digest>: "https://example.com/page"
//! ```
//!
//! The key is written as a JSON string literal so that any key stays on one
//! line. The log is the only place where a digest can be mapped back to the
//! key it was computed from.
//!
//! Lines with a bare, unquoted key, as well as keys holding `"` or `\` that
//! were not escaped, do not parse. They are kept in the file and counted
//! towards the sweep trigger, but skipped when records are listed.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::hash::Digest;
use super::tree::TEMP_SUFFIX;
use crate::Error;

/// File name of the audit log at the cache root.
pub const INDEX_FILE_NAME: &str = "index";

const DATE_FORMAT: &str = "%Y%m%d";

/// A single insertion recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub date: NaiveDate,
    pub digest: Digest,
    pub key: String,
}

impl AuditRecord {
    /// Record dated today (UTC).
    pub fn new(digest: Digest, key: &str) -> Self {
        Self { date: Utc::now().date_naive(), digest, key: key.to_string() }
    }

    pub fn to_line(&self) -> String {
        // A String always serializes to JSON.
        let key = serde_json::to_string(&self.key).unwrap_or_default();
        format!("{} {}: {}", self.date.format(DATE_FORMAT), self.digest, key)
    }

    pub fn parse(line: &str) -> Result<Self, Error> {
        let malformed = || Error::InvalidInput(format!("malformed audit record: {line}"));

        let mut fields = line.splitn(3, ' ');
        let date = fields.next().ok_or_else(malformed)?;
        let digest = fields.next().and_then(|f| f.strip_suffix(':')).ok_or_else(malformed)?;
        let key = fields.next().ok_or_else(malformed)?;

        Ok(Self {
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| malformed())?,
            digest: digest.parse()?,
            key: serde_json::from_str(key).map_err(|_| malformed())?,
        })
    }
}

/// Whether `line` is a record of `digest`, judged on the digest field alone.
fn line_matches(line: &str, digest_field: &str) -> bool {
    line.split(' ').nth(1) == Some(digest_field)
}

/// Handle to the `index` file of a cache root.
#[derive(Debug, Clone)]
pub(crate) struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(root: &Path) -> Self {
        Self { path: root.join(INDEX_FILE_NAME) }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(format!("opening {}", self.path.display()), e))?;
        writeln!(file, "{}", record.to_line()).map_err(|e| Error::io(format!("appending to {}", self.path.display()), e))
    }

    /// Number of lines in the log; 0 when it does not exist.
    pub fn count(&self) -> Result<u64, Error> {
        Ok(self.lines()?.len() as u64)
    }

    /// Parsed records, skipping lines that do not parse.
    pub fn records(&self) -> Result<Vec<AuditRecord>, Error> {
        let mut records = Vec::new();
        for line in self.lines()? {
            match AuditRecord::parse(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %self.path.display(), "skipping audit line: {e}"),
            }
        }
        Ok(records)
    }

    /// Drop every line recorded for one of `digests`.
    ///
    /// Returns the number of lines left in the log.
    pub fn prune(&self, digests: &HashSet<Digest>) -> Result<u64, Error> {
        let lines = self.lines()?;
        if lines.is_empty() {
            return Ok(0);
        }

        let fields: Vec<String> = digests.iter().map(|d| format!("{d}:")).collect();
        let kept: Vec<String> = lines
            .into_iter()
            .filter(|line| !fields.iter().any(|field| line_matches(line, field)))
            .collect();

        let mut contents = kept.join("\n");
        if !kept.is_empty() {
            contents.push('\n');
        }

        let temp_path = self.path.with_file_name(format!("{INDEX_FILE_NAME}{TEMP_SUFFIX}"));
        fs::write(&temp_path, contents).map_err(|e| Error::io(format!("writing {}", temp_path.display()), e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| Error::io(format!("replacing {}", self.path.display()), e))?;

        Ok(kept.len() as u64)
    }

    pub fn remove(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("removing {}", self.path.display()), e)),
        }
    }

    fn lines(&self) -> Result<Vec<String>, Error> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("opening {}", self.path.display()), e)),
        };

        BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
            .collect::<Result<_, _>>()
            .map_err(|e| Error::io(format!("reading {}", self.path.display()), e))
    }
}
