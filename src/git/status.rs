//! Value types returned by repository operations, and the parsers that
//! build them from git's machine-readable output

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use super::error::RepoError;

/// Working tree state, partitioned by where each change lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// Changes recorded in the index but not committed
    pub staged: BTreeSet<PathBuf>,
    /// Tracked files changed in the working tree but not staged
    pub modified: BTreeSet<PathBuf>,
    pub untracked: BTreeSet<PathBuf>,
    /// Unmerged index entries left by a conflicted merge
    pub conflicted: BTreeSet<PathBuf>,
}

/// Porcelain v1 XY codes for unmerged paths
const UNMERGED: &[(u8, u8)] = &[
    (b'D', b'D'),
    (b'A', b'U'),
    (b'U', b'D'),
    (b'U', b'A'),
    (b'D', b'U'),
    (b'A', b'A'),
    (b'U', b'U'),
];

impl RepoStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }

    /// Every path that appears in any category
    pub fn all_paths(&self) -> BTreeSet<PathBuf> {
        self.staged
            .iter()
            .chain(&self.modified)
            .chain(&self.untracked)
            .chain(&self.conflicted)
            .cloned()
            .collect()
    }

    /// Drop paths for which `keep` is false
    pub(crate) fn retain(&mut self, keep: impl Fn(&PathBuf) -> bool) {
        self.staged.retain(&keep);
        self.modified.retain(&keep);
        self.untracked.retain(&keep);
        self.conflicted.retain(&keep);
    }

    /// Parse `git status --porcelain=v1 -z` output
    pub(crate) fn parse_porcelain(output: &[u8]) -> Result<Self, RepoError> {
        let mut status = RepoStatus::default();
        let mut fields = output.split(|b| *b == 0).filter(|f| !f.is_empty());

        while let Some(field) = fields.next() {
            if field.len() < 4 || field[2] != b' ' {
                return Err(RepoError::Parse(format!(
                    "malformed status entry: {:?}",
                    String::from_utf8_lossy(field)
                )));
            }
            let (x, y) = (field[0], field[1]);
            let path = bytes_to_path(&field[3..]);

            if UNMERGED.contains(&(x, y)) {
                status.conflicted.insert(path);
                continue;
            }
            match (x, y) {
                (b'?', b'?') => {
                    status.untracked.insert(path);
                }
                (b'!', b'!') => {}
                _ => {
                    // Renames and copies carry the source path as the next field
                    if matches!(x, b'R' | b'C') || matches!(y, b'R' | b'C') {
                        let orig = fields.next().ok_or_else(|| {
                            RepoError::Parse("rename entry without source path".to_string())
                        })?;
                        if x == b'R' {
                            status.staged.insert(bytes_to_path(orig));
                        }
                    }
                    if y != b' ' {
                        status.modified.insert(path.clone());
                    }
                    if x != b' ' {
                        status.staged.insert(path);
                    }
                }
            }
        }

        Ok(status)
    }
}

/// Outcome of a commit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    /// New commit id, `None` when there was nothing to commit
    pub sha: Option<String>,
    /// Repository-relative paths included in the commit
    pub files: BTreeSet<PathBuf>,
    pub message: String,
}

impl CommitResult {
    pub(crate) fn empty(message: &str) -> Self {
        Self {
            sha: None,
            files: BTreeSet::new(),
            message: message.to_string(),
        }
    }

    pub fn no_changes(&self) -> bool {
        self.sha.is_none()
    }
}

/// What `discard_changes` undid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscardResult {
    /// Paths removed from the index
    pub unstaged: BTreeSet<PathBuf>,
    /// Tracked paths restored in the working tree
    pub restored: BTreeSet<PathBuf>,
}

impl DiscardResult {
    pub fn is_noop(&self) -> bool {
        self.unstaged.is_empty() && self.restored.is_empty()
    }
}

/// One commit from history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub author_name: String,
    pub author_email: String,
    /// Author date, in the author's offset
    pub timestamp: DateTime<FixedOffset>,
    pub subject: String,
}

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

/// `--format` argument matching [`parse_log`]
pub(crate) const LOG_FORMAT: &str = "--format=%H%x1f%h%x1f%an%x1f%ae%x1f%aI%x1f%s%x1e";

/// Parse `git log` output produced with [`LOG_FORMAT`]
pub(crate) fn parse_log(output: &str) -> Result<Vec<CommitInfo>, RepoError> {
    output
        .split(RECORD_SEP)
        .map(str::trim_start)
        .filter(|record| !record.is_empty())
        .map(|record| {
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            let &[sha, short_sha, author_name, author_email, date, subject] = fields.as_slice()
            else {
                return Err(RepoError::Parse(format!("malformed log record: {record:?}")));
            };
            let timestamp = DateTime::parse_from_rfc3339(date)
                .map_err(|e| RepoError::Parse(format!("bad commit date {date:?}: {e}")))?;
            Ok(CommitInfo {
                sha: sha.to_string(),
                short_sha: short_sha.to_string(),
                author_name: author_name.to_string(),
                author_email: author_email.to_string(),
                timestamp,
                subject: subject.trim_end_matches('\n').to_string(),
            })
        })
        .collect()
}

/// Git diff statistics (additions, deletions, files changed)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub files_changed: usize,
}

impl DiffStats {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_changed > 0
    }

    /// Parse from `git diff --numstat -z --no-renames` output, keeping
    /// only paths accepted by `keep`.
    ///
    /// Format: "<added>\t<deleted>\t<path>\0", with "-" for both counts on
    /// binary files.
    pub(crate) fn parse_numstat(
        output: &[u8],
        keep: impl Fn(&PathBuf) -> bool,
    ) -> Result<Self, RepoError> {
        let mut stats = DiffStats::default();

        for record in output.split(|b| *b == 0).filter(|r| !r.is_empty()) {
            let mut parts = record.splitn(3, |b| *b == b'\t');
            let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(RepoError::Parse(format!(
                    "malformed numstat record: {:?}",
                    String::from_utf8_lossy(record)
                )));
            };
            if !keep(&bytes_to_path(path)) {
                continue;
            }
            stats.files_changed += 1;
            stats.additions += parse_count(added)?;
            stats.deletions += parse_count(deleted)?;
        }

        Ok(stats)
    }
}

fn parse_count(field: &[u8]) -> Result<usize, RepoError> {
    if field == b"-" {
        return Ok(0);
    }
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            RepoError::Parse(format!(
                "bad numstat count: {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}

/// One line of `git blame` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlameLine {
    /// 1-based line number in the current file
    pub line_no: usize,
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<FixedOffset>,
    pub content: String,
}

#[derive(Default)]
struct BlameHeader {
    sha: String,
    line_no: usize,
    author_name: String,
    author_email: String,
    author_time: i64,
    author_tz: String,
}

/// Parse `git blame --line-porcelain` output
pub(crate) fn parse_blame(output: &[u8]) -> Result<Vec<BlameLine>, RepoError> {
    let text = String::from_utf8_lossy(output);
    let mut lines = Vec::new();
    let mut current: Option<BlameHeader> = None;

    for line in text.split('\n') {
        if let Some(content) = line.strip_prefix('\t') {
            let header = current.take().ok_or_else(|| {
                RepoError::Parse("blame content without header".to_string())
            })?;
            let timestamp = blame_timestamp(header.author_time, &header.author_tz)
                .ok_or_else(|| {
                    RepoError::Parse(format!(
                        "bad blame time {} {}",
                        header.author_time, header.author_tz
                    ))
                })?;
            lines.push(BlameLine {
                line_no: header.line_no,
                sha: header.sha,
                author_name: header.author_name,
                author_email: header.author_email,
                timestamp,
                content: content.to_string(),
            });
            continue;
        }
        if line.is_empty() {
            continue;
        }

        match current.as_mut() {
            None => {
                let mut parts = line.split(' ');
                let sha = parts.next().unwrap_or_default();
                let line_no = parts.nth(1).and_then(|n| n.parse().ok());
                let Some(line_no) = line_no.filter(|_| is_hex(sha)) else {
                    return Err(RepoError::Parse(format!("bad blame header: {line:?}")));
                };
                current = Some(BlameHeader {
                    sha: sha.to_string(),
                    line_no,
                    ..Default::default()
                });
            }
            Some(header) => {
                let (key, value) = line.split_once(' ').unwrap_or((line, ""));
                match key {
                    "author" => header.author_name = value.to_string(),
                    "author-mail" => {
                        header.author_email = value
                            .trim_start_matches('<')
                            .trim_end_matches('>')
                            .to_string()
                    }
                    "author-time" => header.author_time = value.parse().unwrap_or_default(),
                    "author-tz" => header.author_tz = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    Ok(lines)
}

/// Combine epoch seconds with a `+hhmm` offset
fn blame_timestamp(epoch: i64, tz: &str) -> Option<DateTime<FixedOffset>> {
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let digits = tz.trim_start_matches(['+', '-']);
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
    Some(DateTime::from_timestamp(epoch, 0)?.with_timezone(&offset))
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(unix)]
pub(crate) fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub(crate) fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
