//! Porcelain v1 status parsing.

/// A status line that is neither a plain add nor a plain modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Index status code, `None` when unchanged.
    pub index: Option<char>,
    /// Working tree status code, `None` when unchanged.
    pub working: Option<char>,
    pub source: String,
    /// Destination of a rename or copy.
    pub dest: Option<String>,
}

/// Working tree status grouped the way commit decisions need it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub added_staged: Vec<String>,
    /// Untracked files.
    pub added_working: Vec<String>,
    pub modified_staged: Vec<String>,
    pub modified_working: Vec<String>,
    pub other: Vec<StatusEntry>,
}

impl RepoStatus {
    /// Parse `git status --porcelain=v1` output.
    pub fn parse(text: &str) -> Self {
        let mut status = RepoStatus::default();
        for line in text.lines() {
            let mut chars = line.chars();
            let (index, working) = match (chars.next(), chars.next()) {
                (Some(i), Some(w)) => (i, w),
                _ => continue,
            };
            let raw = line.get(3..).unwrap_or_default();
            if raw.is_empty() {
                continue;
            }
            let renamed = matches!(index, 'R' | 'C') || matches!(working, 'R' | 'C');
            let (source, dest) = if renamed {
                split_rename(raw)
            } else {
                (unquote(raw), None)
            };
            let path = dest.clone().unwrap_or_else(|| source.clone());

            match index {
                'M' => status.modified_staged.push(path.clone()),
                'A' => status.added_staged.push(path.clone()),
                _ => {}
            }
            match working {
                'M' => status.modified_working.push(path.clone()),
                '?' => status.added_working.push(path.clone()),
                _ => {}
            }

            if !matches!(index, 'M' | 'A') && !matches!(working, 'M' | '?') {
                status.other.push(StatusEntry {
                    index: (index != ' ').then_some(index),
                    working: (working != ' ').then_some(working),
                    source,
                    dest,
                });
            }
        }
        status
    }

    pub fn has_staged_changes(&self) -> bool {
        !self.added_staged.is_empty()
            || !self.modified_staged.is_empty()
            || self.other.iter().any(|e| e.index.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self == &RepoStatus::default()
    }

    /// Paths with unstaged changes (modified or untracked).
    pub fn working_changes(&self) -> impl Iterator<Item = &str> {
        self.modified_working
            .iter()
            .chain(self.added_working.iter())
            .map(String::as_str)
    }
}

/// Decode a leading C-style quoted path, as git writes names holding
/// spaces, quotes, control characters or non-ASCII bytes. Returns the path
/// and whatever follows the closing quote.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some((String::from_utf8_lossy(&out).into_owned(), &s[i + 1..])),
            b'\\' => {
                let escaped = *bytes.get(i + 1)?;
                i += 2;
                match escaped {
                    b'0'..=b'7' => {
                        let mut value = u32::from(escaped - b'0');
                        let mut digits = 1;
                        while digits < 3 {
                            match bytes.get(i).copied() {
                                Some(d @ b'0'..=b'7') => value = value * 8 + u32::from(d - b'0'),
                                _ => break,
                            }
                            i += 1;
                            digits += 1;
                        }
                        out.push(value as u8);
                    }
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'v' => out.push(0x0b),
                    other => out.push(other),
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    None
}

fn unquote(raw: &str) -> String {
    match take_quoted(raw) {
        Some((path, "")) => path,
        _ => raw.to_string(),
    }
}

/// Split `source -> dest`, either side possibly quoted.
fn split_rename(raw: &str) -> (String, Option<String>) {
    if let Some((source, rest)) = take_quoted(raw) {
        let dest = rest.strip_prefix(" -> ").map(unquote);
        return (source, dest);
    }
    match raw.split_once(" -> ") {
        Some((source, dest)) => (source.to_string(), Some(unquote(dest))),
        None => (raw.to_string(), None),
    }
}
