//! Strict unified-diff application.
//!
//! Accepts the output of `diff -u` and of `similar`'s `unified_diff()`. Context
//! and removed lines must match the base byte for byte; there is no fuzz and
//! no offset search. File headers before the first hunk are skipped. Only one
//! file per patch.

use crate::error::PatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

impl HunkLine {
    fn text_mut(&mut self) -> &mut String {
        match self {
            HunkLine::Context(t) | HunkLine::Remove(t) | HunkLine::Add(t) => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    lines: Vec<HunkLine>,
}

/// Apply `diff` to `base`, returning the patched bytes.
pub fn apply(base: &[u8], diff: &str) -> Result<Vec<u8>, PatchError> {
    let base = std::str::from_utf8(base).map_err(|_| PatchError::NotUtf8)?;
    apply_str(base, diff).map(String::into_bytes)
}

/// Apply `diff` to UTF-8 `base`.
pub fn apply_str(base: &str, diff: &str) -> Result<String, PatchError> {
    let hunks = parse(diff)?;
    let lines: Vec<&str> = base.split_inclusive('\n').collect();

    let mut out = String::with_capacity(base.len());
    let mut cursor = 0usize;

    for (idx, hunk) in hunks.iter().enumerate() {
        let number = idx + 1;
        // A zero-length old range names the line *after which* to insert.
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start - 1
        };
        if start < cursor {
            return Err(PatchError::Malformed {
                line: 0,
                reason: format!("hunk {number} overlaps the previous hunk"),
            });
        }
        if start > lines.len() {
            return Err(PatchError::OutOfRange {
                hunk: number,
                lines: lines.len(),
            });
        }

        lines[cursor..start].iter().for_each(|l| out.push_str(l));
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(expected) | HunkLine::Remove(expected) => {
                    let actual = lines.get(cursor).copied();
                    if actual != Some(expected.as_str()) {
                        return Err(PatchError::Mismatch {
                            hunk: number,
                            line: cursor + 1,
                        });
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push_str(expected);
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push_str(text),
            }
        }
    }

    lines[cursor..].iter().for_each(|l| out.push_str(l));
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Open {
    hunk: Hunk,
    old_left: usize,
    new_left: usize,
}

impl Open {
    fn is_complete(&self) -> bool {
        self.old_left == 0 && self.new_left == 0
    }
}

fn parse(diff: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks = Vec::new();
    let mut open: Option<Open> = None;

    for (idx, raw) in diff.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;

        if raw.starts_with("@@") {
            if let Some(prev) = open.take() {
                close(prev, line_no, &mut hunks)?;
            }
            open = Some(parse_header(raw, line_no)?);
            continue;
        }

        let Some(current) = open.as_mut() else {
            // Preamble: `diff`, `index`, `---`, `+++` and anything else before
            // the first hunk.
            continue;
        };

        if let Some(rest) = raw.strip_prefix('\\') {
            if !rest.trim_start().starts_with("No newline") {
                return Err(malformed(line_no, "unknown `\\` marker"));
            }
            let Some(last) = current.hunk.lines.last_mut() else {
                return Err(malformed(line_no, "newline marker before any hunk line"));
            };
            let text = last.text_mut();
            if text.ends_with('\n') {
                text.pop();
            }
            continue;
        }

        if current.is_complete() {
            if raw.trim().is_empty() {
                continue;
            }
            return Err(malformed(line_no, "line after the end of the last hunk"));
        }

        let (tag, text) = match raw.chars().next() {
            Some(c @ (' ' | '-' | '+')) => (c, &raw[1..]),
            // Some tools strip the leading space from blank context lines.
            Some('\n') => (' ', raw),
            _ => return Err(malformed(line_no, "expected ' ', '-' or '+'")),
        };

        let (old, new) = match tag {
            ' ' => (1, 1),
            '-' => (1, 0),
            _ => (0, 1),
        };
        if old > current.old_left || new > current.new_left {
            return Err(malformed(line_no, "hunk is longer than its header"));
        }
        current.old_left -= old;
        current.new_left -= new;

        let text = text.to_string();
        current.hunk.lines.push(match tag {
            ' ' => HunkLine::Context(text),
            '-' => HunkLine::Remove(text),
            _ => HunkLine::Add(text),
        });
    }

    if let Some(prev) = open.take() {
        close(prev, diff.lines().count() + 1, &mut hunks)?;
    }
    if hunks.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(hunks)
}

fn close(open: Open, line_no: usize, hunks: &mut Vec<Hunk>) -> Result<(), PatchError> {
    if !open.is_complete() {
        return Err(malformed(line_no, "hunk is shorter than its header"));
    }
    hunks.push(open.hunk);
    Ok(())
}

/// `@@ -a[,b] +c[,d] @@ [section]`
fn parse_header(raw: &str, line_no: usize) -> Result<Open, PatchError> {
    let body = raw
        .trim_end()
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split_once(" @@"))
        .map(|(ranges, _section)| ranges)
        .ok_or_else(|| malformed(line_no, "bad hunk header"))?;

    let mut parts = body.split_whitespace();
    let old = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .and_then(parse_range);
    let new = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .and_then(parse_range);
    let (Some((old_start, old_len)), Some((_, new_len))) = (old, new) else {
        return Err(malformed(line_no, "bad hunk range"));
    };
    if parts.next().is_some() {
        return Err(malformed(line_no, "bad hunk header"));
    }
    if old_len > 0 && old_start == 0 {
        return Err(malformed(line_no, "non-empty hunk cannot start at line 0"));
    }

    Ok(Open {
        hunk: Hunk {
            old_start,
            old_len,
            lines: Vec::new(),
        },
        old_left: old_len,
        new_left: new_len,
    })
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

fn malformed(line: usize, reason: &str) -> PatchError {
    PatchError::Malformed {
        line,
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
