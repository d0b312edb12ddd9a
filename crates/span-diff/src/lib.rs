//! Validates, applies, and inverts unified diffs against working-tree files.
//!
//! No external `patch`/`git apply` subprocess is shelled out to: the engine
//! parses hunks itself so it can compute the reverse diff before the forward
//! diff touches the file, which is what makes `apply`'s rollback contract
//! hold even if the process dies mid-verification.

use std::fs;
use std::path::Path;

use regex::Regex;
use span_core::diff::{Diff, DiffLine, Hunk, LineKind};

/// Case-insensitive lazy-placeholder patterns the model sometimes emits
/// instead of real content.
fn lazy_patterns() -> &'static [&'static str] {
    &[
        r"\.\.\..*rest of",
        r"\.\.\..*existing",
        r"\.\.\..*unchanged",
        r"#.*TODO",
        r"//.*TODO",
        r"pass\s*#.*placeholder",
    ]
}

/// Rejects a diff for the reasons listed in the DiffEngine contract. Returns
/// `Ok(())` for an acceptable diff, `Err(reason)` otherwise.
pub fn validate(diff_text: &str) -> Result<(), String> {
    for pattern in lazy_patterns() {
        let re = Regex::new(&format!("(?i){pattern}")).expect("static pattern compiles");
        if re.is_match(diff_text) {
            return Err("contains lazy placeholder pattern".to_string());
        }
    }

    if !diff_text.contains("@@") {
        return Err("missing hunk header".to_string());
    }

    let raw_hunks = extract_raw_hunks(diff_text);
    if raw_hunks.is_empty() {
        return Err("no valid hunks found".to_string());
    }

    for raw in &raw_hunks {
        if !is_well_formed(raw) {
            return Err("lines must start with space, +, or -".to_string());
        }
        if !has_sufficient_context(raw) {
            return Err("insufficient context lines".to_string());
        }
    }

    Ok(())
}

/// Splits a diff body into the text of each `@@...@@`-introduced hunk,
/// stopping a hunk at the next hunk header or a `---`/`+++`/`diff` file
/// header line.
fn extract_raw_hunks(diff_text: &str) -> Vec<Vec<&str>> {
    let mut hunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_hunk = false;

    for line in diff_text.lines() {
        if line.starts_with("@@") {
            if !current.is_empty() {
                hunks.push(std::mem::take(&mut current));
            }
            current.push(line);
            in_hunk = true;
        } else if in_hunk {
            if line.starts_with("---") || line.starts_with("+++") || line.starts_with("diff") {
                if !current.is_empty() {
                    hunks.push(std::mem::take(&mut current));
                }
                in_hunk = false;
            } else {
                current.push(line);
            }
        }
    }
    if !current.is_empty() {
        hunks.push(current);
    }
    hunks
}

fn is_well_formed(raw: &[&str]) -> bool {
    if raw.is_empty() || !raw[0].starts_with("@@") {
        return false;
    }
    raw[1..]
        .iter()
        .all(|line| line.is_empty() || matches!(line.chars().next(), Some(' ' | '+' | '-' | '\\')))
}

fn has_sufficient_context(raw: &[&str]) -> bool {
    if raw[0].contains("-0,0") {
        return true;
    }

    let mut context_before = 0u32;
    let mut context_after = 0u32;
    let mut seen_change = false;
    let mut has_deletions = false;

    for line in &raw[1..] {
        match line.chars().next() {
            Some(' ') => {
                if seen_change {
                    context_after += 1;
                } else {
                    context_before += 1;
                }
            }
            Some('-') => {
                seen_change = true;
                has_deletions = true;
                context_after = 0;
            }
            Some('+') => {
                seen_change = true;
                context_after = 0;
            }
            _ => {}
        }
    }

    if context_before >= 3 || context_after >= 3 {
        return true;
    }
    // Append-only exception: accepted with a logged warning (handled by caller).
    !has_deletions && context_before >= 1
}

/// Parses the hunk header `@@ -old_start,old_len +new_start,new_len @@`.
fn parse_header(line: &str) -> Option<(u64, u64, u64, u64)> {
    let re = Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap();
    let caps = re.captures(line)?;
    let old_start: u64 = caps[1].parse().ok()?;
    let old_len: u64 = caps.get(2).map(|m| m.as_str()).unwrap_or("1").parse().ok()?;
    let new_start: u64 = caps[3].parse().ok()?;
    let new_len: u64 = caps.get(4).map(|m| m.as_str()).unwrap_or("1").parse().ok()?;
    Some((old_start, old_len, new_start, new_len))
}

/// Parses a full diff body into structured hunks. Assumes `validate` has
/// already accepted the text.
pub fn parse(diff_text: &str) -> Result<Diff, String> {
    let raw_hunks = extract_raw_hunks(diff_text);
    let mut hunks = Vec::with_capacity(raw_hunks.len());

    for raw in raw_hunks {
        let (old_start, old_len, new_start, new_len) =
            parse_header(raw[0]).ok_or_else(|| format!("malformed hunk header: {}", raw[0]))?;
        let mut lines = Vec::new();
        for line in &raw[1..] {
            if line.is_empty() {
                continue;
            }
            let kind = LineKind::from_prefix(line.chars().next().unwrap())
                .ok_or_else(|| format!("malformed hunk line: {line}"))?;
            lines.push(DiffLine {
                kind,
                text: line[1..].to_string(),
            });
        }
        hunks.push(Hunk {
            old_start,
            old_len,
            new_start,
            new_len,
            lines,
        });
    }

    Ok(Diff {
        old_file: None,
        new_file: None,
        hunks,
    })
}

/// Builds the reverse of a hunk by swapping `+`/`-` prefixes; context and
/// no-newline markers pass through unchanged. Old/new start-len pairs swap
/// roles since the reverse hunk's "old" image is the forward hunk's "new".
fn reverse_hunk(hunk: &Hunk) -> Hunk {
    let lines = hunk
        .lines
        .iter()
        .map(|l| {
            let kind = match l.kind {
                LineKind::Addition => LineKind::Deletion,
                LineKind::Deletion => LineKind::Addition,
                other => other,
            };
            DiffLine {
                kind,
                text: l.text.clone(),
            }
        })
        .collect();
    Hunk {
        old_start: hunk.new_start,
        old_len: hunk.new_len,
        new_start: hunk.old_start,
        new_len: hunk.old_len,
        lines,
    }
}

pub fn render(diff: &Diff) -> String {
    let mut out = String::new();
    for hunk in &diff.hunks {
        out.push_str(&hunk.header());
        out.push('\n');
        for line in &hunk.lines {
            out.push(line.kind.prefix_char());
            out.push_str(&line.text);
            out.push('\n');
        }
    }
    out
}

pub fn reverse_diff_text(diff: &Diff) -> String {
    let reversed = Diff {
        old_file: diff.new_file.clone(),
        new_file: diff.old_file.clone(),
        hunks: diff.hunks.iter().map(reverse_hunk).collect(),
    };
    render(&reversed)
}

#[derive(Debug)]
pub struct ApplyOutcome {
    pub reverse_diff: String,
    pub created: bool,
}

/// Applies `diff_text` to `path`, returning the reverse diff computed from
/// the same parsed hunks used for the forward application. On any failure
/// the file is left untouched.
pub fn apply(path: &Path, diff_text: &str) -> Result<ApplyOutcome, String> {
    validate(diff_text)?;
    let diff = parse(diff_text)?;
    let reverse_diff = reverse_diff_text(&diff);

    let created = !path.exists();
    let original = if created {
        String::new()
    } else {
        fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?
    };

    let new_content = apply_hunks(&original, &diff.hunks, path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| format!("creating {}: {e}", parent.display()))?;
        }
    }
    fs::write(path, new_content).map_err(|e| format!("writing {}: {e}", path.display()))?;

    Ok(ApplyOutcome {
        reverse_diff,
        created,
    })
}

/// Applies hunks in order against `original`'s lines. Each hunk's old image
/// (context + deletions) must match the file content at `old_start` exactly;
/// a mismatch there is a hunk-apply failure, while an out-of-range
/// `old_start`/`old_len` is a line-count mismatch.
fn apply_hunks(original: &str, hunks: &[Hunk], path: &Path) -> Result<String, String> {
    let had_trailing_newline = original.ends_with('\n') || original.is_empty();
    let mut lines: Vec<String> = if original.is_empty() {
        Vec::new()
    } else {
        original.lines().map(str::to_string).collect()
    };

    // Apply in reverse hunk order so earlier offsets stay valid as length
    // changes from later hunks are applied first.
    let mut ordered: Vec<&Hunk> = hunks.iter().collect();
    ordered.sort_by(|a, b| b.old_start.cmp(&a.old_start));

    for hunk in ordered {
        if hunk.is_file_creation() {
            if !lines.is_empty() {
                return Err("hunk doesn't match file: file-creation hunk targets existing content".into());
            }
            lines = hunk
                .lines
                .iter()
                .filter(|l| l.kind != LineKind::NoNewline)
                .map(|l| l.text.clone())
                .collect();
            continue;
        }

        let start_idx = hunk.old_start.saturating_sub(1) as usize;
        if start_idx > lines.len() {
            return Err(format!(
                "no such line: hunk starts at line {} but {} has {} lines",
                hunk.old_start,
                path.display(),
                lines.len()
            ));
        }

        let mut cursor = start_idx;
        let mut replacement: Vec<String> = Vec::new();

        for line in &hunk.lines {
            match line.kind {
                LineKind::Context => {
                    if cursor >= lines.len() || lines[cursor] != line.text {
                        return Err(format!(
                            "hunk doesn't match file: context mismatch at line {}",
                            cursor + 1
                        ));
                    }
                    replacement.push(lines[cursor].clone());
                    cursor += 1;
                }
                LineKind::Deletion => {
                    if cursor >= lines.len() || lines[cursor] != line.text {
                        return Err(format!(
                            "hunk doesn't match file: deletion mismatch at line {}",
                            cursor + 1
                        ));
                    }
                    cursor += 1;
                }
                LineKind::Addition => {
                    replacement.push(line.text.clone());
                }
                LineKind::NoNewline => {}
            }
        }

        lines.splice(start_idx..cursor, replacement);
    }

    let mut joined = lines.join("\n");
    if had_trailing_newline && !joined.is_empty() {
        joined.push('\n');
    }
    Ok(joined)
}

/// Cheap line-count helper used to enrich error messages when the applier
/// reports a line-range mismatch. Returns 0 if the file does not exist.
pub fn line_count_hint(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn diff_with_lazy_placeholder() -> &'static str {
        "@@ -1,4 +1,4 @@\n x = 1\n-y = 2\n+y = 22\n // TODO: fix this\n z = 3\n"
    }

    #[test]
    fn rejects_lazy_placeholder() {
        assert_eq!(
            validate(diff_with_lazy_placeholder()),
            Err("contains lazy placeholder pattern".to_string())
        );
    }

    #[test]
    fn rejects_missing_hunk_header() {
        assert_eq!(
            validate(" x = 1\n-y = 2\n+y = 22\n"),
            Err("missing hunk header".to_string())
        );
    }

    #[test]
    fn rejects_malformed_line_prefix() {
        let diff = "@@ -1,4 +1,4 @@\n x = 1\n*y = 2\n+y = 22\n z = 3\n w = 4\n";
        assert_eq!(
            validate(diff),
            Err("lines must start with space, +, or -".to_string())
        );
    }

    #[test]
    fn rejects_insufficient_context() {
        let diff = "@@ -2,1 +2,1 @@\n-y = 2\n+y = 22\n";
        assert_eq!(
            validate(diff),
            Err("insufficient context lines".to_string())
        );
    }

    #[test]
    fn accepts_three_context_before() {
        let diff = "@@ -1,4 +1,4 @@\n x = 1\n y = 2\n z = 3\n-w = 4\n+w = 44\n";
        assert!(validate(diff).is_ok());
    }

    #[test]
    fn accepts_file_creation_hunk_without_context() {
        let diff = "@@ -0,0 +1,2 @@\n+line one\n+line two\n";
        assert!(validate(diff).is_ok());
    }

    #[test]
    fn accepts_append_only_with_one_context_line() {
        let diff = "@@ -4,1 +4,2 @@\n w = 4\n+v = 5\n";
        assert!(validate(diff).is_ok());
    }

    #[test]
    fn apply_edits_line_and_computes_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "x = 1\ny = 2\nz = 3\nw = 4\n").unwrap();

        let diff = "@@ -1,4 +1,4 @@\n x = 1\n y = 2\n z = 3\n-w = 4\n+w = 44\n";
        let outcome = apply(&path, diff).expect("apply succeeds");
        assert!(!outcome.created);

        let new_content = fs::read_to_string(&path).unwrap();
        assert_eq!(new_content, "x = 1\ny = 2\nz = 3\nw = 44\n");

        // Applying the reverse diff restores the original content.
        let restore = apply(&path, &outcome.reverse_diff).expect("reverse applies");
        let restored = fs::read_to_string(&path).unwrap();
        assert_eq!(restored, "x = 1\ny = 2\nz = 3\nw = 4\n");
        assert!(!restore.created);
    }

    #[test]
    fn rejects_hunk_with_deletions_and_combined_but_not_per_side_context() {
        // 1 line of leading context plus 2 of trailing is 3 combined, but
        // neither side alone reaches 3, and the hunk has a deletion so the
        // append-only exception doesn't apply either.
        let diff = "@@ -1,4 +1,4 @@\n x = 1\n-y = 2\n+y = 22\n z = 3\n w = 4\n";
        assert_eq!(
            validate(diff),
            Err("insufficient context lines".to_string())
        );
    }

    #[test]
    fn apply_creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.py");
        let diff = "@@ -0,0 +1,2 @@\n+a = 1\n+b = 2\n";
        let outcome = apply(&path, diff).expect("apply succeeds");
        assert!(outcome.created);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a = 1\nb = 2\n");
    }

    #[test]
    fn apply_fails_on_context_mismatch_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "x = 1\ny = 2\nz = 3\nw = 4\n").unwrap();

        let diff = "@@ -1,4 +1,4 @@\n x = 1\n nope = 9\n z = 3\n-w = 4\n+w = 44\n";
        let err = apply(&path, diff).unwrap_err();
        assert!(err.contains("hunk doesn't match file"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "x = 1\ny = 2\nz = 3\nw = 4\n");
    }

    #[test]
    fn apply_fails_on_out_of_range_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "x = 1\n").unwrap();

        let diff = "@@ -10,1 +10,1 @@\n x = 1\n-z = 9\n+z = 99\n";
        let err = apply(&path, diff).unwrap_err();
        assert!(err.contains("no such line"));
    }

    #[test]
    fn line_count_hint_counts_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        assert_eq!(line_count_hint(&path), 3);
    }

    #[test]
    fn line_count_hint_missing_file_is_zero() {
        let path = Path::new("/nonexistent/should/not/exist.py");
        assert_eq!(line_count_hint(path), 0);
    }
}
