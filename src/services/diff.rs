//! Line diff between two blueprint versions
//!
//! Longest-common-subsequence over lines. Common prefix and suffix are
//! stripped first so the quadratic table only covers the changed middle.
//! When that middle is still too large for the table, it is rendered as one
//! block of additions followed by one block of removals.

use serde::Serialize;

/// Upper bound on LCS table cells (4 bytes each)
pub const MAX_TABLE_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Equal,
    Added,
    Removed,
}

/// One rendered diff line. Line numbers are 1-based; `old_line` is absent
/// for additions and `new_line` for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

/// Diff `old` against `new` line by line.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    for i in 0..prefix {
        out.push(equal(a[i], i, i));
    }

    let (n, m) = (mid_a.len(), mid_b.len());
    if fits_table(n, m) {
        lcs_middle(mid_a, mid_b, prefix, &mut out);
    } else {
        for (j, text) in mid_b.iter().enumerate() {
            out.push(added(text, prefix + j));
        }
        for (i, text) in mid_a.iter().enumerate() {
            out.push(removed(text, prefix + i));
        }
    }

    for k in 0..suffix {
        let ai = a.len() - suffix + k;
        let bi = b.len() - suffix + k;
        out.push(equal(a[ai], ai, bi));
    }

    out
}

fn fits_table(n: usize, m: usize) -> bool {
    n.saturating_add(1)
        .checked_mul(m.saturating_add(1))
        .is_some_and(|cells| cells <= MAX_TABLE_CELLS)
}

fn lcs_middle(a: &[&str], b: &[&str], offset: usize, out: &mut Vec<DiffLine>) {
    // table[i][j] = LCS length of a[i..] and b[j..]
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            out.push(equal(a[i], offset + i, offset + j));
            i += 1;
            j += 1;
        } else if j < m && (i == n || table[i][j + 1] >= table[i + 1][j]) {
            out.push(added(b[j], offset + j));
            j += 1;
        } else {
            out.push(removed(a[i], offset + i));
            i += 1;
        }
    }
}

fn added(text: &str, new_index: usize) -> DiffLine {
    DiffLine {
        kind: DiffKind::Added,
        old_line: None,
        new_line: Some(new_index + 1),
        text: text.to_string(),
    }
}

fn removed(text: &str, old_index: usize) -> DiffLine {
    DiffLine {
        kind: DiffKind::Removed,
        old_line: Some(old_index + 1),
        new_line: None,
        text: text.to_string(),
    }
}

fn equal(text: &str, old_index: usize, new_index: usize) -> DiffLine {
    DiffLine {
        kind: DiffKind::Equal,
        old_line: Some(old_index + 1),
        new_line: Some(new_index + 1),
        text: text.to_string(),
    }
}

pub fn stats(lines: &[DiffLine]) -> DiffStats {
    lines.iter().fold(DiffStats::default(), |mut acc, line| {
        match line.kind {
            DiffKind::Added => acc.added += 1,
            DiffKind::Removed => acc.removed += 1,
            DiffKind::Equal => {}
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn side(lines: &[DiffLine], skip: DiffKind) -> Vec<String> {
        lines
            .iter()
            .filter(|l| l.kind != skip)
            .map(|l| l.text.clone())
            .collect()
    }

    #[test]
    fn test_identical() {
        let diff = diff_lines("a\nb\nc", "a\nb\nc");
        assert!(diff.iter().all(|l| l.kind == DiffKind::Equal));
        assert_eq!(stats(&diff), DiffStats::default());
    }

    #[test]
    fn test_changed_middle_line() {
        let diff = diff_lines("Begin Object\nX=1\nEnd Object", "Begin Object\nX=2\nEnd Object");
        let kinds: Vec<DiffKind> = diff.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![DiffKind::Equal, DiffKind::Added, DiffKind::Removed, DiffKind::Equal]
        );
        assert_eq!(diff[1].new_line, Some(2));
        assert_eq!(diff[2].old_line, Some(2));
        assert_eq!(diff[3].old_line, Some(3));
        assert_eq!(diff[3].new_line, Some(3));
        assert_eq!(stats(&diff), DiffStats { added: 1, removed: 1 });
    }

    #[test]
    fn test_empty_sides() {
        let added = diff_lines("", "a\nb");
        assert_eq!(stats(&added), DiffStats { added: 2, removed: 0 });
        let removed = diff_lines("a\nb", "");
        assert_eq!(stats(&removed), DiffStats { added: 0, removed: 2 });
    }

    #[test]
    fn test_table_bound() {
        assert!(fits_table(1999, 1999));
        assert!(!fits_table(2000, 2000));
        assert!(!fits_table(usize::MAX, 2));
    }

    #[test]
    fn test_large_dissimilar_versions_fall_back_to_blocks() {
        let n = 20_000;
        let old: String = (0..n).map(|i| format!("   NodePosX={}\n", i)).collect();
        let new: String = (0..n).map(|i| format!("   NodePosY={}\n", i)).collect();
        let old = format!("Begin Object\n{}End Object", old);
        let new = format!("Begin Object\n{}End Object", new);

        let started = std::time::Instant::now();
        let diff = diff_lines(&old, &new);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        assert_eq!(diff.len(), 2 * n + 2);
        assert_eq!(stats(&diff), DiffStats { added: n, removed: n });
        assert_eq!(diff[0].kind, DiffKind::Equal);
        assert!(diff[1..=n].iter().all(|l| l.kind == DiffKind::Added));
        assert!(diff[n + 1..=2 * n].iter().all(|l| l.kind == DiffKind::Removed));
        assert_eq!(diff[1].new_line, Some(2));
        assert_eq!(diff[n + 1].old_line, Some(2));
        assert_eq!(diff[2 * n + 1].old_line, Some(n + 2));
        assert_eq!(diff[2 * n + 1].new_line, Some(n + 2));
    }

    proptest! {
        #[test]
        fn diff_reconstructs_both_sides(
            old in prop::collection::vec("[abc]{0,2}", 0..20),
            new in prop::collection::vec("[abc]{0,2}", 0..20),
        ) {
            let old_text = old.join("\n");
            let new_text = new.join("\n");
            let diff = diff_lines(&old_text, &new_text);

            let old_lines: Vec<String> = old_text.lines().map(String::from).collect();
            let new_lines: Vec<String> = new_text.lines().map(String::from).collect();
            prop_assert_eq!(side(&diff, DiffKind::Added), old_lines);
            prop_assert_eq!(side(&diff, DiffKind::Removed), new_lines);
        }
    }
}
