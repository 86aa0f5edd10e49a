//! File targets named by a diff.
//!
//! Recognizes `diff --git` headers, unified `---`/`+++` header pairs,
//! context-diff `***`/`---` header pairs, git rename/copy metadata and
//! `Index:` lines. Hunk bodies are never mistaken for headers because a
//! header line only counts when its partner line follows it.

const DEV_NULL: &str = "/dev/null";

/// Unique target paths in first-seen order, exactly as written in the diff
pub fn extract(diff: &str) -> Vec<String> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut targets: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        if let Some(path) = clean(raw) {
            if !targets.contains(&path) {
                targets.push(path);
            }
        }
    };

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let next = lines.get(i + 1).copied();

        if let Some(rest) = line.strip_prefix("diff --git ") {
            let (old, new) = split_git_header(rest);
            push(old);
            if let Some(new) = new {
                push(new);
            }
        } else if let Some(old) = line.strip_prefix("--- ") {
            if let Some(new) = next.and_then(|n| n.strip_prefix("+++ ")) {
                push(old);
                push(new);
                i += 2;
                continue;
            }
        } else if let Some(old) = line.strip_prefix("*** ") {
            let is_range = line.trim_end().ends_with("****");
            let partner = next
                .filter(|n| !n.trim_end().ends_with("----"))
                .and_then(|n| n.strip_prefix("--- "));
            if let (false, Some(new)) = (is_range, partner) {
                push(old);
                push(new);
                i += 2;
                continue;
            }
        } else if let Some(path) = line
            .strip_prefix("rename from ")
            .or_else(|| line.strip_prefix("rename to "))
            .or_else(|| line.strip_prefix("copy from "))
            .or_else(|| line.strip_prefix("copy to "))
            .or_else(|| line.strip_prefix("Index: "))
        {
            push(path);
        }

        i += 1;
    }

    targets
}

/// Drop the first path component, as `patch -p1` and `git apply` do
pub fn strip_one(path: &str) -> Option<&str> {
    let trimmed = path.trim_start_matches('/');
    trimmed
        .split_once('/')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}

fn split_git_header(rest: &str) -> (&str, Option<&str>) {
    let rest = rest.trim();
    match rest.rfind(" b/") {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => match rest.split_once(' ') {
            Some((old, new)) => (old, Some(new)),
            None => (rest, None),
        },
    }
}

fn clean(raw: &str) -> Option<String> {
    // Unified headers may carry a tab-separated timestamp
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    let path = path
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path);

    if path.is_empty() || path == DEV_NULL {
        return None;
    }
    Some(path.to_string())
}
