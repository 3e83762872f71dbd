//! Static checks over every SQL literal in the panel and the db crate.

use std::fs;
use std::path::{Path, PathBuf};

fn source_roots() -> Vec<PathBuf> {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    vec![manifest.join("src"), manifest.join("../../libs/netbill-db/src")]
}

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn line_of(content: &str, byte_idx: usize) -> usize {
    content[..byte_idx].bytes().filter(|b| *b == b'\n').count() + 1
}

/// String literal starting at `at` (after whitespace), plain or raw.
fn literal_at(content: &str, mut at: usize) -> Option<String> {
    let bytes = content.as_bytes();
    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    match bytes.get(at)? {
        b'r' => {
            let hashes = bytes[at + 1..].iter().take_while(|b| **b == b'#').count();
            let quote = at + 1 + hashes;
            if bytes.get(quote) != Some(&b'"') {
                return None;
            }
            let terminator = format!("\"{}", "#".repeat(hashes));
            let body = quote + 1;
            let end = content[body..].find(&terminator)?;
            Some(content[body..body + end].to_string())
        }
        b'"' => {
            let body = at + 1;
            let mut escaped = false;
            for (offset, b) in bytes[body..].iter().enumerate() {
                match (escaped, *b) {
                    (true, _) => escaped = false,
                    (false, b'\\') => escaped = true,
                    (false, b'"') => return Some(content[body..body + offset].to_string()),
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}

/// Every `(file:line, literal)` whose literal is the first argument of `marker(`.
fn literals_after(marker: &str) -> Vec<(String, String)> {
    let mut files = Vec::new();
    for root in source_roots() {
        rust_files(&root, &mut files);
    }

    let mut found = Vec::new();
    for file in files {
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        let mut pos = 0;
        while let Some(rel) = content[pos..].find(marker) {
            let idx = pos + rel;
            pos = idx + marker.len();
            let Some(paren) = content[pos..].find('(') else {
                break;
            };
            if let Some(sql) = literal_at(&content, pos + paren + 1) {
                found.push((format!("{}:{}", file.display(), line_of(&content, idx)), sql));
            }
        }
    }
    found
}

#[test]
fn queries_use_postgres_placeholders() {
    let violations: Vec<String> = literals_after("sqlx::query")
        .into_iter()
        .filter(|(_, sql)| sql.contains('?'))
        .map(|(at, _)| format!("{} uses a '?' placeholder", at))
        .collect();

    assert!(violations.is_empty(), "Non-Postgres placeholders:\n{}", violations.join("\n"));
}

#[test]
fn sql_is_never_assembled_with_format() {
    const VERBS: [&str; 4] = ["select ", "insert ", "update ", "delete "];
    let violations: Vec<String> = literals_after("format!")
        .into_iter()
        .filter(|(_, text)| {
            let head = text.trim_start().to_lowercase();
            VERBS.iter().any(|verb| head.starts_with(verb))
        })
        .map(|(at, _)| format!("{} builds SQL with format!", at))
        .collect();

    assert!(violations.is_empty(), "Interpolated SQL found:\n{}", violations.join("\n"));
}

#[test]
fn scanner_finds_queries() {
    assert!(
        literals_after("sqlx::query").len() > 50,
        "SQL scanner found suspiciously few queries"
    );
}
