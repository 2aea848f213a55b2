//! Statement splitter
//!
//! Splits a script on `;` outside of quoted strings, quoted identifiers,
//! comments and `$tag$` dollar-quoted bodies. Unterminated quoting is
//! tolerated: the rest of the input becomes the final statement.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Split raw SQL into trimmed, non-empty statements (terminators removed)
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = State::Normal;
    // Closing token of the dollar-quoted body we are inside, if any
    let mut dollar_tag: Option<&str> = None;
    let mut start = 0;
    let mut i = 0;

    let flush = |from: usize, to: usize, out: &mut Vec<String>| {
        let stmt = sql[from..to].trim();
        if !stmt.is_empty() {
            out.push(stmt.to_string());
        }
    };

    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        if let Some(tag) = dollar_tag {
            if bytes[i..].starts_with(tag.as_bytes()) {
                i += tag.len();
                dollar_tag = None;
            } else {
                i += 1;
            }
            continue;
        }

        match state {
            State::LineComment => {
                if c == b'\n' {
                    state = State::Normal;
                }
                i += 1;
            }
            State::BlockComment => {
                if c == b'*' && next == Some(b'/') {
                    state = State::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            State::SingleQuote | State::DoubleQuote => {
                let quote = if state == State::SingleQuote { b'\'' } else { b'"' };
                if c == quote {
                    if next == Some(quote) {
                        // doubled quote is an escaped quote
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
                i += 1;
            }
            State::Normal => match c {
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    i += 2;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    i += 2;
                }
                b'\'' => {
                    state = State::SingleQuote;
                    i += 1;
                }
                b'"' => {
                    state = State::DoubleQuote;
                    i += 1;
                }
                b'$' => match dollar_tag_at(sql, i) {
                    Some(tag) => {
                        dollar_tag = Some(tag);
                        i += tag.len();
                    }
                    None => i += 1,
                },
                b';' => {
                    flush(start, i, &mut statements);
                    i += 1;
                    start = i;
                }
                _ => i += 1,
            },
        }
    }
    flush(start, bytes.len(), &mut statements);

    statements
}

/// `$tag$` opening at byte `pos` (tag may be empty: `$$`)
fn dollar_tag_at(sql: &str, pos: usize) -> Option<&str> {
    let rest = &sql[pos + 1..];
    let end = rest.find('$')?;
    let tag = &rest[..end];
    if tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Some(&sql[pos..pos + end + 2])
    } else {
        None
    }
}

/// Remove leading whitespace and `--` / `/* */` comments
pub fn strip_leading_comments(stmt: &str) -> &str {
    let mut rest = stmt.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(nl) => after[nl + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(end) => after[end + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// Upper-cased leading keywords of a statement, comments skipped
pub fn leading_keywords(stmt: &str, n: usize) -> Vec<String> {
    strip_leading_comments(stmt)
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .take(n)
        .map(|w| w.to_ascii_uppercase())
        .collect()
}

/// True when the statement begins with exactly these keywords (case-insensitive)
pub fn starts_with_keywords(stmt: &str, keywords: &[&str]) -> bool {
    let words = leading_keywords(stmt, keywords.len());
    words.len() == keywords.len() && words.iter().zip(keywords).all(|(w, k)| w == k)
}
