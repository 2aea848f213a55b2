//! Grouping statements into transactional blocks

use super::error::BlockError;
use super::splitter::leading_keywords;

/// Statements validated inside one transaction
pub type Block = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Begin,
    End,
}

/// Classify a statement as an explicit transaction marker
///
/// `BEGIN` and `START TRANSACTION` (with any modifiers) open a block;
/// `COMMIT`, `END`, `ROLLBACK` (optionally followed by `TRANSACTION`/`WORK`)
/// close one. `ROLLBACK TO SAVEPOINT` is an ordinary statement.
pub fn transaction_marker(stmt: &str) -> Option<Marker> {
    let words = leading_keywords(stmt.trim().trim_end_matches(';'), 3);
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["BEGIN", ..] | ["START", "TRANSACTION", ..] => Some(Marker::Begin),
        ["COMMIT" | "END" | "ROLLBACK"] | ["COMMIT" | "END" | "ROLLBACK", "TRANSACTION" | "WORK"] => {
            Some(Marker::End)
        }
        _ => None,
    }
}

/// Group statements by explicit `BEGIN`…`COMMIT` markers
///
/// Bracketed statements form one block each (markers dropped), un-bracketed
/// statements form singleton blocks. Empty bracketed blocks are dropped.
///
/// # Errors
///
/// Nested `BEGIN`, `COMMIT` without `BEGIN` and an unterminated trailing
/// `BEGIN` are rejected.
pub fn parse_transaction_blocks(statements: Vec<String>) -> Result<Vec<Block>, BlockError> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, Block)> = None;

    for (index, stmt) in statements.into_iter().enumerate() {
        match (transaction_marker(&stmt), open.take()) {
            (Some(Marker::Begin), Some(_)) => return Err(BlockError::NestedBegin { index }),
            (Some(Marker::Begin), None) => open = Some((index, Vec::new())),
            (Some(Marker::End), None) => return Err(BlockError::CommitWithoutBegin { index }),
            (Some(Marker::End), Some((_, block))) => {
                if !block.is_empty() {
                    blocks.push(block);
                }
            }
            (None, Some((at, mut block))) => {
                block.push(stmt);
                open = Some((at, block));
            }
            (None, None) => blocks.push(vec![stmt]),
        }
    }

    match open {
        Some((index, _)) => Err(BlockError::UnterminatedBegin { index }),
        None => Ok(blocks),
    }
}

/// One block per statement
pub fn singleton_blocks(statements: Vec<String>) -> Vec<Block> {
    statements.into_iter().map(|s| vec![s]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bracketed_and_trailing_statement() {
        let blocks = parse_transaction_blocks(strings(&[
            "BEGIN",
            "CREATE TABLE a(id int);",
            "INSERT INTO a VALUES(1);",
            "COMMIT",
            "SELECT 1;",
        ]))
        .unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], strings(&["CREATE TABLE a(id int);", "INSERT INTO a VALUES(1);"]));
        assert_eq!(blocks[1], strings(&["SELECT 1;"]));
    }

    #[test]
    fn test_unbracketed_statements_are_singletons() {
        let blocks = parse_transaction_blocks(strings(&["SELECT 1", "SELECT 2", "start transaction", "SELECT 3", "end"]))
            .unwrap();
        assert_eq!(blocks, vec![strings(&["SELECT 1"]), strings(&["SELECT 2"]), strings(&["SELECT 3"])]);
    }

    #[test]
    fn test_marker_errors() {
        assert_eq!(
            parse_transaction_blocks(strings(&["BEGIN", "SELECT 1", "BEGIN"])),
            Err(BlockError::NestedBegin { index: 2 })
        );
        assert_eq!(
            parse_transaction_blocks(strings(&["SELECT 1", "COMMIT"])),
            Err(BlockError::CommitWithoutBegin { index: 1 })
        );
        assert_eq!(
            parse_transaction_blocks(strings(&["SELECT 1", "BEGIN TRANSACTION", "SELECT 2"])),
            Err(BlockError::UnterminatedBegin { index: 1 })
        );
    }

    #[test]
    fn test_transaction_marker_is_not_fooled_by_plpgsql() {
        assert_eq!(transaction_marker("begin;"), Some(Marker::Begin));
        assert_eq!(transaction_marker("ROLLBACK WORK"), Some(Marker::End));
        assert_eq!(transaction_marker("DO $$ BEGIN PERFORM 1; END $$"), None);
        assert_eq!(transaction_marker("BEGIN ISOLATION LEVEL SERIALIZABLE"), Some(Marker::Begin));
        assert_eq!(transaction_marker("ROLLBACK TO SAVEPOINT sp1"), None);
    }
}
