//! Versioned migration files.
//!
//! A migration is an immutable unit of schema change identified by a positive
//! integer version. On disk it lives in a file named
//! `V{version}__{description}.sql`, e.g. `V3__create_comments_table.sql`.
//!
//! Once a migration has been applied to any environment its contents must not
//! change. Corrections ship as a new migration with a higher version; the
//! checksum recorded in the ledger is how edits are detected.

use sha2::{Digest, Sha256};

use crate::error::DiscoveryError;

const VERSION_PREFIX: char = 'V';
const SEPARATOR: &str = "__";
const EXTENSION: &str = ".sql";

/// A single versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: i64,
    description: String,
    script: String,
    checksum: String,
    source: String,
}

impl Migration {
    /// Creates a migration from its parts.
    ///
    /// The version and description follow the same rules as file names: the
    /// version must be positive and the description must not be blank. The
    /// source is a synthetic file name built from both.
    pub fn new(
        version: i64,
        description: impl Into<String>,
        script: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let description = description.into();
        let script = script.into();
        let source = format!(
            "{VERSION_PREFIX}{version}{SEPARATOR}{}{EXTENSION}",
            description.replace(' ', "_")
        );
        if version <= 0 {
            return Err(invalid_name(&source, "version must be greater than zero"));
        }
        if description.trim().is_empty() {
            return Err(invalid_name(&source, "description is empty"));
        }
        Ok(Self {
            checksum: checksum(&script),
            version,
            description,
            script,
            source,
        })
    }

    /// Creates a migration from a file name following the
    /// `V{version}__{description}.sql` convention and the file contents.
    pub fn from_file(
        file_name: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let file_name = file_name.into();
        let (version, description) = Self::parse_file_name(&file_name)?;
        let script = contents.into();
        Ok(Self {
            checksum: checksum(&script),
            version,
            description,
            script,
            source: file_name,
        })
    }

    /// Parses a migration file name into its version and description.
    ///
    /// Underscores in the description are turned into spaces, so
    /// `V1__create_users_table.sql` yields `(1, "create users table")`.
    pub fn parse_file_name(file_name: &str) -> Result<(i64, String), DiscoveryError> {
        let invalid = |reason: &str| invalid_name(file_name, reason);

        let stem = file_name
            .strip_suffix(EXTENSION)
            .ok_or_else(|| invalid("missing .sql extension"))?;
        let stem = stem
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| invalid("name must start with 'V'"))?;
        let (version, description) = stem
            .split_once(SEPARATOR)
            .ok_or_else(|| invalid("missing '__' between version and description"))?;

        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("version must be an integer"));
        }
        let version: i64 = version
            .parse()
            .map_err(|_| invalid("version does not fit in a 64-bit integer"))?;
        if version <= 0 {
            return Err(invalid("version must be greater than zero"));
        }

        let description = description.replace('_', " ").trim().to_string();
        if description.is_empty() {
            return Err(invalid("description is empty"));
        }

        Ok((version, description))
    }

    /// The version of this migration.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Human-readable description, e.g. `create users table`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The raw SQL script.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Hex encoded SHA-256 of the script, used for tamper detection.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Where this migration came from (file name or path).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The individual statements of the script, in order.
    pub fn statements(&self) -> Vec<&str> {
        split_statements(&self.script)
    }
}

fn invalid_name(file_name: &str, reason: &str) -> DiscoveryError {
    DiscoveryError::InvalidFileName {
        file_name: file_name.to_string(),
        reason: reason.to_string(),
    }
}

/// Computes the checksum of a migration script.
///
/// Line endings are normalized first so that a CRLF checkout of an unchanged
/// file keeps the checksum recorded from an LF checkout.
pub fn checksum(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.replace("\r\n", "\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Splits a SQL script into statements on top-level semicolons.
///
/// Semicolons inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies do not terminate a statement. Fragments holding only
/// whitespace or comments are dropped.
pub fn split_statements(script: &str) -> Vec<&str> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' if is_escape_string(bytes, i) => i = skip_escape_string(bytes, i),
            b'\'' | b'"' => i = skip_quoted(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => match dollar_tag_end(bytes, i) {
                Some(tag_end) => i = skip_dollar_quoted(bytes, i, tag_end),
                None => i += 1,
            },
            b';' => {
                let fragment = script[start..i].trim();
                if !is_blank(fragment) {
                    statements.push(fragment);
                }
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }

    let fragment = script[start..].trim();
    if !is_blank(fragment) {
        statements.push(fragment);
    }

    statements
}

fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // A doubled quote is an escaped quote.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Whether the quote at `quote` opens an `E'...'` escape string.
fn is_escape_string(bytes: &[u8], quote: usize) -> bool {
    match quote.checked_sub(1).map(|p| bytes[p]) {
        Some(b'E' | b'e') => quote < 2 || !is_identifier_byte(bytes[quote - 2]),
        _ => false,
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

// Backslash escapes the next byte, and a doubled quote still works.
fn skip_escape_string(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|offset| start + offset + 1)
        .unwrap_or(bytes.len())
}

// Postgres block comments nest.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Returns the index just past the opening `$tag$` if one starts at `start`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'$') => return Some(i + 1),
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => i += 1,
        _ => return None,
    }
    while let Some(&b) = bytes.get(i) {
        if b == b'$' {
            return Some(i + 1);
        }
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        i += 1;
    }
    None
}

fn skip_dollar_quoted(bytes: &[u8], start: usize, tag_end: usize) -> usize {
    let tag = &bytes[start..tag_end];
    bytes[tag_end..]
        .windows(tag.len())
        .position(|window| window == tag)
        .map(|offset| tag_end + offset + tag.len())
        .unwrap_or(bytes.len())
}

fn is_blank(fragment: &str) -> bool {
    let bytes = fragment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else if bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-') {
            i = skip_line_comment(bytes, i);
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = skip_block_comment(bytes, i);
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_name() {
        let (version, description) =
            Migration::parse_file_name("V1__create_users_table.sql").unwrap();
        assert_eq!(version, 1);
        assert_eq!(description, "create users table");
    }

    #[test]
    fn parses_large_and_padded_versions() {
        assert_eq!(Migration::parse_file_name("V042__x.sql").unwrap().0, 42);
        assert_eq!(
            Migration::parse_file_name("V20240101__seed.sql").unwrap().0,
            20240101
        );
    }

    #[test]
    fn rejects_malformed_file_names() {
        for name in [
            "V1_create_users.sql",
            "1__create_users.sql",
            "V__create_users.sql",
            "V1__.sql",
            "V1__create_users.txt",
            "Vx__create_users.sql",
            "V0__zero.sql",
            "V-1__negative.sql",
            "V99999999999999999999__overflow.sql",
        ] {
            let err = Migration::parse_file_name(name).unwrap_err();
            assert!(
                matches!(err, DiscoveryError::InvalidFileName { ref file_name, .. } if file_name == name),
                "{name} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn from_file_keeps_source_and_checksum() {
        let migration = Migration::from_file("V2__create_posts_table.sql", "SELECT 1;").unwrap();
        assert_eq!(migration.version(), 2);
        assert_eq!(migration.description(), "create posts table");
        assert_eq!(migration.source(), "V2__create_posts_table.sql");
        assert_eq!(migration.checksum(), checksum("SELECT 1;"));
    }

    #[test]
    fn new_builds_synthetic_source() {
        let migration = Migration::new(7, "add index", "SELECT 1").unwrap();
        assert_eq!(migration.source(), "V7__add_index.sql");
    }

    #[test]
    fn new_applies_file_name_rules() {
        for (version, description) in [(0, "zero"), (-3, "negative"), (4, "  ")] {
            let err = Migration::new(version, description, "SELECT 1").unwrap_err();
            assert!(
                matches!(err, DiscoveryError::InvalidFileName { .. }),
                "({version}, {description:?}) should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn checksum_is_sha256_hex() {
        let sum = checksum("CREATE TABLE t (id INT);");
        assert_eq!(sum.len(), 64);
        assert!(sum.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(sum, checksum("CREATE TABLE t (id INT);"));
        assert_ne!(sum, checksum("CREATE TABLE t (id BIGINT);"));
    }

    #[test]
    fn checksum_ignores_line_ending_style() {
        assert_eq!(
            checksum("CREATE TABLE t (\n  id INT\n);\n"),
            checksum("CREATE TABLE t (\r\n  id INT\r\n);\r\n")
        );
    }

    #[test]
    fn splits_simple_statements() {
        let statements = split_statements(
            "CREATE TABLE a (id INT);\nCREATE INDEX idx_a ON a (id);\n",
        );
        assert_eq!(
            statements,
            vec!["CREATE TABLE a (id INT)", "CREATE INDEX idx_a ON a (id)"]
        );
    }

    #[test]
    fn keeps_trailing_statement_without_semicolon() {
        assert_eq!(split_statements("SELECT 1; SELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn ignores_semicolons_in_literals_and_comments() {
        let script = r#"
            -- leading comment; still a comment
            INSERT INTO t (v) VALUES ('a;b', 'it''s;');
            /* block; /* nested; */ still comment; */
            SELECT "odd;name" FROM t;
        "#;
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("VALUES ('a;b', 'it''s;')"));
        assert!(statements[1].starts_with("/* block;"));
        assert!(statements[1].ends_with(r#"SELECT "odd;name" FROM t"#));
    }

    #[test]
    fn backslash_escapes_only_inside_escape_strings() {
        assert_eq!(
            split_statements("INSERT INTO t (v) VALUES (E'it\\'s; fine'); SELECT 1;"),
            vec!["INSERT INTO t (v) VALUES (E'it\\'s; fine')", "SELECT 1"]
        );
        assert_eq!(
            split_statements("SELECT e'a\\\\'; SELECT 2"),
            vec!["SELECT e'a\\\\'", "SELECT 2"]
        );
        // A plain literal ending in a backslash, and an identifier ending in E
        assert_eq!(
            split_statements("SELECT 'c:\\'; SELECT name'x;y' FROM t"),
            vec!["SELECT 'c:\\'", "SELECT name'x;y' FROM t"]
        );
    }

    #[test]
    fn keeps_dollar_quoted_bodies_whole() {
        let script = r#"
            CREATE FUNCTION touch() RETURNS trigger AS $body$
            BEGIN
                NEW.updated_at = NOW();
                RETURN NEW;
            END;
            $body$ LANGUAGE plpgsql;
            DO $$ BEGIN PERFORM 1; END $$;
        "#;
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("LANGUAGE plpgsql"));
        assert!(statements[1].starts_with("DO $$"));
    }

    #[test]
    fn positional_parameters_are_not_dollar_quotes() {
        assert_eq!(
            split_statements("SELECT $1; SELECT $2"),
            vec!["SELECT $1", "SELECT $2"]
        );
    }

    #[test]
    fn drops_empty_and_comment_only_fragments() {
        let statements = split_statements(";; -- nothing here\n ; /* nor here */ ;");
        assert!(statements.is_empty());
    }
}
