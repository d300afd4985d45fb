//! Statement splitting for migration scripts.
//!
//! A script is cut on `;` only at the top level. Terminators inside string
//! literals, quoted identifiers, comments, PostgreSQL dollar-quoted and
//! `BEGIN ATOMIC ... END` bodies and trigger bodies (`BEGIN ... END`) are kept
//! inside their statement. Block comments nest on PostgreSQL only.

use crate::db::Backend;

/// One independently executable statement of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 1-based position within the script.
    pub index: usize,
    /// 1-based line where the statement's first token sits.
    pub line: usize,
    /// Statement text without the terminator, trimmed.
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote { backslash_escapes: bool },
    DoubleQuote,
    Backtick,
    Bracket,
    LineComment,
    BlockComment { depth: usize },
    DollarQuote { tag: String },
}

/// Tracks the keywords of the current statement so trigger and
/// `BEGIN ATOMIC` bodies can be recognised.
#[derive(Debug, Default)]
struct BlockTracker {
    leading: Vec<String>,
    previous: String,
    is_trigger: bool,
    is_atomic: bool,
    depth: usize,
}

impl BlockTracker {
    const LEADING_WORDS: usize = 4;

    fn word(&mut self, word: &str) {
        let upper = word.to_ascii_uppercase();

        if self.leading.len() < Self::LEADING_WORDS {
            self.leading.push(upper.clone());
            self.is_trigger = self.leading.first().map(String::as_str) == Some("CREATE")
                && self.leading.iter().any(|w| w == "TRIGGER");
        }

        if self.is_trigger {
            match upper.as_str() {
                "BEGIN" | "CASE" => self.depth += 1,
                "END" => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        } else if upper == "ATOMIC" && self.previous == "BEGIN" {
            self.is_atomic = true;
            self.depth += 1;
        } else if self.is_atomic {
            match upper.as_str() {
                "CASE" => self.depth += 1,
                "END" => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }

        self.previous = upper;
    }

    fn in_block(&self) -> bool {
        self.depth > 0
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// If a dollar-quote tag (`$$` or `$name$`) opens at `i`, return the index of
/// its closing `$`.
fn dollar_tag_end(chars: &[(usize, char)], i: usize) -> Option<usize> {
    // `a$b$` is an identifier, not a tag
    if i > 0 && (is_word_char(chars[i - 1].1) || chars[i - 1].1 == '$') {
        return None;
    }

    let mut j = i + 1;
    while j < chars.len() && is_word_char(chars[j].1) {
        j += 1;
    }

    match chars.get(j) {
        Some(&(_, '$')) => {
            // `$1$` is not a tag: tags cannot start with a digit
            let starts_with_digit = j > i + 1 && chars[i + 1].1.is_ascii_digit();
            (!starts_with_digit).then_some(j)
        }
        _ => None,
    }
}

fn push_statement(statements: &mut Vec<Statement>, text: &str, first_line: Option<usize>) {
    let Some(first_line) = first_line else {
        return;
    };
    let text = text.trim();
    if !text.is_empty() {
        statements.push(Statement {
            index: statements.len() + 1,
            line: first_line,
            sql: text.to_string(),
        });
    }
}

/// Split a script into its top-level statements using SQLite comment rules.
///
/// Empty and comment-only segments are dropped; a final statement without a
/// terminator is kept.
pub fn split_statements(sql: &str) -> Vec<Statement> {
    split_statements_for(sql, Backend::Sqlite)
}

/// Split a script for `backend`. PostgreSQL block comments nest.
pub fn split_statements_for(sql: &str, backend: Backend) -> Vec<Statement> {
    let nested_comments = backend == Backend::Postgres;
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|&(b, _)| b).unwrap_or(sql.len());
    let char_at = |i: usize| chars.get(i).map(|&(_, c)| c);

    let mut statements = Vec::new();
    let mut state = State::Normal;
    let mut tracker = BlockTracker::default();
    let mut word = String::new();

    let mut start = 0usize;
    let mut line = 1usize;
    let mut first_line: Option<usize> = None;

    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i].1;
        let next = char_at(i + 1);

        if state == State::Normal {
            if is_word_char(c) {
                word.push(c);
            } else if !word.is_empty() {
                tracker.word(&word);
                word.clear();
            }
        }

        match &state {
            State::Normal => match c {
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment { depth: 1 };
                    i += 2;
                    continue;
                }
                ';' if !tracker.in_block() => {
                    push_statement(&mut statements, &sql[start..chars[i].0], first_line);
                    start = byte_at(i + 1);
                    first_line = None;
                    tracker = BlockTracker::default();
                }
                _ => {
                    if !c.is_whitespace() && first_line.is_none() {
                        first_line = Some(line);
                    }
                    match c {
                        '\'' => {
                            // E'...' strings accept backslash escapes
                            let backslash_escapes = i >= 1
                                && matches!(chars[i - 1].1, 'E' | 'e')
                                && (i < 2 || !is_word_char(chars[i - 2].1));
                            state = State::SingleQuote { backslash_escapes };
                        }
                        '"' => state = State::DoubleQuote,
                        '`' => state = State::Backtick,
                        '[' => state = State::Bracket,
                        '$' => {
                            if let Some(end) = dollar_tag_end(&chars, i) {
                                state = State::DollarQuote {
                                    tag: sql[chars[i].0..byte_at(end + 1)].to_string(),
                                };
                                i = end + 1;
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            },
            State::SingleQuote { backslash_escapes } => {
                if *backslash_escapes && c == '\\' {
                    if next == Some('\n') {
                        line += 1;
                    }
                    i += 2;
                    continue;
                }
                if c == '\'' {
                    if next == Some('\'') {
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    if next == Some('"') {
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::Backtick => {
                if c == '`' {
                    if next == Some('`') {
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::Bracket => {
                if c == ']' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment { depth } => {
                if c == '*' && next == Some('/') {
                    state = match depth {
                        1 => State::Normal,
                        _ => State::BlockComment { depth: depth - 1 },
                    };
                    i += 2;
                    continue;
                }
                if nested_comments && c == '/' && next == Some('*') {
                    state = State::BlockComment { depth: depth + 1 };
                    i += 2;
                    continue;
                }
            }
            State::DollarQuote { tag } => {
                if c == '$' && sql[chars[i].0..].starts_with(tag.as_str()) {
                    let tag_chars = tag.chars().count();
                    state = State::Normal;
                    i += tag_chars;
                    continue;
                }
            }
        }

        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    push_statement(&mut statements, &sql[start..], first_line);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_of(stmts: &[Statement]) -> Vec<&str> {
        stmts.iter().map(|s| s.sql.as_str()).collect()
    }

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_statements("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(sql_of(&stmts), vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
        assert_eq!(
            stmts.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_split_drops_empty_segments() {
        let stmts = split_statements("CREATE TABLE a(id INT);;\n  ;\n\nCREATE TABLE b(id INT);\n\n");
        assert_eq!(
            sql_of(&stmts),
            vec!["CREATE TABLE a(id INT)", "CREATE TABLE b(id INT)"]
        );
        assert_eq!(stmts[1].index, 2);
    }

    #[test]
    fn test_split_keeps_unterminated_tail() {
        let stmts = split_statements("ALTER TABLE a ADD COLUMN name TEXT; SELECT 1");
        assert_eq!(
            sql_of(&stmts),
            vec!["ALTER TABLE a ADD COLUMN name TEXT", "SELECT 1"]
        );
    }

    #[test]
    fn test_split_empty_script() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  \n\t ").is_empty());
    }

    #[test]
    fn test_terminator_inside_single_quotes() {
        let stmts = split_statements(
            "INSERT INTO notes(body) VALUES ('a; b'); INSERT INTO notes(body) VALUES ('it''s; fine');",
        );
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].sql, "INSERT INTO notes(body) VALUES ('a; b')");
        assert_eq!(stmts[1].sql, "INSERT INTO notes(body) VALUES ('it''s; fine')");
    }

    #[test]
    fn test_terminator_inside_quoted_identifiers() {
        let stmts = split_statements(
            "CREATE TABLE \"odd;name\"(id INT); CREATE TABLE `tick;name`(id INT); CREATE TABLE [br;acket](id INT);",
        );
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].sql.contains("\"odd;name\""));
        assert!(stmts[1].sql.contains("`tick;name`"));
        assert!(stmts[2].sql.contains("[br;acket]"));
    }

    #[test]
    fn test_backslash_escape_only_in_e_strings() {
        // a plain literal ending in a backslash closes normally
        let stmts = split_statements(r"INSERT INTO paths VALUES ('C:\'); SELECT 2;");
        assert_eq!(stmts.len(), 2);

        let stmts = split_statements(r"INSERT INTO t VALUES (E'quote \'; still inside'); SELECT 2;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].sql, r"INSERT INTO t VALUES (E'quote \'; still inside')");
    }

    #[test]
    fn test_terminator_inside_comments() {
        let sql = r#"
-- add colleges; then users
CREATE TABLE colleges(id INT); /* users; later */
CREATE TABLE users(id INT);
"#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.starts_with("-- add colleges; then users"));
        assert!(stmts[0].sql.ends_with("CREATE TABLE colleges(id INT)"));
        assert!(stmts[1].sql.starts_with("/* users; later */"));
    }

    #[test]
    fn test_comment_only_segments_dropped() {
        let stmts = split_statements("SELECT 1;\n-- trailing note\n/* and a block */\n");
        assert_eq!(sql_of(&stmts), vec!["SELECT 1"]);
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION test() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.contains("CREATE FUNCTION"));
        assert!(stmts[0].sql.ends_with("$$ LANGUAGE plpgsql"));
        assert_eq!(stmts[1].sql, "SELECT 3");
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT $1;";
        let stmts = split_statements(sql);
        assert_eq!(
            sql_of(&stmts),
            vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT $1"]
        );
    }

    #[test]
    fn test_split_sqlite_trigger_body() {
        let sql = r#"
CREATE TABLE audit(msg TEXT);
CREATE TRIGGER colleges_audit AFTER INSERT ON colleges
BEGIN
    INSERT INTO audit(msg) VALUES ('inserted; ok');
    UPDATE colleges SET tier = CASE WHEN NEW.rank < 10 THEN 'top' ELSE 'other' END WHERE id = NEW.id;
END;
CREATE INDEX idx_audit ON audit(msg);
"#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].sql.starts_with("CREATE TRIGGER colleges_audit"));
        assert!(stmts[1].sql.ends_with("END"));
        assert_eq!(stmts[2].sql, "CREATE INDEX idx_audit ON audit(msg)");
    }

    #[test]
    fn test_begin_outside_trigger_is_plain_statement() {
        let stmts = split_statements("BEGIN; CREATE TABLE a(id INT); END;");
        assert_eq!(sql_of(&stmts), vec!["BEGIN", "CREATE TABLE a(id INT)", "END"]);
    }

    #[test]
    fn test_split_begin_atomic_function_body() {
        let sql = r#"
CREATE FUNCTION college_tier(rank INT) RETURNS TEXT
LANGUAGE SQL
BEGIN ATOMIC
    SELECT CASE WHEN rank < 10 THEN 'top' ELSE 'other' END;
END;
SELECT 2;
"#;
        let stmts = split_statements_for(sql, Backend::Postgres);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.starts_with("CREATE FUNCTION college_tier"));
        assert!(stmts[0].sql.ends_with("END"));
        assert_eq!(stmts[1].sql, "SELECT 2");
    }

    #[test]
    fn test_block_comments_nest_on_postgres_only() {
        let sql = "/* outer /* inner */ still; commented */ SELECT 1; SELECT 2;";

        let stmts = split_statements_for(sql, Backend::Postgres);
        assert_eq!(sql_of(&stmts), vec![
            "/* outer /* inner */ still; commented */ SELECT 1",
            "SELECT 2",
        ]);

        // SQLite ends the comment at the first "*/"
        let stmts = split_statements(sql);
        assert_eq!(sql_of(&stmts), vec![
            "/* outer /* inner */ still",
            "commented */ SELECT 1",
            "SELECT 2",
        ]);
    }

    #[test]
    fn test_statement_line_numbers() {
        let sql = "-- header\n\nCREATE TABLE a(id INT);\nCREATE TABLE b(\n  id INT\n);\n\n\nSELECT 'x\ny';\nSELECT 4;";
        let stmts = split_statements(sql);
        assert_eq!(
            stmts.iter().map(|s| s.line).collect::<Vec<_>>(),
            vec![3, 4, 9, 11]
        );
    }
}
