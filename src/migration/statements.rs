//! Splitting migration scripts into individual statements
//!
//! A migration body is split on `;` at the top level. Semicolons inside string
//! literals, quoted identifiers, dollar-quoted bodies (`$$ ... $$`,
//! `$fn$ ... $fn$`), comments and SQL-standard routine bodies
//! (`BEGIN ATOMIC ... END`) do not terminate a statement. Chunks that hold
//! nothing but whitespace and comments are dropped.

/// Split a PostgreSQL script into executable statements
///
/// Returned statements are trimmed and carry no trailing `;`.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut body = RoutineBody::default();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
            }
            b'\'' => {
                has_code = true;
                i = skip_quoted(bytes, i, b'\'', is_escape_string(bytes, i));
            }
            b'"' => {
                has_code = true;
                i = skip_quoted(bytes, i, b'"', false);
            }
            b'$' => {
                has_code = true;
                i = match dollar_tag_end(bytes, i) {
                    Some(tag_end) => skip_dollar_quoted(bytes, i, tag_end),
                    None => i + 1,
                };
            }
            b';' if body.depth > 0 => {
                i += 1;
            }
            b';' => {
                if has_code {
                    statements.push(sql[start..i].trim().to_string());
                }
                start = i + 1;
                has_code = false;
                body = RoutineBody::default();
                i += 1;
            }
            b if is_ident_byte(b) => {
                let end = ident_end(bytes, i);
                body.word(&bytes[i..end], !has_code);
                has_code = true;
                i = end;
            }
            b => {
                if !b.is_ascii_whitespace() {
                    has_code = true;
                }
                i += 1;
            }
        }
    }

    if has_code {
        statements.push(sql[start..].trim().to_string());
    }

    statements
}

/// Keyword state for `CREATE FUNCTION ... BEGIN ATOMIC ... END`
///
/// Inside the body `CASE ... END` pairs nest; the matching `END` closes it.
#[derive(Debug, Default)]
struct RoutineBody {
    in_create: bool,
    after_begin: bool,
    depth: usize,
}

impl RoutineBody {
    fn word(&mut self, word: &[u8], first: bool) {
        if first {
            self.in_create = word.eq_ignore_ascii_case(b"create");
        }
        if !self.in_create {
            return;
        }

        if self.after_begin && word.eq_ignore_ascii_case(b"atomic") {
            self.depth += 1;
        } else if self.depth > 0 && word.eq_ignore_ascii_case(b"case") {
            self.depth += 1;
        } else if self.depth > 0 && word.eq_ignore_ascii_case(b"end") {
            self.depth -= 1;
        }
        self.after_begin = word.eq_ignore_ascii_case(b"begin");
    }
}

fn ident_end(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| !is_ident_byte(b))
        .map_or(bytes.len(), |offset| i + offset)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn skip_line_comment(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| i + offset + 1)
}

/// PostgreSQL block comments nest
fn skip_block_comment(bytes: &[u8], i: usize) -> usize {
    let mut depth = 0usize;
    let mut j = i;
    while j < bytes.len() {
        if bytes[j] == b'/' && bytes.get(j + 1) == Some(&b'*') {
            depth += 1;
            j += 2;
        } else if bytes[j] == b'*' && bytes.get(j + 1) == Some(&b'/') {
            depth -= 1;
            j += 2;
            if depth == 0 {
                return j;
            }
        } else {
            j += 1;
        }
    }
    bytes.len()
}

/// `E'...'` literals allow backslash escapes
fn is_escape_string(bytes: &[u8], quote: usize) -> bool {
    quote > 0
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_ident_byte(bytes[quote - 2]))
}

fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut j = open + 1;
    while j < bytes.len() {
        let b = bytes[j];
        if backslash_escapes && b == b'\\' {
            j += 2;
            continue;
        }
        if b == quote {
            if bytes.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

/// Index of the closing `$` of a dollar-quote opening tag starting at `i`
fn dollar_tag_end(bytes: &[u8], i: usize) -> Option<usize> {
    if i > 0 && is_ident_byte(bytes[i - 1]) {
        return None;
    }
    let mut j = i + 1;
    if j < bytes.len() && bytes[j].is_ascii_digit() {
        // positional parameter such as $1
        return None;
    }
    while j < bytes.len() && is_ident_byte(bytes[j]) {
        j += 1;
    }
    (bytes.get(j) == Some(&b'$')).then_some(j)
}

fn skip_dollar_quoted(bytes: &[u8], open: usize, tag_end: usize) -> usize {
    let tag = &bytes[open..=tag_end];
    let body_start = tag_end + 1;
    bytes[body_start..]
        .windows(tag.len())
        .position(|window| window == tag)
        .map_or(bytes.len(), |offset| body_start + offset + tag.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_simple_script() {
        let sql = "CREATE TABLE users (id BIGSERIAL PRIMARY KEY);\nALTER TABLE users ADD COLUMN email TEXT;\n";
        assert_eq!(
            split_statements(sql),
            vec![
                "CREATE TABLE users (id BIGSERIAL PRIMARY KEY)",
                "ALTER TABLE users ADD COLUMN email TEXT",
            ]
        );
    }

    #[test]
    fn test_last_statement_without_semicolon() {
        assert_eq!(split_statements("SELECT 1; SELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_empty_and_comment_only_scripts() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  \n\t ").is_empty());
        assert!(split_statements("-- nothing to do\n/* really */\n;;").is_empty());
    }

    #[test]
    fn test_semicolons_inside_literals() {
        let sql = "INSERT INTO notes (body) VALUES ('a;b', 'it''s; fine');\nSELECT \"odd;name\" FROM t;";
        assert_eq!(
            split_statements(sql),
            vec![
                "INSERT INTO notes (body) VALUES ('a;b', 'it''s; fine')",
                "SELECT \"odd;name\" FROM t",
            ]
        );
    }

    #[test]
    fn test_escape_string_literal() {
        let sql = r"INSERT INTO t VALUES (E'quote \' then ;'); SELECT 2;";
        assert_eq!(
            split_statements(sql),
            vec![r"INSERT INTO t VALUES (E'quote \' then ;')", "SELECT 2"]
        );
    }

    #[test]
    fn test_dollar_quoted_function_body() {
        let sql = r#"
CREATE FUNCTION touch_updated_at() RETURNS trigger AS $fn$
BEGIN
    NEW.updated_at := now();
    RETURN NEW;
END;
$fn$ LANGUAGE plpgsql;

DO $$ BEGIN PERFORM 1; END $$;
"#;
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE FUNCTION touch_updated_at()"));
        assert!(statements[0].ends_with("$fn$ LANGUAGE plpgsql"));
        assert_eq!(statements[1], "DO $$ BEGIN PERFORM 1; END $$");
    }

    #[test]
    fn test_positional_parameters_are_not_dollar_quotes() {
        assert_eq!(
            split_statements("SELECT $1::int; SELECT 2"),
            vec!["SELECT $1::int", "SELECT 2"]
        );
    }

    #[test]
    fn test_comments_hide_semicolons() {
        let sql = "-- first; still a comment\nCREATE TABLE a (id INT); /* b; /* nested; */ c; */ CREATE TABLE b (id INT);";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("CREATE TABLE a (id INT)"));
        assert!(statements[1].ends_with("CREATE TABLE b (id INT)"));
    }

    #[test]
    fn test_begin_atomic_routine_body() {
        let sql = "CREATE FUNCTION add_one(i int) RETURNS int LANGUAGE sql BEGIN ATOMIC SELECT i + 1; END;";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE FUNCTION add_one(i int) RETURNS int LANGUAGE sql BEGIN ATOMIC SELECT i + 1; END"]
        );
    }

    #[test]
    fn test_begin_atomic_with_case_and_following_statement() {
        let sql = r#"
create or replace procedure bump_streak(h bigint)
language sql
begin atomic
    update habits set streak = case when streak < 0 then 1 else streak + 1 end where id = h;
    insert into habit_logs (habit_id) values (h);
end;
DO $$ BEGIN PERFORM 1; END $$;
BEGIN;
SELECT 1;
"#;
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("create or replace procedure bump_streak"));
        assert!(statements[0].ends_with("values (h);\nend"));
        assert_eq!(statements[1], "DO $$ BEGIN PERFORM 1; END $$");
        assert_eq!(statements[2], "BEGIN");
        assert_eq!(statements[3], "SELECT 1");
    }

    #[test]
    fn test_non_ascii_content() {
        assert_eq!(
            split_statements("COMMENT ON TABLE habits IS 'Привычки; ✓';"),
            vec!["COMMENT ON TABLE habits IS 'Привычки; ✓'"]
        );
    }
}
