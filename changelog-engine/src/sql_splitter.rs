//! Splitting of SQL scripts into single statements.
//!
//! Delimiters are only recognised outside of string literals, quoted identifiers,
//! comments and PostgreSQL dollar-quoted bodies.

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment,
    DollarQuote,
}

/// Walks over `sql` and reports every byte offset together with its lexical state.
struct Scanner<'a> {
    sql: &'a str,
    position: usize,
    state: State,
    dollar_tag: String,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            position: 0,
            state: State::Normal,
            dollar_tag: String::new(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.sql[self.position..]
    }

    /// Advance by one token and return the state the token was read in
    /// and the length of the token.
    fn step(&mut self) -> Option<(State, usize)> {
        let rest = self.rest();
        let c = rest.chars().next()?;
        let state = self.state;
        let len = match self.state {
            State::Normal => {
                if rest.starts_with("--") {
                    self.state = State::LineComment;
                    2
                } else if rest.starts_with("/*") {
                    self.state = State::BlockComment;
                    2
                } else if c == '\'' {
                    self.state = State::SingleQuote;
                    1
                } else if c == '"' {
                    self.state = State::DoubleQuote;
                    1
                } else if c == '`' {
                    self.state = State::Backtick;
                    1
                } else if let Some(tag) = dollar_tag(rest) {
                    self.state = State::DollarQuote;
                    self.dollar_tag = tag.to_string();
                    tag.len()
                } else {
                    c.len_utf8()
                }
            }
            State::SingleQuote => {
                if c == '\'' {
                    self.state = State::Normal;
                }
                c.len_utf8()
            }
            State::DoubleQuote => {
                if c == '"' {
                    self.state = State::Normal;
                }
                c.len_utf8()
            }
            State::Backtick => {
                if c == '`' {
                    self.state = State::Normal;
                }
                c.len_utf8()
            }
            State::LineComment => {
                if c == '\n' {
                    self.state = State::Normal;
                }
                c.len_utf8()
            }
            State::BlockComment => {
                if rest.starts_with("*/") {
                    self.state = State::Normal;
                    2
                } else {
                    c.len_utf8()
                }
            }
            State::DollarQuote => {
                if rest.starts_with(self.dollar_tag.as_str()) {
                    self.state = State::Normal;
                    self.dollar_tag.len()
                } else {
                    c.len_utf8()
                }
            }
        };
        self.position += len;
        Some((state, len))
    }
}

/// `$$` or `$tag$` at the start of `s`.
fn dollar_tag(s: &str) -> Option<&str> {
    let body = s.strip_prefix('$')?;
    let end = body.find('$')?;
    let tag = &body[..end];
    if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit())
    {
        Some(&s[..end + 2])
    } else {
        None
    }
}

/// Statement delimiter of a script.
#[derive(Debug, PartialEq)]
enum Delimiter<'a> {
    /// Matches anywhere, e.g. `;`.
    Inline(&'a str),
    /// Matches only alone on its line, ignoring case, e.g. `GO` or `/`.
    Line(&'a str),
}

impl<'a> Delimiter<'a> {
    fn new(delimiter: &'a str) -> Self {
        let delimiter = delimiter.trim();
        if delimiter.is_empty() {
            Delimiter::Inline(";")
        } else if delimiter == "/"
            || delimiter.chars().any(|c| c.is_alphanumeric() || c == '_')
        {
            Delimiter::Line(delimiter)
        } else {
            Delimiter::Inline(delimiter)
        }
    }

    /// Length to skip when the delimiter starts at byte `position` of `sql`.
    fn matches_at(&self, sql: &str, position: usize) -> Option<usize> {
        let rest = &sql[position..];
        match self {
            Delimiter::Inline(text) => rest.starts_with(text).then_some(text.len()),
            Delimiter::Line(text) => {
                let candidate = rest.get(..text.len())?;
                if !candidate.eq_ignore_ascii_case(text) {
                    return None;
                }
                let line_start = sql[..position].rfind('\n').map_or(0, |i| i + 1);
                if !sql[line_start..position].trim().is_empty() {
                    return None;
                }
                let after = &rest[text.len()..];
                let line_end = after.find('\n').unwrap_or(after.len());
                after[..line_end]
                    .trim()
                    .is_empty()
                    .then_some(text.len() + line_end)
            }
        }
    }
}

/// Split `sql` at every `delimiter` that is not quoted or commented out.
///
/// Delimiters made of word characters, and `/`, only count when they stand
/// alone on a line, so `GO` does not split `GOODS` and `/` does not split a
/// division. Statements are trimmed, and statements without any SQL left once
/// comments are removed are dropped.
pub fn split_statements(sql: &str, delimiter: &str) -> Vec<String> {
    let delimiter = Delimiter::new(delimiter);
    let mut statements = Vec::new();
    let mut scanner = Scanner::new(sql);
    let mut start = 0;
    loop {
        if scanner.state == State::Normal {
            if let Some(len) = delimiter.matches_at(sql, scanner.position) {
                push_statement(&mut statements, &sql[start..scanner.position]);
                scanner.position += len;
                start = scanner.position;
                continue;
            }
        }
        if scanner.step().is_none() {
            break;
        }
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
    let statement = statement.trim();
    if !strip_comments(statement).trim().is_empty() {
        statements.push(statement.to_string());
    }
}

/// Remove `--` and `/* */` comments outside of quotes.
pub fn strip_comments(sql: &str) -> String {
    let mut stripped = String::with_capacity(sql.len());
    let mut scanner = Scanner::new(sql);
    loop {
        let start = scanner.position;
        let Some((state, len)) = scanner.step() else {
            break;
        };
        let token = &sql[start..start + len];
        match state {
            State::LineComment => {
                if token == "\n" {
                    stripped.push('\n');
                }
            }
            State::BlockComment => {}
            // The opening `--` or `/*` of a comment.
            State::Normal
                if matches!(scanner.state, State::LineComment | State::BlockComment) => {}
            _ => stripped.push_str(token),
        }
    }
    stripped
}
