use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

/// Pulls a single SQL statement out of a raw completion.
///
/// Everything after the last `marker` is taken (a model that repeats the
/// marker in its own explanation still yields the final answer), trimmed, and
/// cut after the first statement-ending `;`. Without the marker the trimmed
/// text is returned untouched. This is a heuristic, not a parser: it never
/// fails, and malformed output surfaces later as an execution error.
pub fn extract_sql(raw: &str, marker: &str) -> String {
    let position = if marker.is_empty() { None } else { raw.rfind(marker) };
    let Some(position) = position else {
        return raw.trim().to_string();
    };

    let remainder = raw[position + marker.len()..].trim();
    match statement_end(remainder) {
        Some(end) => format!("{};", remainder[..end].trim()),
        None => remainder.to_string(),
    }
}

/// Byte offset of the `;` that ends the first statement.
///
/// Semicolons inside quoted literals or identifiers do not count. A quote
/// only opens at a token boundary, so apostrophes in prose ("Here's") are
/// ignored. The quote-aware cut is kept only when it parses as a single
/// statement; otherwise the first `;` anywhere is used.
fn statement_end(sql: &str) -> Option<usize> {
    let first = sql.find(';');
    match quoted_statement_end(sql) {
        Some(end) if Some(end) == first => Some(end),
        Some(end) if parses_as_one_statement(&sql[..end]) => Some(end),
        _ => first,
    }
}

fn quoted_statement_end(sql: &str) -> Option<usize> {
    let mut open_quote: Option<char> = None;
    let mut previous: Option<char> = None;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match open_quote {
            Some(q) if c == q => {
                // Doubled quote is an escaped quote inside the literal
                if chars.peek().is_some_and(|&(_, next)| next == q) {
                    chars.next();
                } else {
                    open_quote = None;
                }
            }
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') && at_token_boundary(previous) => open_quote = Some(c),
            None if c == ';' => return Some(i),
            None => {}
        }
        previous = Some(c);
    }

    None
}

fn at_token_boundary(previous: Option<char>) -> bool {
    match previous {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '(' | ',' | '=' | '<' | '>' | '|'),
    }
}

fn parses_as_one_statement(sql: &str) -> bool {
    Parser::parse_sql(&DuckDbDialect {}, sql).is_ok_and(|statements| statements.len() == 1)
}
