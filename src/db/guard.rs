use sqlparser::ast::Statement;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Accepts exactly one query statement (`SELECT`, `WITH ...`, `VALUES`).
///
/// Text the parser cannot read is passed through: the store will reject it
/// with a message the repair loop can use, and read-only connections refuse
/// writes regardless.
pub fn ensure_read_only(sql: &str) -> Result<(), String> {
    let statements = match Parser::parse_sql(&DuckDbDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("Guard could not parse statement, deferring to store: {}", e);
            return Ok(());
        }
    };

    match statements.as_slice() {
        [] | [Statement::Query(_)] => Ok(()),
        [_] => Err(format!(
            "Only read-only SELECT queries are allowed, got {}",
            leading_keyword(sql)
        )),
        many => Err(format!(
            "Exactly one SQL statement is allowed, got {}",
            many.len()
        )),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(';').to_uppercase())
        .unwrap_or_default()
}
