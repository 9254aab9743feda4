//! SQL Guard
//!
//! Every query handed to the gateway passes through here, whether it was
//! compiled deterministically or returned by a generator. A query is accepted
//! only when it parses as exactly one read-only `SELECT`, reads from the
//! registered table alone, and names no identifier outside the profile.

use crate::error::{PipelineError, Result};
use crate::metadata::DatasetProfile;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Word};
use std::collections::HashSet;
use tracing::debug;

const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "ATTACH",
    "DETACH", "COPY", "GRANT", "REVOKE", "PRAGMA", "INTO", "EXPORT", "IMPORT", "INSTALL", "LOAD", "CALL",
];

/// Functions the Polars SQL engine evaluates
const ALLOWED_FUNCTIONS: &[&str] = &[
    "SUM", "AVG", "COUNT", "MIN", "MAX", "MEDIAN", "LOWER", "UPPER", "TRIM", "CAST", "ROUND", "ABS",
    "COALESCE", "EXTRACT", "LEFT", "DATE",
];

/// Keywords that may precede a parenthesis without being a function call
const STRUCTURAL: &[Keyword] = &[
    Keyword::IN, Keyword::AND, Keyword::OR, Keyword::NOT, Keyword::ON, Keyword::AS, Keyword::FROM,
    Keyword::WHERE, Keyword::SELECT, Keyword::BY, Keyword::HAVING, Keyword::THEN, Keyword::ELSE,
    Keyword::WHEN, Keyword::DISTINCT, Keyword::ALL,
];

pub struct SqlGuard {
    table_name: String,
    columns: HashSet<String>,
}

impl SqlGuard {
    pub fn for_profile(profile: &DatasetProfile) -> Self {
        Self {
            table_name: profile.table_name.clone(),
            columns: profile.columns.iter().map(|c| c.name.clone()).collect(),
        }
    }

    /// Validate SQL text, returning it without any terminal semicolon
    pub fn validate(&self, sql: &str) -> Result<String> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(PipelineError::rejected_sql("empty SQL"));
        }
        let sql = sql.strip_suffix(';').unwrap_or(sql).trim_end();

        let dialect = GenericDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| PipelineError::rejected_sql(format!("SQL does not parse: {}", e)))?;
        match statements.as_slice() {
            [Statement::Query(_)] => {}
            [] => return Err(PipelineError::rejected_sql("no statement found")),
            [_] => return Err(PipelineError::rejected_sql("only SELECT queries are allowed")),
            _ => {
                return Err(PipelineError::rejected_sql(format!(
                    "expected one statement, found {}",
                    statements.len()
                )))
            }
        }

        let tokens: Vec<Token> = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| PipelineError::rejected_sql(format!("SQL does not tokenize: {}", e)))?
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();

        self.check_tokens(&tokens)?;
        debug!("SQL passed guard: {}", sql);
        Ok(sql.to_string())
    }

    fn check_tokens(&self, tokens: &[Token]) -> Result<()> {
        let aliases = collect_aliases(tokens);

        for (idx, token) in tokens.iter().enumerate() {
            match token {
                Token::SemiColon => {
                    return Err(PipelineError::rejected_sql("multiple statements are not allowed"));
                }
                Token::Word(word) => {
                    let previous = idx.checked_sub(1).and_then(|i| tokens.get(i));
                    let next = tokens.get(idx + 1);
                    self.check_word(word, previous, next, &aliases)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_word(&self, word: &Word, previous: Option<&Token>, next: Option<&Token>, aliases: &HashSet<String>) -> Result<()> {
        let upper = word.value.to_uppercase();

        if word.quote_style.is_none() && FORBIDDEN.contains(&upper.as_str()) {
            return Err(PipelineError::rejected_sql(format!("{} is not allowed in read-only queries", upper)));
        }

        if is_keyword(previous, Keyword::FROM) || is_keyword(previous, Keyword::JOIN) {
            if word.value.eq_ignore_ascii_case(&self.table_name) {
                return Ok(());
            }
            // EXTRACT(YEAR FROM "date") names a column after FROM
            if !self.columns.contains(&word.value) {
                return Err(PipelineError::rejected_sql(format!(
                    "unknown table '{}', only '{}' is registered",
                    word.value, self.table_name
                )));
            }
        }

        if word.quote_style.is_some() {
            if self.columns.contains(&word.value) || aliases.contains(&word.value) {
                return Ok(());
            }
            return Err(PipelineError::rejected_sql(format!("unknown column \"{}\"", word.value)));
        }

        if matches!(next, Some(Token::LParen)) {
            if ALLOWED_FUNCTIONS.contains(&upper.as_str()) || STRUCTURAL.contains(&word.keyword) {
                return Ok(());
            }
            return Err(PipelineError::rejected_sql(format!("function {} is not allowed", upper)));
        }

        if word.keyword != Keyword::NoKeyword
            || word.value.eq_ignore_ascii_case(&self.table_name)
            || self.columns.iter().any(|c| c.eq_ignore_ascii_case(&word.value))
            || aliases.iter().any(|a| a.eq_ignore_ascii_case(&word.value))
        {
            return Ok(());
        }
        Err(PipelineError::rejected_sql(format!("unknown identifier '{}'", word.value)))
    }
}

/// Names introduced with `AS`, including the type names of casts
fn collect_aliases(tokens: &[Token]) -> HashSet<String> {
    tokens
        .windows(2)
        .filter_map(|pair| match (&pair[0], &pair[1]) {
            (Token::Word(kw), Token::Word(alias)) if kw.keyword == Keyword::AS => Some(alias.value.clone()),
            _ => None,
        })
        .collect()
}

fn is_keyword(token: Option<&Token>, keyword: Keyword) -> bool {
    matches!(token, Some(Token::Word(w)) if w.keyword == keyword && w.quote_style.is_none())
}
