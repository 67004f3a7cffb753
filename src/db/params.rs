//! Parameter binding.
//!
//! Statements reference parameters by name (`@email`). Before anything is
//! sent, [`bind_statement`] rewrites those references into the backend's
//! positional placeholders and lines the values up in position order. The
//! `bind_*_param` helpers then attach each value to a sqlx query with the
//! backend type that matches its [`WireType`](crate::models::WireType).

use crate::db::driver::{BoundParam, BoundStatement, Dialect, StatementKind};
use crate::error::{DbError, DbResult};
use crate::models::{ParamValue, QueryParameters};
use chrono::NaiveDateTime;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::{MySql, Postgres};
use std::borrow::Cow;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// Check that a parameter or identifier segment is a plain identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate parameter names. Shared by ad-hoc statements and procedure calls.
pub(crate) fn validate_parameter_names(params: &QueryParameters) -> DbResult<()> {
    for (name, _) in params.iter() {
        if !is_identifier(name) {
            return Err(DbError::validation(format!(
                "Invalid parameter name '{name}': use letters, digits and underscores"
            )));
        }
    }
    Ok(())
}

/// Validate a procedure name: identifiers, optionally schema-qualified.
pub(crate) fn validate_procedure_name(name: &str) -> DbResult<()> {
    if name.trim().is_empty() {
        return Err(DbError::validation("Invalid procedure name provided"));
    }
    if !name.split('.').all(is_identifier) {
        return Err(DbError::validation(format!(
            "Invalid procedure name '{name}': expected [schema.]name"
        )));
    }
    Ok(())
}

/// Rewrite `@name` references into positional placeholders.
pub fn bind_statement(
    sql: &str,
    params: &QueryParameters,
    dialect: Dialect,
    kind: StatementKind,
) -> DbResult<BoundStatement> {
    let mut rewriter = Rewriter {
        chars: sql.chars().peekable(),
        out: String::with_capacity(sql.len()),
        params,
        dialect,
        bound: Vec::new(),
        positions: HashMap::new(),
        prev: None,
    };
    rewriter.run()?;
    Ok(BoundStatement {
        sql: rewriter.out,
        params: rewriter.bound,
        kind,
    })
}

/// Build `CALL name(@a, @b, ...)` in parameter order and bind it.
pub fn bind_procedure(
    name: &str,
    params: &QueryParameters,
    dialect: Dialect,
) -> DbResult<BoundStatement> {
    let args = params
        .iter()
        .map(|(n, _)| format!("@{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("CALL {}({})", name.trim(), args);
    bind_statement(&sql, params, dialect, StatementKind::Procedure)
}

struct Rewriter<'a> {
    chars: Peekable<Chars<'a>>,
    out: String,
    params: &'a QueryParameters,
    dialect: Dialect,
    bound: Vec<BoundParam>,
    positions: HashMap<String, usize>,
    prev: Option<char>,
}

impl Rewriter<'_> {
    fn run(&mut self) -> DbResult<()> {
        while let Some(c) = self.chars.next() {
            match c {
                '\'' => {
                    let escapes = self.dialect == Dialect::MySql || self.after_escape_prefix();
                    self.copy_quoted('\'', escapes)
                }
                '"' => self.copy_quoted('"', self.dialect == Dialect::MySql),
                '`' if self.dialect == Dialect::MySql => self.copy_quoted('`', false),
                '-' if self.chars.peek() == Some(&'-') => self.copy_line_comment(),
                '#' if self.dialect == Dialect::MySql => {
                    self.out.push(c);
                    self.copy_until_newline();
                }
                '/' if self.chars.peek() == Some(&'*') => self.copy_block_comment(),
                '$' if self.dialect == Dialect::Postgres && !self.prev_is_ident() => {
                    self.copy_dollar_quoted()
                }
                '@' => self.placeholder()?,
                _ => self.out.push(c),
            }
            self.prev = self.out.chars().last();
        }
        Ok(())
    }

    fn prev_is_ident(&self) -> bool {
        self.prev
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// `E'...'` escape string: a lone `E` or `e` right before the quote.
    fn after_escape_prefix(&self) -> bool {
        let mut tail = self.out.chars().rev();
        matches!(tail.next(), Some('E' | 'e'))
            && !tail
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }

    fn copy_quoted(&mut self, quote: char, backslash_escapes: bool) {
        self.out.push(quote);
        while let Some(c) = self.chars.next() {
            self.out.push(c);
            if backslash_escapes && c == '\\' {
                if let Some(escaped) = self.chars.next() {
                    self.out.push(escaped);
                }
                continue;
            }
            if c == quote {
                // A doubled quote is an escaped quote; the next loop
                // iteration reopens the literal.
                return;
            }
        }
    }

    fn copy_until_newline(&mut self) {
        for c in self.chars.by_ref() {
            self.out.push(c);
            if c == '\n' {
                return;
            }
        }
    }

    fn copy_line_comment(&mut self) {
        self.out.push('-');
        self.copy_until_newline();
    }

    fn copy_block_comment(&mut self) {
        self.out.push('/');
        if let Some(star) = self.chars.next() {
            self.out.push(star);
        }
        let mut prev = None;
        for c in self.chars.by_ref() {
            self.out.push(c);
            if prev == Some('*') && c == '/' {
                return;
            }
            prev = Some(c);
        }
    }

    fn copy_dollar_quoted(&mut self) {
        self.out.push('$');
        let mut tag = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                tag.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        self.out.push_str(&tag);
        // `$1` or a bare `$`: not a dollar-quoted literal.
        if self.chars.peek() != Some(&'$') || tag.starts_with(|c: char| c.is_ascii_digit()) {
            return;
        }
        self.chars.next();
        self.out.push('$');
        let terminator = format!("${tag}$");
        let body_start = self.out.len();
        for c in self.chars.by_ref() {
            self.out.push(c);
            if self.out.len() >= body_start + terminator.len()
                && self.out.ends_with(&terminator)
            {
                return;
            }
        }
    }

    fn placeholder(&mut self) -> DbResult<()> {
        match self.chars.peek() {
            // `@@version` and friends are system variables.
            Some('@') => {
                self.out.push('@');
                self.out.push('@');
                self.chars.next();
                Ok(())
            }
            Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                let position = self.bind(&name)?;
                self.out.push_str(&self.dialect.placeholder(position));
                Ok(())
            }
            _ => {
                self.out.push('@');
                Ok(())
            }
        }
    }

    fn bind(&mut self, name: &str) -> DbResult<usize> {
        let (key, value) = self.lookup(name).ok_or_else(|| {
            DbError::parameter_binding(name, "referenced in the statement but not supplied")
        })?;
        if self.dialect.reuses_positions() {
            if let Some(&position) = self.positions.get(&key) {
                return Ok(position);
            }
        }
        self.bound.push(BoundParam {
            name: key.clone(),
            value,
        });
        let position = self.bound.len();
        self.positions.insert(key, position);
        Ok(position)
    }

    /// Exact match first, then case-insensitive.
    fn lookup(&self, name: &str) -> Option<(String, ParamValue)> {
        if let Some(value) = self.params.get(name) {
            return Some((name.to_string(), value.clone()));
        }
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(n, v)| (n.to_string(), v.clone()))
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q ParamValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        ParamValue::Text(v) => query.bind(v.as_str()),
        ParamValue::Int(v) => query.bind(*v),
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::Timestamp(v) => query.bind(*v),
        ParamValue::Opaque(v) => query.bind(v.to_string()),
    }
}

/// The PostgreSQL type a parameter is sent as.
///
/// Procedure overloads resolve on argument types and `int8 -> int4` and
/// `timestamptz -> timestamp` are not implicit casts, so integers go out as
/// `int4` when they fit and timestamps without a zone (UTC wall clock).
#[derive(Debug, PartialEq)]
pub(crate) enum PgBind<'q> {
    Text(Cow<'q, str>),
    Int4(i32),
    Int8(i64),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl<'q> PgBind<'q> {
    pub(crate) fn from_param(param: &'q ParamValue) -> Self {
        match param {
            ParamValue::Text(v) => Self::Text(Cow::Borrowed(v.as_str())),
            ParamValue::Int(v) => match i32::try_from(*v) {
                Ok(small) => Self::Int4(small),
                Err(_) => Self::Int8(*v),
            },
            ParamValue::Bool(v) => Self::Bool(*v),
            ParamValue::Timestamp(v) => Self::Timestamp(v.naive_utc()),
            // Sent as text, not jsonb: the wire type is VarChar.
            ParamValue::Opaque(v) => Self::Text(Cow::Owned(v.to_string())),
        }
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q ParamValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match PgBind::from_param(param) {
        PgBind::Text(Cow::Borrowed(v)) => query.bind(v),
        PgBind::Text(Cow::Owned(v)) => query.bind(v),
        PgBind::Int4(v) => query.bind(v),
        PgBind::Int8(v) => query.bind(v),
        PgBind::Bool(v) => query.bind(v),
        PgBind::Timestamp(v) => query.bind(v),
    }
}
