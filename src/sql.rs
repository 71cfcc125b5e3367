use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{BookingRequest, SessionPatch};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSession {
        session_type: Option<String>,
        date: NaiveDate,
        time: NaiveTime,
        duration_min: u32,
        capacity: u32,
    },
    UpdateSession {
        id: Ulid,
        patch: SessionPatch,
    },
    DeleteSession {
        id: Ulid,
    },
    InsertBooking {
        session_id: Ulid,
        request: BookingRequest,
        email: Option<String>,
        is_guest: bool,
    },
    BatchInsertBookings {
        session_id: Ulid,
        requests: Vec<BookingRequest>,
        email: Option<String>,
    },
    /// Host removal by positional index.
    DeleteBooking {
        session_id: Ulid,
        position: usize,
    },
    /// Self-service cancellation by participant name.
    CancelBooking {
        session_id: Ulid,
        first_name: String,
        last_name: String,
    },
    /// Guest self-service cancellation by token.
    CancelBookingByToken {
        token: String,
    },
    InsertWaitlist {
        session_id: Ulid,
        email: String,
        first_name: String,
        last_name: String,
    },
    DeleteWaitlist {
        session_id: Ulid,
        email: String,
    },
    SelectSessions {
        id: Option<Ulid>,
    },
    SelectBookings {
        session_id: Ulid,
    },
    SelectWaitlist {
        session_id: Ulid,
    },
    SelectNextOnWaitlist {
        session_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "sessions" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 5 {
                return Err(SqlError::WrongArity("sessions", 5, values.len()));
            }
            Ok(Command::InsertSession {
                session_type: parse_string_or_null(&values[0])?,
                date: parse_date(&values[1])?,
                time: parse_time(&values[2])?,
                duration_min: parse_u32(&values[3])?,
                capacity: parse_u32(&values[4])?,
            })
        }
        "bookings" => {
            let all_rows = extract_all_insert_rows(insert)?;
            if all_rows.len() == 1 {
                let values = &all_rows[0];
                if values.len() < 3 {
                    return Err(SqlError::WrongArity("bookings", 3, values.len()));
                }
                let request = booking_request_from_row(values)?;
                let email = if values.len() >= 5 {
                    parse_string_or_null(&values[4])?
                } else {
                    None
                };
                let is_guest = if values.len() >= 6 {
                    parse_bool(&values[5])?
                } else {
                    false
                };
                Ok(Command::InsertBooking {
                    session_id: parse_ulid(&values[0])?,
                    request,
                    email,
                    is_guest,
                })
            } else {
                let mut session_id = None;
                let mut email: Option<String> = None;
                let mut requests = Vec::with_capacity(all_rows.len());
                for (i, row) in all_rows.iter().enumerate() {
                    if row.len() < 3 {
                        return Err(SqlError::WrongArity("bookings row", 3, row.len()));
                    }
                    let sid = parse_ulid(&row[0])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                    match session_id {
                        None => session_id = Some(sid),
                        Some(expected) if expected != sid => {
                            return Err(SqlError::Parse(
                                "batch rows must target the same session".into(),
                            ));
                        }
                        Some(_) => {}
                    }
                    if row.len() >= 5
                        && let Some(row_email) = parse_string_or_null(&row[4])?
                    {
                        match &email {
                            None => email = Some(row_email),
                            Some(expected) if *expected != row_email => {
                                return Err(SqlError::Parse(
                                    "batch rows must share the submitter email".into(),
                                ));
                            }
                            Some(_) => {}
                        }
                    }
                    requests.push(
                        booking_request_from_row(row)
                            .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    );
                }
                Ok(Command::BatchInsertBookings {
                    session_id: session_id.ok_or(SqlError::MissingFilter("session_id"))?,
                    requests,
                    email,
                })
            }
        }
        "waitlist" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 4 {
                return Err(SqlError::WrongArity("waitlist", 4, values.len()));
            }
            Ok(Command::InsertWaitlist {
                session_id: parse_ulid(&values[0])?,
                email: parse_string(&values[1])?,
                first_name: parse_string(&values[2])?,
                last_name: parse_string(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Row shape: (session_id, first_name, last_name[, notes[, email[, is_guest]]]).
fn booking_request_from_row(row: &[Expr]) -> Result<BookingRequest, SqlError> {
    Ok(BookingRequest {
        first_name: parse_string(&row[1])?,
        last_name: parse_string(&row[2])?,
        notes: if row.len() >= 4 {
            parse_string_or_null(&row[3])?.unwrap_or_default()
        } else {
            String::new()
        },
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_eq_filters(&delete.selection)?;

    match table.as_str() {
        "sessions" => Ok(Command::DeleteSession {
            id: filter_ulid(&filters, "id")?,
        }),
        "bookings" => {
            if let Some(token) = filters.get("cancellation_token") {
                return Ok(Command::CancelBookingByToken {
                    token: parse_string(token)?,
                });
            }
            let session_id = filter_ulid(&filters, "session_id")?;
            if let Some(position) = filters.get("position") {
                let position = parse_i64_expr(position)?;
                let position = usize::try_from(position)
                    .map_err(|_| SqlError::Parse(format!("bad position: {position}")))?;
                return Ok(Command::DeleteBooking { session_id, position });
            }
            match (filters.get("first_name"), filters.get("last_name")) {
                (Some(first), Some(last)) => Ok(Command::CancelBooking {
                    session_id,
                    first_name: parse_string(first)?,
                    last_name: parse_string(last)?,
                }),
                _ => Err(SqlError::MissingFilter("position or first_name/last_name")),
            }
        }
        "waitlist" => Ok(Command::DeleteWaitlist {
            session_id: filter_ulid(&filters, "session_id")?,
            email: parse_string(
                filters
                    .get("email")
                    .ok_or(SqlError::MissingFilter("email"))?,
            )?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "sessions" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_eq_filters(selection)?;
    let id = filter_ulid(&filters, "id")?;

    let mut patch = SessionPatch::default();
    for assignment in assignments {
        let column = assignment_column(assignment)?;
        match column.as_str() {
            "session_type" => patch.session_type = Some(parse_string_or_null(&assignment.value)?),
            "date" => patch.date = Some(parse_date(&assignment.value)?),
            "time" => patch.time = Some(parse_time(&assignment.value)?),
            "duration" => patch.duration_min = Some(parse_u32(&assignment.value)?),
            "capacity" => patch.capacity = Some(parse_u32(&assignment.value)?),
            other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
        }
    }
    if patch.is_empty() {
        return Err(SqlError::Parse("UPDATE without assignments".into()));
    }
    Ok(Command::UpdateSession { id, patch })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_eq_filters(&select.selection)?;

    match table.as_str() {
        "sessions" => Ok(Command::SelectSessions {
            id: match filters.get("id") {
                Some(expr) => Some(parse_ulid(expr)?),
                None => None,
            },
        }),
        "bookings" => Ok(Command::SelectBookings {
            session_id: filter_ulid(&filters, "session_id")?,
        }),
        "waitlist" => Ok(Command::SelectWaitlist {
            session_id: filter_ulid(&filters, "session_id")?,
        }),
        "waitlist_head" => Ok(Command::SelectNextOnWaitlist {
            session_id: filter_ulid(&filters, "session_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let rows = extract_all_insert_rows(insert)?;
    Ok(rows.into_iter().next().expect("non-empty rows"))
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Flatten a WHERE clause of AND-ed equality comparisons into
/// column → value pairs. Anything else is a parse error.
fn collect_eq_filters(selection: &Option<Expr>) -> Result<HashMap<String, Expr>, SqlError> {
    let mut filters = HashMap::new();
    if let Some(expr) = selection {
        collect_eq_filters_into(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters_into(
    expr: &Expr,
    filters: &mut HashMap<String, Expr>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters_into(left, filters)?;
                collect_eq_filters_into(right, filters)
            }
            ast::BinaryOperator::Eq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left:?}")))?;
                filters.insert(column, (**right).clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters_into(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter_ulid(filters: &HashMap<String, Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    parse_ulid(filters.get(column).ok_or(SqlError::MissingFilter(column))?)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
