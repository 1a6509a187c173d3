use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::SchedulePatch;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
    },
    InsertProvider {
        id: Ulid,
        user_id: Ulid,
        fixed_schedule: bool,
    },
    InsertSchedule {
        id: Ulid,
        provider_id: Ulid,
        day: Weekday,
        start: Minute,
        end: Minute,
        hours_per_session: f64,
    },
    UpdateSchedule {
        id: Ulid,
        patch: SchedulePatch,
    },
    DeleteSchedule {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        client_id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
    },
    UpdateAppointmentStatus {
        id: Ulid,
        actor_id: Ulid,
        status: AppointmentStatus,
    },
    SelectSlots {
        provider_id: Ulid,
        query: SlotQuery,
    },
    SelectSchedules {
        provider_id: Ulid,
        day: Option<Weekday>,
    },
    SelectAppointments {
        filter: AppointmentFilter,
    },
    SelectProvider {
        id: Ulid,
    },
}

/// Parse a single statement.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    match stmts.as_slice() {
        [] => Err(SqlError::Empty),
        [stmt] => parse_statement(stmt),
        _ => Err(SqlError::Unsupported("multiple statements".into())),
    }
}

/// Parse a `;`-separated batch, as sent by the simple query protocol.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT names no columns.
const USER_COLUMNS: &[&str] = &["id"];
const PROVIDER_COLUMNS: &[&str] = &["id", "user_id", "fixed_schedule"];
const SCHEDULE_COLUMNS: &[&str] = &["id", "provider_id", "day", "start_at", "end_at", "hours_per_session"];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "id",
    "client_id",
    "provider_id",
    "appointment_date",
    "start_at",
    "end_at",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = match table.as_str() {
        "users" => USER_COLUMNS,
        "providers" => PROVIDER_COLUMNS,
        "schedules" => SCHEDULE_COLUMNS,
        "appointments" => APPOINTMENT_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = insert_row(insert, defaults)?;

    match table.as_str() {
        "users" => Ok(Command::InsertUser {
            id: parse_ulid_expr(row.required("id")?)?,
        }),
        "providers" => Ok(Command::InsertProvider {
            id: parse_ulid_expr(row.required("id")?)?,
            user_id: parse_ulid_expr(row.required("user_id")?)?,
            fixed_schedule: match row.get("fixed_schedule") {
                Some(e) => parse_bool(e)?,
                None => true,
            },
        }),
        "schedules" => Ok(Command::InsertSchedule {
            id: parse_ulid_expr(row.required("id")?)?,
            provider_id: parse_ulid_expr(row.required("provider_id")?)?,
            day: parse_day_expr(row.required("day")?)?,
            start: parse_clock_expr(row.required("start_at")?)?,
            end: parse_clock_expr(row.required("end_at")?)?,
            hours_per_session: parse_f64_expr(row.required("hours_per_session")?)?,
        }),
        _ => Ok(Command::InsertAppointment {
            id: parse_ulid_expr(row.required("id")?)?,
            client_id: parse_ulid_expr(row.required("client_id")?)?,
            provider_id: parse_ulid_expr(row.required("provider_id")?)?,
            date: parse_date_expr(row.required("appointment_date")?)?,
            start: parse_clock_expr(row.required("start_at")?)?,
            end: parse_clock_expr(row.required("end_at")?)?,
        }),
    }
}

/// One VALUES row keyed by column name.
struct Row(Vec<(String, Expr)>);

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn insert_row(insert: &ast::Insert, defaults: &[&str]) -> Result<Row, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() > defaults.len() {
            return Err(SqlError::WrongArity(defaults.len(), values.len()));
        }
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    Ok(Row(columns.into_iter().zip(values).collect()))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &a.value));
    }
    let filters = where_terms(selection)?;

    match table.as_str() {
        "schedules" => {
            let mut patch = SchedulePatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "day" => patch.day = Some(parse_day_expr(value)?),
                    "start_at" => patch.start = Some(parse_clock_expr(value)?),
                    "end_at" => patch.end = Some(parse_clock_expr(value)?),
                    "hours_per_session" => patch.hours_per_session = Some(parse_f64_expr(value)?),
                    _ => return Err(SqlError::Unsupported(format!("SET {column}"))),
                }
            }
            Ok(Command::UpdateSchedule {
                id: parse_ulid_expr(filters.require("id")?)?,
                patch,
            })
        }
        "appointments" => {
            let mut status = None;
            for (column, value) in set {
                match column.as_str() {
                    "status" => status = Some(parse_status_expr(value)?),
                    _ => return Err(SqlError::Unsupported(format!("SET {column}"))),
                }
            }
            Ok(Command::UpdateAppointmentStatus {
                id: parse_ulid_expr(filters.require("id")?)?,
                actor_id: parse_ulid_expr(filters.require("actor_id")?)?,
                status: status.ok_or(SqlError::MissingColumn("status"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_terms(&delete.selection)?;

    match table.as_str() {
        "schedules" => Ok(Command::DeleteSchedule {
            id: parse_ulid_expr(filters.require("id")?)?,
        }),
        "appointments" => Err(SqlError::Unsupported(
            "appointments are never deleted; set status = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_terms(&select.selection)?;

    match table.as_str() {
        "slots" => {
            let provider_id = parse_ulid_expr(filters.require("provider_id")?)?;
            let query = if let Some(e) = filters.find("appointment_date", Op::Eq) {
                SlotQuery::Date(parse_date_expr(e)?)
            } else if let Some(e) = filters.find("day", Op::Eq) {
                SlotQuery::Day(parse_day_expr(e)?)
            } else {
                return Err(SqlError::MissingFilter("appointment_date or day"));
            };
            Ok(Command::SelectSlots { provider_id, query })
        }
        "schedules" => Ok(Command::SelectSchedules {
            provider_id: parse_ulid_expr(filters.require("provider_id")?)?,
            day: filters.find("day", Op::Eq).map(parse_day_expr).transpose()?,
        }),
        "appointments" => {
            let owner = if let Some(e) = filters.find("provider_id", Op::Eq) {
                AppointmentOwner::Provider(parse_ulid_expr(e)?)
            } else if let Some(e) = filters.find("client_id", Op::Eq) {
                AppointmentOwner::Client(parse_ulid_expr(e)?)
            } else {
                return Err(SqlError::MissingFilter("provider_id or client_id"));
            };
            Ok(Command::SelectAppointments {
                filter: AppointmentFilter {
                    owner,
                    status: filters.find("status", Op::Eq).map(parse_status_expr).transpose()?,
                    from: filters
                        .find("appointment_date", Op::GtEq)
                        .map(parse_date_expr)
                        .transpose()?,
                    to: filters
                        .find("appointment_date", Op::LtEq)
                        .map(parse_date_expr)
                        .transpose()?,
                },
            })
        }
        "providers" => Ok(Command::SelectProvider {
            id: parse_ulid_expr(filters.require("id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// Conjunctive `column <op> value` terms of a WHERE clause.
struct Filters<'a>(Vec<(String, Op, &'a Expr)>);

impl<'a> Filters<'a> {
    fn find(&self, column: &str, op: Op) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(column, Op::Eq).ok_or(SqlError::MissingFilter(column))
    }
}

fn where_terms(selection: &Option<Expr>) -> Result<Filters<'_>, SqlError> {
    let mut terms = Vec::new();
    if let Some(expr) = selection {
        collect_terms(expr, &mut terms)?;
    }
    Ok(Filters(terms))
}

fn collect_terms<'a>(expr: &'a Expr, out: &mut Vec<(String, Op, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_terms(left, out)?;
                    return collect_terms(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                ast::BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((column, op, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
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

fn parse_string_expr(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_clock_expr(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_clock(s).ok_or_else(|| SqlError::Parse(format!("bad time '{s}', expected HH:MM")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_date(s).ok_or_else(|| SqlError::Parse(format!("bad date '{s}', expected YYYY-MM-DD")))
}

fn parse_day_expr(expr: &Expr) -> Result<Weekday, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_day(s).ok_or_else(|| SqlError::Parse(format!("bad day '{s}'")))
}

fn parse_status_expr(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    let s = parse_string_expr(expr)?;
    AppointmentStatus::parse(s).ok_or_else(|| SqlError::Parse(format!("bad status '{s}'")))
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number '{s}': {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_user() {
        let cmd = parse_sql(&format!("INSERT INTO users (id) VALUES ('{A}')")).unwrap();
        assert_eq!(cmd, Command::InsertUser { id: ulid(A) });
    }

    #[test]
    fn parse_insert_provider_defaults_to_fixed() {
        let cmd = parse_sql(&format!("INSERT INTO providers (id, user_id) VALUES ('{A}', '{B}')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertProvider {
                id: ulid(A),
                user_id: ulid(B),
                fixed_schedule: true
            }
        );

        let flexible = parse_sql(&format!(
            "INSERT INTO providers (id, user_id, fixed_schedule) VALUES ('{A}', '{B}', false)"
        ))
        .unwrap();
        assert!(matches!(flexible, Command::InsertProvider { fixed_schedule: false, .. }));
    }

    #[test]
    fn parse_insert_schedule() {
        let sql = format!(
            "INSERT INTO schedules (id, provider_id, day, start_at, end_at, hours_per_session) \
             VALUES ('{A}', '{B}', 'Lunes', '08:00', '11:00', 1.5)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSchedule {
                id: ulid(A),
                provider_id: ulid(B),
                day: Weekday::Mon,
                start: 480,
                end: 660,
                hours_per_session: 1.5,
            }
        );
    }

    #[test]
    fn schedule_may_run_until_midnight() {
        let sql = format!(
            "INSERT INTO schedules VALUES ('{A}', '{B}', 'Domingo', '22:00', '24:00', 1)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertSchedule { day: Weekday::Sun, start: 1320, end: 1440, .. }
        ));
        let late = format!(
            "INSERT INTO schedules VALUES ('{A}', '{B}', 'Domingo', '22:00', '24:30', 1)"
        );
        assert!(matches!(parse_sql(&late), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_columns_may_be_reordered() {
        let sql = format!(
            "INSERT INTO schedules (hours_per_session, end_at, start_at, day, provider_id, id) \
             VALUES (1, '12:00', '09:00', 'miercoles', '{B}', '{A}')"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::InsertSchedule { day: Weekday::Wed, start: 540, end: 720, .. }
        ));
    }

    #[test]
    fn insert_without_column_list_is_positional() {
        let sql = format!(
            "INSERT INTO appointments VALUES ('{A}', '{B}', '{B}', '2025-06-16', '08:00', '09:30')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { id, date, start, end, .. } => {
                assert_eq!(id, ulid(A));
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
                assert_eq!((start, end), (480, 570));
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn insert_arity_and_missing_columns() {
        let sql = format!("INSERT INTO users (id, name) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(2, 1))));

        let sql = format!("INSERT INTO appointments (id, client_id) VALUES ('{A}', '{B}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("provider_id"))));
    }

    #[test]
    fn bad_time_is_a_parse_error() {
        let sql = format!(
            "INSERT INTO appointments VALUES ('{A}', '{B}', '{B}', '2025-06-16', '8am', '09:30')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_schedule_patch() {
        let sql = format!("UPDATE schedules SET end_at = '12:00', day = 'Martes' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateSchedule {
                id: ulid(A),
                patch: SchedulePatch {
                    day: Some(Weekday::Tue),
                    start: None,
                    end: Some(720),
                    hours_per_session: None,
                },
            }
        );
    }

    #[test]
    fn parse_update_appointment_status() {
        let sql = format!(
            "UPDATE appointments SET status = 'confirmed' WHERE id = '{A}' AND actor_id = '{B}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateAppointmentStatus {
                id: ulid(A),
                actor_id: ulid(B),
                status: AppointmentStatus::Confirmed,
            }
        );

        let no_actor = format!("UPDATE appointments SET status = 'cancelled' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&no_actor), Err(SqlError::MissingFilter("actor_id"))));
    }

    #[test]
    fn parse_delete_schedule() {
        let cmd = parse_sql(&format!("DELETE FROM schedules WHERE id = '{A}'")).unwrap();
        assert_eq!(cmd, Command::DeleteSchedule { id: ulid(A) });
        let appt = parse_sql(&format!("DELETE FROM appointments WHERE id = '{A}'"));
        assert!(matches!(appt, Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_slots_by_date_or_day() {
        let by_date = format!(
            "SELECT * FROM slots WHERE provider_id = '{A}' AND appointment_date = '2025-06-16'"
        );
        assert_eq!(
            parse_sql(&by_date).unwrap(),
            Command::SelectSlots {
                provider_id: ulid(A),
                query: SlotQuery::Date(NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()),
            }
        );

        let by_day = format!("SELECT start_at, end_at FROM slots WHERE provider_id = '{A}' AND day = 'Sábado'");
        assert_eq!(
            parse_sql(&by_day).unwrap(),
            Command::SelectSlots {
                provider_id: ulid(A),
                query: SlotQuery::Day(Weekday::Sat),
            }
        );

        let neither = format!("SELECT * FROM slots WHERE provider_id = '{A}'");
        assert!(matches!(parse_sql(&neither), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_select_schedules() {
        let sql = format!("SELECT * FROM schedules WHERE provider_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSchedules { provider_id: ulid(A), day: None }
        );
    }

    #[test]
    fn parse_select_appointments_with_range() {
        let sql = format!(
            "SELECT * FROM appointments WHERE client_id = '{A}' AND status = 'pending' \
             AND appointment_date >= '2025-06-01' AND appointment_date <= '2025-06-30'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAppointments { filter } => {
                assert_eq!(filter.owner, AppointmentOwner::Client(ulid(A)));
                assert_eq!(filter.status, Some(AppointmentStatus::Pending));
                assert_eq!(filter.from, NaiveDate::from_ymd_opt(2025, 6, 1));
                assert_eq!(filter.to, NaiveDate::from_ymd_opt(2025, 6, 30));
            }
            other => panic!("expected SelectAppointments, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_appointments_needs_owner() {
        let sql = "SELECT * FROM appointments WHERE status = 'pending'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parenthesized_filters_are_flattened() {
        let sql = format!("SELECT * FROM providers WHERE (id = '{A}')");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectProvider { id: ulid(A) });
    }

    #[test]
    fn or_filters_unsupported() {
        let sql = format!("SELECT * FROM providers WHERE id = '{A}' OR id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_batch(";"), Err(SqlError::Empty) | Err(SqlError::Parse(_))));
    }

    #[test]
    fn batch_parses_every_statement() {
        let sql = format!("INSERT INTO users (id) VALUES ('{A}'); INSERT INTO users (id) VALUES ('{B}');");
        let cmds = parse_batch(&sql).unwrap();
        assert_eq!(
            cmds,
            vec![Command::InsertUser { id: ulid(A) }, Command::InsertUser { id: ulid(B) }]
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }
}
