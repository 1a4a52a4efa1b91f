use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        image: Option<String>,
    },
    UpdateRoom {
        id: Ulid,
        name: String,
        image: Option<String>,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        room_id: Ulid,
        user_id: Option<String>,
        start: Ms,
        end: Ms,
    },
    UpdateReservation {
        id: Ulid,
        room_id: Option<Ulid>,
        start: Ms,
        end: Ms,
    },
    DeleteReservation {
        id: Ulid,
    },
    /// "Reserve now": the engine picks the span.
    InsertQuickReservation {
        id: Ulid,
        room_id: Ulid,
        user_id: Option<String>,
    },
    SelectRooms,
    SelectReservations {
        filter: ReservationFilter,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    /// `room_id: None` lists every room. `start`/`end` default to the policy window.
    SelectAvailability {
        room_id: Option<Ulid>,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectRoomStatus {
        room_id: Ulid,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationFilter {
    Id(Ulid),
    Room(Ulid),
    User(String),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().to_string();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = InsertRow::new(insert, "rooms", &["id", "name", "image"], 2)?;
            Ok(Command::InsertRoom {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                image: row.get("image").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "reservations" => {
            let row = InsertRow::new(
                insert,
                "reservations",
                &["id", "room_id", "user_id", "start", "end"],
                5,
            )?;
            Ok(Command::InsertReservation {
                id: parse_ulid(row.required("id")?)?,
                room_id: parse_ulid(row.required("room_id")?)?,
                user_id: parse_string_or_null(row.required("user_id")?)?,
                start: parse_i64(row.required("start")?)?,
                end: parse_i64(row.required("end")?)?,
            })
        }
        "quick_reservations" => {
            let row = InsertRow::new(insert, "quick_reservations", &["id", "room_id", "user_id"], 2)?;
            Ok(Command::InsertQuickReservation {
                id: parse_ulid(row.required("id")?)?,
                room_id: parse_ulid(row.required("room_id")?)?,
                user_id: row.get("user_id").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One INSERT row keyed by column. Without a column list the values follow
/// the table's column order.
struct InsertRow {
    cells: Vec<(String, Expr)>,
}

impl InsertRow {
    fn new(
        insert: &ast::Insert,
        table: &'static str,
        columns: &[&str],
        min: usize,
    ) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        if values.len() < min {
            return Err(SqlError::WrongArity(table, min, values.len()));
        }
        let names: Vec<String> = if insert.columns.is_empty() {
            columns.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.clone()).collect()
        };
        if names.len() != values.len() {
            return Err(SqlError::WrongArity(table, names.len(), values.len()));
        }

        let mut cells: Vec<(String, Expr)> = Vec::with_capacity(values.len());
        for (name, value) in names.into_iter().zip(values) {
            if !columns.contains(&name.as_str()) {
                return Err(SqlError::Parse(format!("unknown column {name} in {table}")));
            }
            if cells.iter().any(|(c, _)| *c == name) {
                return Err(SqlError::Parse(format!("duplicate column {name}")));
            }
            cells.push((name, value));
        }
        Ok(Self { cells })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &assignment.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "rooms" => Ok(Command::UpdateRoom {
            id,
            name: parse_string(get("name").ok_or(SqlError::MissingAssignment("name"))?)?,
            // An omitted image clears it.
            image: get("image").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "reservations" => Ok(Command::UpdateReservation {
            id,
            room_id: get("room_id").map(parse_ulid).transpose()?,
            start: parse_i64(get("start").ok_or(SqlError::MissingAssignment("start"))?)?,
            end: parse_i64(get("end").ok_or(SqlError::MissingAssignment("end"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "reservations" => {
            let filter = if let Some(id) = filters.id {
                ReservationFilter::Id(id)
            } else if let Some(room_id) = filters.room_id {
                ReservationFilter::Room(room_id)
            } else if let Some(user_id) = filters.user_id {
                ReservationFilter::User(user_id)
            } else {
                return Err(SqlError::MissingFilter("id, room_id or user_id"));
            };
            Ok(Command::SelectReservations {
                filter,
                start: filters.start,
                end: filters.end,
            })
        }
        "availability" => {
            match (filters.start, filters.end) {
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
                _ => {}
            }
            Ok(Command::SelectAvailability {
                room_id: filters.room_id,
                start: filters.start,
                end: filters.end,
            })
        }
        "room_status" => Ok(Command::SelectRoomStatus {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    room_id: Option<Ulid>,
    user_id: Option<String>,
    start: Option<Ms>,
    end: Option<Ms>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid(right)?),
                Some("room_id") => filters.room_id = Some(parse_ulid(right)?),
                Some("user_id") => filters.user_id = Some(parse_string(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingAssignment(&'static str),
    MissingColumn(&'static str),
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
            SqlError::MissingAssignment(col) => write!(f, "missing SET column: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing INSERT column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
