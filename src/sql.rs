use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{AppointmentFilter, AppointmentPatch, BookingRequest, PetDetails, StaffPatch};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertCategory(ServiceCategory),
    UpsertService(Service),
    InsertStaff(Staff),
    UpdateStaff { id: Ulid, patch: StaffPatch },
    DeleteStaff { id: Ulid },
    InsertAppointment(Box<BookingRequest>),
    UpdateAppointment { id: Ulid, patch: AppointmentPatch },
    DeleteAppointment { id: Ulid },
    SelectAppointments { id: Option<Ulid>, filter: AppointmentFilter },
    SelectStaff { capability: Option<Capability> },
    SelectCustomers { id: Option<Ulid>, phone: Option<String> },
    SelectPets { owner_id: Ulid },
    SelectSlots { staff_id: Ulid, date: NaiveDate },
    SelectAvailability { staff_id: Ulid, start: Ms, end: Ms },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from. Works on statements that still carry `$n`
/// placeholders, so it can drive Describe.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = Row::from_insert(insert)?;

    match table.as_str() {
        "categories" => {
            row.only(&["id", "name", "capability"])?;
            Ok(Command::UpsertCategory(ServiceCategory {
                id: row.required_ulid("id")?,
                name: row.required_text("name")?,
                capability: row.capability("capability")?,
            }))
        }
        "services" => {
            row.only(&["id", "name", "category_id", "price", "duration_min"])?;
            Ok(Command::UpsertService(Service {
                id: row.required_ulid("id")?,
                name: row.required_text("name")?,
                category_id: row.ulid("category_id")?,
                price: row.int("price")?.unwrap_or(0),
                duration_min: row
                    .int("duration_min")?
                    .map(|m| u32::try_from(m).map_err(|_| SqlError::Parse(format!("bad duration_min: {m}"))))
                    .transpose()?,
            }))
        }
        "staff" => {
            row.only(&["id", "name", "capability", "phone", "email"])?;
            Ok(Command::InsertStaff(Staff {
                id: row.required_ulid("id")?,
                name: row.required_text("name")?,
                capability: row
                    .capability("capability")?
                    .ok_or(SqlError::MissingColumn("capability"))?,
                phone: row.text("phone")?,
                email: row.text("email")?,
            }))
        }
        "appointments" => {
            row.only(&[
                "id",
                "service_id",
                "start",
                "end",
                "note",
                "customer_id",
                "customer_name",
                "customer_phone",
                "customer_email",
                "pet_id",
                "pet_name",
                "pet_species",
                "pet_breed",
                "pet_birth_date",
                "pet_sex",
                "staff_id",
            ])?;
            let new_pet = match row.text("pet_name")? {
                Some(name) => Some(PetDetails {
                    name,
                    species: row.text("pet_species")?,
                    breed: row.text("pet_breed")?,
                    birth_date: row.date("pet_birth_date")?,
                    sex: row.text("pet_sex")?,
                }),
                None => None,
            };
            Ok(Command::InsertAppointment(Box::new(BookingRequest {
                id: row.ulid("id")?,
                service_id: row.required_ulid("service_id")?,
                start: row.timestamp("start")?,
                end: row.timestamp("end")?,
                note: row.text("note")?,
                customer_id: row.ulid("customer_id")?,
                customer_name: row.text("customer_name")?,
                customer_phone: row.text("customer_phone")?,
                customer_email: row.text("customer_email")?,
                pet_id: row.ulid("pet_id")?,
                new_pet,
                staff_id: row.ulid("staff_id")?,
            })))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut values: HashMap<String, &Expr> = HashMap::new();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        values.insert(col, &assignment.value);
    }
    let row = Row { values };
    let id = where_id(selection)?;

    match table.as_str() {
        "staff" => {
            row.only(&["name", "capability", "phone", "email"])?;
            Ok(Command::UpdateStaff {
                id,
                patch: StaffPatch {
                    name: row.text("name")?,
                    capability: row.capability("capability")?,
                    phone: row.text_or_empty("phone")?,
                    email: row.text_or_empty("email")?,
                },
            })
        }
        "appointments" => {
            row.only(&["start", "end", "status", "note", "cancel_reason"])?;
            let status = row
                .text("status")?
                .map(|s| s.parse::<AppointmentStatus>().map_err(SqlError::Parse))
                .transpose()?;
            Ok(Command::UpdateAppointment {
                id,
                patch: AppointmentPatch {
                    start: row.timestamp("start")?,
                    end: row.timestamp("end")?,
                    status,
                    note: row.text_or_empty("note")?,
                    cancel_reason: row.text("cancel_reason")?.map(|r| CancelReason::parse(&r)),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = where_id(delete.selection.as_ref())?;

    match table.as_str() {
        "staff" => Ok(Command::DeleteStaff { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_conjuncts(selection, &mut filters)?;
    }
    let filters = Filters(filters);

    match table.as_str() {
        "appointments" => {
            filters.only(&["id", "staff_id", "customer_id", "date"])?;
            Ok(Command::SelectAppointments {
                id: filters.eq("id").map(parse_ulid).transpose()?,
                filter: AppointmentFilter {
                    staff_id: filters.eq("staff_id").map(parse_ulid).transpose()?,
                    customer_id: filters.eq("customer_id").map(parse_ulid).transpose()?,
                    date: filters.eq("date").map(parse_date).transpose()?,
                },
            })
        }
        "staff" => {
            filters.only(&["capability"])?;
            let capability = filters
                .eq("capability")
                .map(parse_text)
                .transpose()?
                .and_then(|c| Capability::new(&c));
            Ok(Command::SelectStaff { capability })
        }
        "customers" => {
            filters.only(&["id", "phone"])?;
            let id = filters.eq("id").map(parse_ulid).transpose()?;
            let phone = filters.eq("phone").map(parse_text).transpose()?;
            if id.is_none() && phone.is_none() {
                return Err(SqlError::MissingFilter("id or phone"));
            }
            Ok(Command::SelectCustomers { id, phone })
        }
        "pets" => {
            filters.only(&["owner_id"])?;
            Ok(Command::SelectPets {
                owner_id: parse_ulid(filters.eq("owner_id").ok_or(SqlError::MissingFilter("owner_id"))?)?,
            })
        }
        "slots" => {
            filters.only(&["staff_id", "date"])?;
            Ok(Command::SelectSlots {
                staff_id: parse_ulid(filters.eq("staff_id").ok_or(SqlError::MissingFilter("staff_id"))?)?,
                date: parse_date(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            })
        }
        "availability" => {
            filters.only(&["staff_id", "start", "end"])?;
            let start = filters.find("start", &BinaryOperator::GtEq).ok_or(SqlError::MissingFilter("start"))?;
            let end = filters.find("end", &BinaryOperator::LtEq).ok_or(SqlError::MissingFilter("end"))?;
            Ok(Command::SelectAvailability {
                staff_id: parse_ulid(filters.eq("staff_id").ok_or(SqlError::MissingFilter("staff_id"))?)?,
                start: parse_timestamp(start)?,
                end: parse_timestamp(end)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col <op> value` terms of a WHERE clause joined by AND.
struct Filters<'a>(Vec<(String, BinaryOperator, &'a Expr)>);

impl<'a> Filters<'a> {
    fn find(&self, col: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == col && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, col: &str) -> Option<&'a Expr> {
        self.find(col, &BinaryOperator::Eq)
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(c, _, _)| !allowed.contains(&c.as_str())) {
            Some((c, _, _)) => Err(SqlError::UnknownColumn(c.clone())),
            None => Ok(()),
        }
    }
}

fn collect_conjuncts<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out)?;
            collect_conjuncts(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut filters = Vec::new();
    if let Some(sel) = selection {
        collect_conjuncts(sel, &mut filters)?;
    }
    let filters = Filters(filters);
    filters.only(&["id"])?;
    parse_ulid(filters.eq("id").ok_or(SqlError::MissingFilter("id"))?)
}

// ── Named-column rows ─────────────────────────────────────────

/// Column name → value expression of one INSERT row or UPDATE SET list.
struct Row<'a> {
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn from_insert(insert: &'a ast::Insert) -> Result<Self, SqlError> {
        if insert.columns.is_empty() {
            return Err(SqlError::Parse("INSERT requires a column list".into()));
        }
        let body = insert
            .source
            .as_ref()
            .ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match body.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let [row] = rows.as_slice() else {
            return Err(SqlError::Unsupported("multi-row INSERT".into()));
        };
        if row.len() != insert.columns.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), row.len()));
        }
        let values = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(row.iter())
            .collect();
        Ok(Self { values })
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.values.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(k) => Err(SqlError::UnknownColumn(k.clone())),
            None => Ok(()),
        }
    }

    /// The value, with SQL NULL and absent columns both `None`.
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.get(col).copied().filter(|e| !is_null(e))
    }

    fn ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid).transpose()
    }

    fn required_ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.ulid(col)?.ok_or(SqlError::MissingColumn(col))
    }

    /// Trimmed text; blank counts as absent.
    fn text(&self, col: &str) -> Result<Option<String>, SqlError> {
        Ok(self
            .get(col)
            .map(parse_text)
            .transpose()?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Like `text`, but an explicit NULL or blank is `Some("")` so that an
    /// UPDATE can clear the field.
    fn text_or_empty(&self, col: &str) -> Result<Option<String>, SqlError> {
        match self.values.get(col) {
            None => Ok(None),
            Some(e) if is_null(e) => Ok(Some(String::new())),
            Some(e) => Ok(Some(parse_text(e)?.trim().to_string())),
        }
    }

    fn required_text(&self, col: &'static str) -> Result<String, SqlError> {
        self.text(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn int(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.get(col).map(parse_i64).transpose()
    }

    fn timestamp(&self, col: &str) -> Result<Option<Ms>, SqlError> {
        self.get(col).map(parse_timestamp).transpose()
    }

    fn date(&self, col: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.get(col).map(parse_date).transpose()
    }

    fn capability(&self, col: &str) -> Result<Option<Capability>, SqlError> {
        Ok(self.text(col)?.and_then(|c| Capability::new(&c)))
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(other) => Err(SqlError::Parse(format!("expected text, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

/// Integer milliseconds, or `YYYY-MM-DD HH:MM[:SS]` (a `T` separator works too).
pub fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    if let Ok(ms) = parse_i64(expr) {
        return Ok(ms);
    }
    let s = parse_text(expr)?;
    parse_timestamp_text(&s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s:?}")))
}

pub fn parse_timestamp_text(s: &str) -> Option<Ms> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(ms_from_datetime)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
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

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn other() -> Ulid {
        Ulid::from_string(OTHER).unwrap()
    }

    #[test]
    fn parse_insert_category() {
        let sql = format!("INSERT INTO categories (id, name, capability) VALUES ('{ID}', 'Grooming', 'groomer')");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpsertCategory(ServiceCategory {
                id: id(),
                name: "Grooming".into(),
                capability: Capability::new("GROOMER"),
            })
        );
    }

    #[test]
    fn parse_insert_service_with_null_category() {
        let sql = format!(
            "INSERT INTO services (id, name, category_id, price, duration_min) VALUES ('{ID}', 'Bath', NULL, 150000, 45)"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertService(s) => {
                assert_eq!(s.category_id, None);
                assert_eq!(s.price, 150_000);
                assert_eq!(s.duration_min, Some(45));
            }
            cmd => panic!("expected UpsertService, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_staff_requires_capability() {
        let sql = format!("INSERT INTO staff (id, name) VALUES ('{ID}', 'Lan')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("capability"))));

        let sql = format!("INSERT INTO staff (id, name, capability, phone) VALUES ('{ID}', 'Lan', 'SPA', '0901')");
        match parse_sql(&sql).unwrap() {
            Command::InsertStaff(s) => {
                assert_eq!(s.capability.as_str(), "SPA");
                assert_eq!(s.phone.as_deref(), Some("0901"));
                assert_eq!(s.email, None);
            }
            cmd => panic!("expected InsertStaff, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_walk_in_appointment() {
        let sql = format!(
            r#"INSERT INTO appointments (service_id, start, customer_name, customer_phone, pet_name, pet_birth_date)
               VALUES ('{ID}', '2024-06-01 09:00', 'Nguyen A', '0900000000', 'Mochi', '2021-03-04')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment(req) => {
                assert_eq!(req.id, None);
                assert_eq!(req.service_id, id());
                assert_eq!(req.start, parse_timestamp_text("2024-06-01 09:00"));
                assert_eq!(req.end, None);
                assert_eq!(req.customer_phone.as_deref(), Some("0900000000"));
                let pet = req.new_pet.unwrap();
                assert_eq!(pet.name, "Mochi");
                assert_eq!(pet.birth_date, NaiveDate::from_ymd_opt(2021, 3, 4));
            }
            cmd => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_with_ms_window() {
        let sql = format!(
            r#"INSERT INTO appointments (id, service_id, customer_id, staff_id, start, "end") VALUES ('{ID}', '{OTHER}', '{OTHER}', '{ID}', 1717232400000, 1717236000000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment(req) => {
                assert_eq!(req.id, Some(id()));
                assert_eq!(req.staff_id, Some(id()));
                assert_eq!(req.customer_id, Some(other()));
                assert_eq!(req.start, Some(1_717_232_400_000));
                assert_eq!(req.end, Some(1_717_236_000_000));
                assert_eq!(req.new_pet, None);
            }
            cmd => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_rejects_unknown_column_and_arity() {
        let sql = format!("INSERT INTO staff (id, name, capability, salary) VALUES ('{ID}', 'x', 'SPA', 1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "salary"));
        let sql = format!("INSERT INTO staff (id, name) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(2, 1))));
        let sql = format!("INSERT INTO staff VALUES ('{ID}', 'x', 'SPA')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_appointment_status_and_reason() {
        let sql = format!(
            "UPDATE appointments SET status = 'cancelled', cancel_reason = 'RESCHEDULE' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateAppointment {
                id: id(),
                patch: AppointmentPatch {
                    status: Some(AppointmentStatus::Cancelled),
                    cancel_reason: Some(CancelReason::Reschedule),
                    ..AppointmentPatch::default()
                },
            }
        );
    }

    #[test]
    fn parse_update_appointment_window_and_null_note() {
        let sql = format!(
            r#"UPDATE appointments SET start = '2024-06-01 10:00', "end" = '2024-06-01T11:00:00', note = NULL WHERE id = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateAppointment { patch, .. } => {
                assert_eq!(patch.start, parse_timestamp_text("2024-06-01 10:00"));
                assert_eq!(patch.end, parse_timestamp_text("2024-06-01 11:00"));
                assert_eq!(patch.note, Some(String::new()));
                assert_eq!(patch.status, None);
            }
            cmd => panic!("expected UpdateAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_rejects_bad_status() {
        let sql = format!("UPDATE appointments SET status = 'DONE' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_staff() {
        let sql = format!("UPDATE staff SET name = 'Lan B', capability = 'doctor' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateStaff {
                id: id(),
                patch: StaffPatch {
                    name: Some("Lan B".into()),
                    capability: Capability::new("DOCTOR"),
                    ..StaffPatch::default()
                },
            }
        );
    }

    #[test]
    fn update_and_delete_need_id() {
        assert!(matches!(
            parse_sql("UPDATE staff SET name = 'x'"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql("DELETE FROM appointments WHERE name = 'x'"),
            Err(SqlError::UnknownColumn(_))
        ));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM staff WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteStaff { id: id() });
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteAppointment { id: id() });
    }

    #[test]
    fn parse_select_appointments_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM appointments").unwrap(),
            Command::SelectAppointments {
                id: None,
                filter: AppointmentFilter::default()
            }
        );
        let sql = format!("SELECT * FROM appointments WHERE staff_id = '{ID}' AND date = '2024-06-01'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAppointments {
                id: None,
                filter: AppointmentFilter {
                    staff_id: Some(id()),
                    customer_id: None,
                    date: NaiveDate::from_ymd_opt(2024, 6, 1),
                },
            }
        );
    }

    #[test]
    fn parse_select_staff_and_customers() {
        assert_eq!(
            parse_sql("SELECT * FROM staff WHERE capability = 'groomer'").unwrap(),
            Command::SelectStaff {
                capability: Capability::new("GROOMER")
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM customers WHERE phone = '0900000000'").unwrap(),
            Command::SelectCustomers {
                id: None,
                phone: Some("0900000000".into())
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM customers"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_select_slots_and_pets() {
        let sql = format!("SELECT * FROM slots WHERE staff_id = '{ID}' AND date = '2024-06-01'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                staff_id: id(),
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
            }
        );
        let sql = format!("SELECT * FROM pets WHERE owner_id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectPets { owner_id: id() });
        assert!(matches!(
            parse_sql("SELECT * FROM slots WHERE date = '2024-06-01'"),
            Err(SqlError::MissingFilter("staff_id"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE staff_id = '{ID}' AND start >= '2024-06-01 08:00' AND "end" <= 1717261200000"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                staff_id: id(),
                start: parse_timestamp_text("2024-06-01 08:00").unwrap(),
                end: 1_717_261_200_000,
            }
        );
    }

    #[test]
    fn timestamp_text_formats() {
        let expected = ms_from_datetime(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(9, 30, 0).unwrap(),
        );
        assert_eq!(parse_timestamp_text("2024-06-01 09:30"), Some(expected));
        assert_eq!(parse_timestamp_text("2024-06-01 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp_text("2024-06-01T09:30"), Some(expected));
        assert_eq!(parse_timestamp_text("June 1st"), None);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn select_table_tolerates_placeholders() {
        assert_eq!(
            select_table("SELECT * FROM slots WHERE staff_id = $1 AND date = $2").as_deref(),
            Some("slots")
        );
        assert_eq!(select_table("DELETE FROM staff WHERE id = $1"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
