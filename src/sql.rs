use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{
    AddOnInput, BlockInput, BookingAction, Decision, LocationInput, OfferingInput, OpeningInput, SlotQuery,
};
use crate::model::*;
use crate::tz;

/// Parsed command from SQL input.
#[derive(Debug)]
pub enum Command {
    UpsertProfessional {
        id: Option<Ulid>,
        time_zone: Option<String>,
        auto_accept: bool,
    },
    UpsertLocation {
        professional_id: Option<Ulid>,
        location: LocationInput,
    },
    UpsertOffering {
        professional_id: Option<Ulid>,
        offering: OfferingInput,
    },
    UpsertAddOn {
        professional_id: Option<Ulid>,
        add_on: AddOnInput,
    },
    InsertBlock {
        professional_id: Option<Ulid>,
        block: BlockInput,
    },
    DeleteBlock {
        id: Ulid,
    },
    PublishOpening {
        professional_id: Option<Ulid>,
        opening: OpeningInput,
    },
    SelectSlots(SlotQuery),
    SelectSlotSummary(SlotQuery),
    InsertHold {
        offering_id: Ulid,
        scheduled_for: Ms,
        location_type: ServiceMode,
        location_id: Option<Ulid>,
        reschedule_of: Option<Ulid>,
    },
    DeleteHold {
        id: Ulid,
    },
    InsertBooking {
        offering_id: Ulid,
        hold_id: Ulid,
        location_type: ServiceMode,
        source: BookingSource,
        add_on_ids: Vec<Ulid>,
        opening_id: Option<Ulid>,
        aftercare_token: Option<Ulid>,
        rebook_of_booking_id: Option<Ulid>,
    },
    InsertReschedule {
        booking_id: Ulid,
        hold_id: Ulid,
    },
    InsertBookingAction {
        booking_id: Ulid,
        action: BookingAction,
    },
    InsertProposal {
        booking_id: Ulid,
        services: Vec<ProposedService>,
        notes: Option<String>,
    },
    InsertDecision {
        booking_id: Ulid,
        decision: Decision,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectApproval {
        booking_id: Ulid,
    },
}

/// Row shape a statement answers with, known before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Slots,
    SlotSummary,
    Hold,
    Booking,
    Approval,
    None,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Classify a statement (placeholders allowed) by its target table.
pub fn result_shape(sql: &str) -> ResultShape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return ResultShape::None;
    };
    let table = match stmts.first() {
        Some(Statement::Insert(insert)) => insert_table_name(insert).ok().map(|t| (false, t)),
        Some(Statement::Query(query)) => select_table_name(query).ok().map(|t| (true, t)),
        _ => None,
    };
    match table {
        Some((true, t)) if t == "slots" => ResultShape::Slots,
        Some((true, t)) if t == "slot_summary" => ResultShape::SlotSummary,
        Some((true, t)) if t == "bookings" => ResultShape::Booking,
        Some((true, t)) if t == "consultation_approvals" => ResultShape::Approval,
        Some((false, t)) if t == "holds" => ResultShape::Hold,
        Some((false, t)) if matches!(t.as_str(), "bookings" | "reschedules" | "booking_actions") => {
            ResultShape::Booking
        }
        Some((false, t)) if matches!(t.as_str(), "consultation_proposals" | "consultation_decisions") => {
            ResultShape::Approval
        }
        _ => ResultShape::None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = insert_row(insert)?;

    match table.as_str() {
        "professionals" => {
            row.only(&["id", "time_zone", "auto_accept"])?;
            Ok(Command::UpsertProfessional {
                id: row.opt_ulid("id")?,
                time_zone: row.opt_text("time_zone")?,
                auto_accept: row.bool_or("auto_accept", false)?,
            })
        }
        "locations" => {
            row.only(&[
                "id",
                "professional_id",
                "kind",
                "is_bookable",
                "is_primary",
                "time_zone",
                "working_hours",
                "buffer_minutes",
                "advance_notice_minutes",
                "max_days_ahead",
                "step_minutes",
                "address",
                "lat",
                "lng",
                "place_id",
            ])?;
            let geo = match (row.opt_f64("lat")?, row.opt_f64("lng")?) {
                (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                (None, None) => None,
                _ => return Err(SqlError::Parse("lat and lng must be given together".into())),
            };
            Ok(Command::UpsertLocation {
                professional_id: row.opt_ulid("professional_id")?,
                location: LocationInput {
                    id: row.ulid("id")?,
                    kind: row.parsed_or("kind", LocationKind::Salon)?,
                    is_bookable: row.bool_or("is_bookable", true)?,
                    is_primary: row.bool_or("is_primary", false)?,
                    time_zone: row.opt_text("time_zone")?,
                    working_hours_json: row.opt_text("working_hours")?,
                    buffer_minutes: row.u32_or("buffer_minutes", 0)?,
                    advance_notice_minutes: row.u32_or("advance_notice_minutes", 0)?,
                    max_days_ahead: row.u32_or("max_days_ahead", 60)?,
                    step_minutes: row.u32_or("step_minutes", 15)?,
                    address: row.opt_text("address")?,
                    geo,
                    place_id: row.opt_text("place_id")?,
                },
            })
        }
        "offerings" => {
            row.only(&[
                "id",
                "professional_id",
                "service_id",
                "is_active",
                "offers_salon",
                "salon_price_cents",
                "salon_duration_minutes",
                "offers_mobile",
                "mobile_price_cents",
                "mobile_duration_minutes",
            ])?;
            Ok(Command::UpsertOffering {
                professional_id: row.opt_ulid("professional_id")?,
                offering: OfferingInput {
                    id: row.ulid("id")?,
                    service_id: row.ulid("service_id")?,
                    is_active: row.bool_or("is_active", true)?,
                    salon: row.mode_config("salon")?,
                    mobile: row.mode_config("mobile")?,
                },
            })
        }
        "add_ons" => {
            row.only(&[
                "id",
                "professional_id",
                "offering_id",
                "service_id",
                "is_active",
                "service_is_active",
                "add_on_eligible",
                "mode",
                "price_cents",
                "duration_minutes",
                "sort_order",
            ])?;
            Ok(Command::UpsertAddOn {
                professional_id: row.opt_ulid("professional_id")?,
                add_on: AddOnInput {
                    id: row.ulid("id")?,
                    offering_id: row.ulid("offering_id")?,
                    service_id: row.ulid("service_id")?,
                    is_active: row.bool_or("is_active", true)?,
                    service_is_active: row.bool_or("service_is_active", true)?,
                    add_on_eligible: row.bool_or("add_on_eligible", true)?,
                    mode: row.opt_parsed("mode")?,
                    price_cents: row.i64("price_cents")?,
                    duration_minutes: row.u32("duration_minutes")?,
                    sort_order: row.u32_or("sort_order", 0)?,
                },
            })
        }
        "calendar_blocks" => {
            row.only(&["id", "professional_id", "starts_at", "ends_at", "location_id"])?;
            Ok(Command::InsertBlock {
                professional_id: row.opt_ulid("professional_id")?,
                block: BlockInput {
                    id: row.ulid("id")?,
                    starts_at: row.instant("starts_at")?,
                    ends_at: row.instant("ends_at")?,
                    location_id: row.opt_ulid("location_id")?,
                },
            })
        }
        "openings" => {
            row.only(&["id", "professional_id", "offering_id", "location_id", "start_at", "end_at"])?;
            Ok(Command::PublishOpening {
                professional_id: row.opt_ulid("professional_id")?,
                opening: OpeningInput {
                    id: row.ulid("id")?,
                    offering_id: row.ulid("offering_id")?,
                    location_id: row.ulid("location_id")?,
                    start_at: row.instant("start_at")?,
                    end_at: row.instant("end_at")?,
                },
            })
        }
        "holds" => {
            row.only(&["offering_id", "scheduled_for", "location_type", "location_id", "reschedule_of"])?;
            Ok(Command::InsertHold {
                offering_id: row.ulid("offering_id")?,
                scheduled_for: row.instant("scheduled_for")?,
                location_type: row.parsed("location_type")?,
                location_id: row.opt_ulid("location_id")?,
                reschedule_of: row.opt_ulid("reschedule_of")?,
            })
        }
        "bookings" => {
            row.only(&[
                "offering_id",
                "hold_id",
                "location_type",
                "source",
                "add_on_ids",
                "opening_id",
                "aftercare_token",
                "rebook_of_booking_id",
            ])?;
            Ok(Command::InsertBooking {
                offering_id: row.ulid("offering_id")?,
                hold_id: row.ulid("hold_id")?,
                location_type: row.parsed("location_type")?,
                source: row.parsed_or("source", BookingSource::Requested)?,
                add_on_ids: row.ulid_list("add_on_ids")?,
                opening_id: row.opt_ulid("opening_id")?,
                aftercare_token: row.opt_ulid("aftercare_token")?,
                rebook_of_booking_id: row.opt_ulid("rebook_of_booking_id")?,
            })
        }
        "reschedules" => {
            row.only(&["booking_id", "hold_id"])?;
            Ok(Command::InsertReschedule {
                booking_id: row.ulid("booking_id")?,
                hold_id: row.ulid("hold_id")?,
            })
        }
        "booking_actions" => {
            row.only(&["booking_id", "action"])?;
            Ok(Command::InsertBookingAction {
                booking_id: row.ulid("booking_id")?,
                action: row.parsed("action")?,
            })
        }
        "consultation_proposals" => {
            row.only(&["booking_id", "services", "notes"])?;
            let raw = row.text("services")?;
            let services: Vec<ProposedService> =
                serde_json::from_str(&raw).map_err(|e| SqlError::Parse(format!("services: {e}")))?;
            Ok(Command::InsertProposal {
                booking_id: row.ulid("booking_id")?,
                services,
                notes: row.opt_text("notes")?,
            })
        }
        "consultation_decisions" => {
            row.only(&["booking_id", "decision"])?;
            Ok(Command::InsertDecision {
                booking_id: row.ulid("booking_id")?,
                decision: row.parsed("decision")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "calendar_blocks" => Ok(Command::DeleteBlock { id }),
        "holds" => Ok(Command::DeleteHold { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table_name(query)?;
    let mut filters = Row::default();
    if let SetExpr::Select(select) = query.body.as_ref()
        && let Some(selection) = &select.selection
    {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "slots" | "slot_summary" => {
            filters.only(&["offering_id", "location_type", "location_id", "date"])?;
            let raw_date = filters.text("date")?;
            let q = SlotQuery {
                offering_id: filters.ulid("offering_id")?,
                location_type: filters.parsed("location_type")?,
                location_id: filters.opt_ulid("location_id")?,
                date: tz::parse_date(&raw_date).ok_or_else(|| SqlError::Parse(format!("bad date: {raw_date}")))?,
            };
            if table == "slots" {
                Ok(Command::SelectSlots(q))
            } else {
                Ok(Command::SelectSlotSummary(q))
            }
        }
        "bookings" => Ok(Command::SelectBooking {
            id: filters.ulid("id").map_err(|_| SqlError::MissingFilter("id"))?,
        }),
        "consultation_approvals" => Ok(Command::SelectApproval {
            booking_id: filters
                .ulid("booking_id")
                .map_err(|_| SqlError::MissingFilter("booking_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters joined by AND. Anything else is rejected.
fn collect_filters(expr: &Expr, filters: &mut Row) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            filters.cells.push((col, (**right).clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Rows ──────────────────────────────────────────────────────

/// Column-addressed values of one INSERT row or WHERE clause.
#[derive(Debug, Default)]
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.cells.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
            Some((col, _)) => Err(SqlError::UnknownColumn(col.clone())),
            None => Ok(()),
        }
    }

    fn expr(&self, col: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    /// Text form of a column. Absent and NULL are both `None`.
    fn opt_text(&self, col: &str) -> Result<Option<String>, SqlError> {
        match self.expr(col) {
            None => Ok(None),
            Some(expr) => expr_text(expr).map_err(|e| e.in_column(col)),
        }
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        self.opt_text(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.opt_text(col)?
            .map(|s| Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("{col}: bad ULID: {e}"))))
            .transpose()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.opt_ulid(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn instant(&self, col: &'static str) -> Result<Ms, SqlError> {
        let raw = self.text(col)?;
        tz::parse_instant(&raw).ok_or_else(|| SqlError::Parse(format!("{col}: bad timestamp: {raw}")))
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.opt_text(col)?
            .map(|s| s.trim().parse().map_err(|e| SqlError::Parse(format!("{col}: bad integer: {e}"))))
            .transpose()
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        self.opt_i64(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_u32(&self, col: &str) -> Result<Option<u32>, SqlError> {
        self.opt_i64(col)?
            .map(|v| u32::try_from(v).map_err(|_| SqlError::Parse(format!("{col}: {v} out of range"))))
            .transpose()
    }

    fn u32(&self, col: &'static str) -> Result<u32, SqlError> {
        self.opt_u32(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn u32_or(&self, col: &str, default: u32) -> Result<u32, SqlError> {
        Ok(self.opt_u32(col)?.unwrap_or(default))
    }

    fn opt_f64(&self, col: &str) -> Result<Option<f64>, SqlError> {
        self.opt_text(col)?
            .map(|s| s.trim().parse().map_err(|e| SqlError::Parse(format!("{col}: bad number: {e}"))))
            .transpose()
    }

    fn bool_or(&self, col: &str, default: bool) -> Result<bool, SqlError> {
        match self.opt_text(col)? {
            None => Ok(default),
            Some(s) => parse_bool(&s).ok_or_else(|| SqlError::Parse(format!("{col}: bad bool: {s}"))),
        }
    }

    fn opt_parsed<T>(&self, col: &str) -> Result<Option<T>, SqlError>
    where
        T: std::str::FromStr<Err = String>,
    {
        self.opt_text(col)?
            .map(|s| s.parse::<T>().map_err(SqlError::Parse))
            .transpose()
    }

    fn parsed<T>(&self, col: &'static str) -> Result<T, SqlError>
    where
        T: std::str::FromStr<Err = String>,
    {
        self.opt_parsed(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn parsed_or<T>(&self, col: &str, default: T) -> Result<T, SqlError>
    where
        T: std::str::FromStr<Err = String>,
    {
        Ok(self.opt_parsed(col)?.unwrap_or(default))
    }

    /// `ARRAY['a','b']`, a Postgres array literal `'{a,b}'`, or `'a,b'`.
    fn ulid_list(&self, col: &str) -> Result<Vec<Ulid>, SqlError> {
        let items: Vec<String> = match self.expr(col) {
            None => return Ok(Vec::new()),
            Some(Expr::Array(array)) => array
                .elem
                .iter()
                .filter_map(|e| expr_text(e).transpose())
                .collect::<Result<_, _>>()?,
            Some(expr) => match expr_text(expr)? {
                None => return Ok(Vec::new()),
                Some(s) => s
                    .trim()
                    .trim_start_matches('{')
                    .trim_end_matches('}')
                    .split(',')
                    .map(|p| p.trim().trim_matches('"').to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            },
        };
        items
            .iter()
            .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("{col}: bad ULID: {e}"))))
            .collect()
    }

    /// `<prefix>_price_cents` and `<prefix>_duration_minutes`, gated by
    /// `offers_<prefix>`. No duration means the mode is not offered.
    fn mode_config(&self, prefix: &str) -> Result<Option<ModeConfig>, SqlError> {
        let Some(duration_minutes) = self.opt_u32(&format!("{prefix}_duration_minutes"))? else {
            return Ok(None);
        };
        Ok(Some(ModeConfig {
            price_cents: self.opt_i64(&format!("{prefix}_price_cents"))?.unwrap_or(0),
            duration_minutes,
            is_active: self.bool_or(&format!("offers_{prefix}"), true)?,
        }))
    }
}

fn insert_row(insert: &ast::Insert) -> Result<Row, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let values = extract_insert_values(insert)?;
    if values.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
    }
    let cells = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(values)
        .collect();
    Ok(Row { cells })
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

fn select_table_name(query: &ast::Query) -> Result<String, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    table_factor_name(&first.relation)
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
        } if expr_column_name(left).as_deref() == Some("id") => {
            let raw = expr_text(right)?.ok_or(SqlError::MissingFilter("id"))?;
            Ulid::from_string(raw.trim()).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
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

/// Literal as text. Bound parameters arrive as quoted strings, so every
/// typed column is parsed from this form.
fn expr_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(expr_text(expr)?.map(|s| format!("-{s}")));
    }
    let value = extract_value(expr).ok_or_else(|| SqlError::Parse(format!("expected value, got {expr}")))?;
    match value {
        Value::Null => Ok(None),
        Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
        Value::Boolean(b) => Ok(Some(b.to_string())),
        _ => Err(SqlError::Parse(format!("unsupported literal {value}"))),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
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

impl SqlError {
    fn in_column(self, col: &str) -> SqlError {
        match self {
            SqlError::Parse(s) => SqlError::Parse(format!("{col}: {s}")),
            other => other,
        }
    }
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
