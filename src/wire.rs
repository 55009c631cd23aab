use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotkeepAuthSource;
use crate::engine::{
    BookingView, ConsultationView, DaySlots, Engine, EngineError, ErrorKind, FinalizeRequest, HoldDeletion,
    HoldRequest, ProposalRequest, RescheduleRequest, SlotSummary, now_ms,
};
use crate::identity::{Actor, AuthFailure, IdentityProvider};
use crate::model::*;
use crate::sql::{self, Command, ResultShape};
use crate::tz;

/// Connection-independent settings for the query surface.
#[derive(Clone)]
pub struct WireConfig {
    pub password: String,
    /// Display zone of last resort for booking views.
    pub fallback_time_zone: String,
    pub identity: Arc<dyn IdentityProvider>,
}

pub struct SlotkeepHandler {
    engine: Arc<Engine>,
    identity: Arc<dyn IdentityProvider>,
    fallback_time_zone: String,
    query_parser: Arc<SlotkeepQueryParser>,
}

impl SlotkeepHandler {
    pub fn new(engine: Arc<Engine>, config: &WireConfig) -> Self {
        Self {
            engine,
            identity: config.identity.clone(),
            fallback_time_zone: config.fallback_time_zone.clone(),
            query_parser: Arc::new(SlotkeepQueryParser),
        }
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        self.identity.identify(user).map_err(|e| {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            engine_err(EngineError::Unauthorized(e))
        })
    }

    async fn run(&self, actor: Actor, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = crate::observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(&self, actor: Actor, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        let now = now_ms();
        match cmd {
            Command::UpsertProfessional {
                id,
                time_zone,
                auto_accept,
            } => {
                let id = catalog_owner(actor, id)?;
                engine.upsert_professional(id, time_zone, auto_accept).await?;
                Ok(inserted())
            }
            Command::UpsertLocation {
                professional_id,
                location,
            } => {
                let pro = catalog_owner(actor, professional_id)?;
                engine.upsert_location(pro, location).await?;
                Ok(inserted())
            }
            Command::UpsertOffering {
                professional_id,
                offering,
            } => {
                let pro = catalog_owner(actor, professional_id)?;
                engine.upsert_offering(pro, offering).await?;
                Ok(inserted())
            }
            Command::UpsertAddOn {
                professional_id,
                add_on,
            } => {
                let pro = catalog_owner(actor, professional_id)?;
                engine.upsert_add_on(pro, add_on).await?;
                Ok(inserted())
            }
            Command::InsertBlock {
                professional_id,
                block,
            } => {
                let pro = catalog_owner(actor, professional_id)?;
                engine.add_calendar_block(pro, block).await?;
                Ok(inserted())
            }
            Command::DeleteBlock { id } => {
                let pro = match actor {
                    Actor::Admin => engine
                        .professional_for(&id)
                        .ok_or(EngineError::NotFound("calendar block", id))?,
                    _ => actor.require_pro()?,
                };
                engine.remove_calendar_block(pro, id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::PublishOpening {
                professional_id,
                opening,
            } => {
                let pro = catalog_owner(actor, professional_id)?;
                engine.publish_opening(pro, opening, now).await?;
                Ok(inserted())
            }
            Command::SelectSlots(q) => {
                let day = engine.day_slots(&q, now).await?;
                Ok(slots_response(&day))
            }
            Command::SelectSlotSummary(q) => {
                let summary = engine.slot_summary(&q, now).await?;
                Ok(summary_response(&summary))
            }
            Command::InsertHold {
                offering_id,
                scheduled_for,
                location_type,
                location_id,
                reschedule_of,
            } => {
                let hold = engine
                    .create_hold(
                        HoldRequest {
                            client_id: actor.require_client()?,
                            offering_id,
                            scheduled_for,
                            location_type,
                            location_id,
                            reschedule_of,
                        },
                        now,
                    )
                    .await?;
                Ok(hold_response(&hold))
            }
            Command::DeleteHold { id } => {
                let rows = match engine.delete_hold(id, actor.require_client()?).await? {
                    HoldDeletion::Released => 1,
                    HoldDeletion::AlreadyGone => 0,
                };
                Ok(Response::Execution(Tag::new("DELETE").with_rows(rows)))
            }
            Command::InsertBooking {
                offering_id,
                hold_id,
                location_type,
                source,
                add_on_ids,
                opening_id,
                aftercare_token,
                rebook_of_booking_id,
            } => {
                let booking = engine
                    .finalize_booking(
                        FinalizeRequest {
                            client_id: actor.require_client()?,
                            offering_id,
                            hold_id,
                            location_type,
                            source,
                            add_on_ids,
                            opening_id,
                            aftercare_token,
                            rebook_of_booking_id,
                        },
                        now,
                    )
                    .await?;
                self.booking_response(actor, booking.id).await
            }
            Command::InsertReschedule { booking_id, hold_id } => {
                let booking = engine
                    .reschedule_booking(
                        RescheduleRequest {
                            client_id: actor.require_client()?,
                            booking_id,
                            hold_id,
                        },
                        now,
                    )
                    .await?;
                self.booking_response(actor, booking.id).await
            }
            Command::InsertBookingAction { booking_id, action } => {
                let booking = engine.apply_booking_action(actor, booking_id, action, now).await?;
                self.booking_response(actor, booking.id).await
            }
            Command::InsertProposal {
                booking_id,
                services,
                notes,
            } => {
                let view = engine
                    .propose_consultation(
                        ProposalRequest {
                            professional_id: actor.require_pro()?,
                            booking_id,
                            services,
                            notes,
                        },
                        now,
                    )
                    .await?;
                approval_response(&view)
            }
            Command::InsertDecision { booking_id, decision } => {
                let view = engine
                    .decide_consultation(actor.require_client()?, booking_id, decision, now)
                    .await?;
                approval_response(&view)
            }
            Command::SelectBooking { id } => self.booking_response(actor, id).await,
            Command::SelectApproval { booking_id } => {
                let view = engine.approval_view(actor, booking_id).await?;
                approval_response(&view)
            }
        }
    }

    async fn booking_response(&self, actor: Actor, booking_id: Ulid) -> Result<Response, EngineError> {
        let view = self
            .engine
            .booking_view(actor, booking_id, &self.fallback_time_zone)
            .await?;
        Ok(booking_row_response(&view))
    }
}

/// Professional whose catalog a write targets. Admins name it explicitly.
fn catalog_owner(actor: Actor, requested: Option<Ulid>) -> Result<Ulid, EngineError> {
    match (actor, requested) {
        (Actor::Professional(id), None) => Ok(id),
        (Actor::Professional(id), Some(other)) if other == id => Ok(id),
        (Actor::Professional(_), Some(_)) => Err(EngineError::Forbidden("catalog belongs to another professional")),
        (Actor::Admin, Some(id)) => Ok(id),
        (Actor::Admin, None) => Err(EngineError::InvalidInput("professional_id is required".into())),
        (Actor::Client(_), _) => Err(AuthFailure::WrongRole("professional").into()),
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

// ── Result rows ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("location_id"),
        text_field("time_zone"),
        int_field("start_at"),
        text_field("start_local"),
    ]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        text_field("location_id"),
        text_field("time_zone"),
        text_field("date"),
        int_field("open_slots"),
    ]
}

fn hold_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("offering_id"),
        text_field("location_id"),
        text_field("location_type"),
        int_field("scheduled_for"),
        int_field("expires_at"),
        text_field("time_zone"),
        text_field("local_start"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("professional_id"),
        text_field("offering_id"),
        text_field("location_id"),
        text_field("location_type"),
        text_field("status"),
        text_field("source"),
        int_field("scheduled_for"),
        int_field("total_duration_minutes"),
        int_field("subtotal_cents"),
        text_field("session_step"),
        text_field("time_zone"),
        text_field("time_zone_source"),
        text_field("local_start"),
        text_field("aftercare_token"),
    ]
}

fn approval_schema() -> Vec<FieldInfo> {
    vec![
        text_field("booking_id"),
        text_field("status"),
        int_field("proposed_total_cents"),
        text_field("services"),
        text_field("notes"),
        text_field("session_step"),
        int_field("proposed_at"),
    ]
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Slots => slots_schema(),
        ResultShape::SlotSummary => summary_schema(),
        ResultShape::Hold => hold_schema(),
        ResultShape::Booking => booking_schema(),
        ResultShape::Approval => approval_schema(),
        ResultShape::None => vec![],
    }
}

fn local_or_utc(at: Ms, zone: &str) -> String {
    match tz::parse_time_zone(zone) {
        Some(tz) => tz::format_local(at, tz),
        None => tz::format_utc(at),
    }
}

fn slots_response(day: &DaySlots) -> Response {
    let schema = Arc::new(slots_schema());
    let location_id = day.location_id.to_string();
    let rows: Vec<PgWireResult<_>> = day
        .slots
        .iter()
        .map(|start| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&location_id)?;
            encoder.encode_field(&day.time_zone)?;
            encoder.encode_field(start)?;
            encoder.encode_field(&local_or_utc(*start, &day.time_zone))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn summary_response(summary: &SlotSummary) -> Response {
    let schema = Arc::new(summary_schema());
    let location_id = summary.location_id.to_string();
    let rows: Vec<PgWireResult<_>> = summary
        .days
        .iter()
        .map(|day| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&location_id)?;
            encoder.encode_field(&summary.time_zone)?;
            encoder.encode_field(&day.date.to_string())?;
            encoder.encode_field(&(day.open_slots as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn hold_response(hold: &Hold) -> Response {
    let schema = Arc::new(hold_schema());
    let row = hold_row(&schema, hold);
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn hold_row(schema: &Arc<Vec<FieldInfo>>, hold: &Hold) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&hold.id.to_string())?;
    encoder.encode_field(&hold.offering_id.to_string())?;
    encoder.encode_field(&hold.location_id.to_string())?;
    encoder.encode_field(&hold.location_type.as_str().to_string())?;
    encoder.encode_field(&hold.scheduled_for)?;
    encoder.encode_field(&hold.expires_at)?;
    encoder.encode_field(&hold.location_time_zone)?;
    encoder.encode_field(&local_or_utc(hold.scheduled_for, &hold.location_time_zone))?;
    Ok(encoder.take_row())
}

fn booking_row_response(view: &BookingView) -> Response {
    let schema = Arc::new(booking_schema());
    let row = booking_row(&schema, view);
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn booking_row(schema: &Arc<Vec<FieldInfo>>, view: &BookingView) -> PgWireResult<DataRow> {
    let b = &view.booking;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.client_id.to_string())?;
    encoder.encode_field(&b.professional_id.to_string())?;
    encoder.encode_field(&b.offering_id.to_string())?;
    encoder.encode_field(&b.location_id.to_string())?;
    encoder.encode_field(&b.location_type.as_str().to_string())?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&b.source.as_str().to_string())?;
    encoder.encode_field(&b.scheduled_for)?;
    encoder.encode_field(&i64::from(b.total_duration_minutes))?;
    encoder.encode_field(&b.subtotal_cents)?;
    encoder.encode_field(&b.session_step.as_str().to_string())?;
    encoder.encode_field(&view.time_zone)?;
    encoder.encode_field(&view.time_zone_source.as_str().to_string())?;
    encoder.encode_field(&view.local_start)?;
    encoder.encode_field(&b.aftercare_token.map(|t| t.to_string()))?;
    Ok(encoder.take_row())
}

fn approval_response(view: &ConsultationView) -> Result<Response, EngineError> {
    let schema = Arc::new(approval_schema());
    let services = serde_json::to_string(&view.approval.proposed_services)
        .map_err(|e| EngineError::InvalidInput(format!("services: {e}")))?;
    let row = approval_row(&schema, view, services);
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(vec![row]))))
}

fn approval_row(schema: &Arc<Vec<FieldInfo>>, view: &ConsultationView, services: String) -> PgWireResult<DataRow> {
    let a = &view.approval;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&a.booking_id.to_string())?;
    encoder.encode_field(&a.status.as_str().to_string())?;
    encoder.encode_field(&a.proposed_total_cents)?;
    encoder.encode_field(&services)?;
    encoder.encode_field(&a.notes)?;
    encoder.encode_field(&view.session_step.as_str().to_string())?;
    encoder.encode_field(&a.proposed_at)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for SlotkeepHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        Ok(vec![self.run(actor, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotkeepQueryParser;

#[async_trait]
impl QueryParser for SlotkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(sql::result_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotkeepHandler {
    type Statement = String;
    type QueryParser = SlotkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        self.run(actor, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(sql::result_shape(&target.statement)),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(sql::result_shape(
            &target.statement.statement,
        ))))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Replace `$N` placeholders with bound text parameters in one left-to-right
/// pass. Inserted values are never rescanned, and `$` inside quoted literals
/// of the statement is left alone.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let digits_start = at + 1;
        let mut digits_end = digits_start;
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = i + 1;
            chars.next();
        }
        let bound = sql[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[at..digits_end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SlotkeepFactory {
    handler: Arc<SlotkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotkeepFactory {
    pub fn new(engine: Arc<Engine>, config: &WireConfig) -> Self {
        let auth_source = SlotkeepAuthSource::new(config.password.clone(), config.identity.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotkeepHandler::new(engine, config)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: SlotkeepFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    if matches!(e, EngineError::Unauthorized(AuthFailure::Unauthenticated)) {
        return "28000";
    }
    match e.kind() {
        ErrorKind::Validation => "22023",
        ErrorKind::Configuration => "55000",
        ErrorKind::Conflict => "23P01",
        ErrorKind::State => "55006",
        ErrorKind::Forbidden => "42501",
        ErrorKind::NotFound => "P0002",
        ErrorKind::External => "58000",
        ErrorKind::Internal => "XX000",
    }
}

/// Message is `CODE: text` so clients can branch on the stable code.
fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        format!("{}: {e}", e.code()),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
