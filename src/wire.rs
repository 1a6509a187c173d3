use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::AgendaAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = AgendaFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct AgendaHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgendaQueryParser>,
}

impl AgendaHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgendaQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        self.run_command(engine, cmd).await
    }

    /// Every statement of a simple query batch runs in order; the first
    /// failure ends the batch.
    async fn run_batch(&self, engine: &Engine, sql_text: &str) -> PgWireResult<Vec<Response>> {
        let cmds = sql::parse_batch(sql_text).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run_command(engine, cmd).await?);
        }
        Ok(responses)
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUser { id } => {
                engine.register_user(id).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertProvider {
                id,
                user_id,
                fixed_schedule,
            } => {
                engine
                    .register_provider(id, user_id, fixed_schedule)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertSchedule {
                id,
                provider_id,
                day,
                start,
                end,
                hours_per_session,
            } => {
                engine
                    .add_schedule(id, provider_id, day, start, end, hours_per_session)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::UpdateSchedule { id, patch } => {
                engine.update_schedule(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteSchedule { id } => {
                engine.remove_schedule(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertAppointment {
                id,
                client_id,
                provider_id,
                date,
                start,
                end,
            } => {
                let span = span_of(start, end)?;
                engine
                    .book_appointment(BookingRequest {
                        id,
                        client_id,
                        provider_id,
                        date,
                        span,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::UpdateAppointmentStatus {
                id,
                actor_id,
                status,
            } => {
                engine
                    .update_status(id, actor_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectSlots { provider_id, query } => {
                let slots = engine
                    .list_slots(provider_id, query)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows = slots.iter().map(|slot| -> PgWireResult<DataRow> {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&slot.schedule_id.to_string())?;
                    encoder.encode_field(&day_name(slot.day))?;
                    encoder.encode_field(&format_clock(slot.span.start))?;
                    encoder.encode_field(&format_clock(slot.span.end))?;
                    encoder.encode_field(&slot.available)?;
                    Ok(encoder.take_row())
                });
                Ok(query_response(schema.clone(), rows))
            }
            Command::SelectSchedules { provider_id, day } => {
                let schedules = engine
                    .list_schedules(provider_id, day)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schedules_schema());
                let rows = schedules.iter().map(|s| -> PgWireResult<DataRow> {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&s.id.to_string())?;
                    encoder.encode_field(&s.provider_id.to_string())?;
                    encoder.encode_field(&day_name(s.day))?;
                    encoder.encode_field(&format_clock(s.span.start))?;
                    encoder.encode_field(&format_clock(s.span.end))?;
                    encoder.encode_field(&s.hours_per_session)?;
                    Ok(encoder.take_row())
                });
                Ok(query_response(schema.clone(), rows))
            }
            Command::SelectAppointments { filter } => {
                let appointments = engine
                    .list_appointments(&filter)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(appointments_schema());
                let rows = appointments.iter().map(|a| -> PgWireResult<DataRow> {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&a.id.to_string())?;
                    encoder.encode_field(&a.client_id.map(|c| c.to_string()))?;
                    encoder.encode_field(&a.provider_id.to_string())?;
                    encoder.encode_field(&a.schedule_id.map(|s| s.to_string()))?;
                    encoder.encode_field(&a.date.to_string())?;
                    encoder.encode_field(&format_clock(a.span.start))?;
                    encoder.encode_field(&format_clock(a.span.end))?;
                    encoder.encode_field(&a.status.as_str())?;
                    encoder.encode_field(&a.created_at)?;
                    encoder.encode_field(&a.updated_at)?;
                    Ok(encoder.take_row())
                });
                Ok(query_response(schema.clone(), rows))
            }
            Command::SelectProvider { id } => {
                let info = engine.provider_info(id).await.map_err(engine_err)?;
                let schema = Arc::new(providers_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&info.id.to_string())?;
                encoder.encode_field(&info.user_id.to_string())?;
                encoder.encode_field(&info.fixed_schedule)?;
                encoder.encode_field(&(info.service_count as i64))?;
                encoder.encode_field(&(info.schedule_count as i64))?;
                encoder.encode_field(&(info.appointment_count as i64))?;
                let row: PgWireResult<DataRow> = Ok(encoder.take_row());
                Ok(query_response(schema, std::iter::once(row)))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn span_of(start: Minute, end: Minute) -> PgWireResult<Span> {
    if start >= end {
        return Err(engine_err(EngineError::InvalidField {
            field: "end_at",
            reason: "must be after start_at".into(),
        }));
    }
    Ok(Span::new(start, end))
}

fn query_response(
    schema: Arc<Vec<FieldInfo>>,
    rows: impl Iterator<Item = PgWireResult<DataRow>>,
) -> Response {
    let rows: Vec<PgWireResult<DataRow>> = rows.collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text("schedule_id"),
        text("day"),
        text("start_at"),
        text("end_at"),
        typed("available", Type::BOOL),
    ]
}

fn schedules_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("provider_id"),
        text("day"),
        text("start_at"),
        text("end_at"),
        typed("hours_per_session", Type::FLOAT8),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("client_id"),
        text("provider_id"),
        text("schedule_id"),
        text("appointment_date"),
        text("start_at"),
        text("end_at"),
        text("status"),
        typed("created_at", Type::INT8),
        typed("updated_at", Type::INT8),
    ]
}

fn providers_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("user_id"),
        typed("fixed_schedule", Type::BOOL),
        typed("service_count", Type::INT8),
        typed("schedule_count", Type::INT8),
        typed("appointment_count", Type::INT8),
    ]
}

/// Row description of a statement, chosen by the table after FROM.
fn result_schema(sql_text: &str) -> Vec<FieldInfo> {
    let upper = sql_text.to_uppercase();
    let mut words = upper.split(|c: char| c.is_whitespace() || c == ';');
    if !words.clone().any(|w| w == "SELECT") {
        return vec![];
    }
    match words.find(|w| *w == "FROM").and_then(|_| words.find(|w| !w.is_empty())) {
        Some("SLOTS") => slots_schema(),
        Some("SCHEDULES") => schedules_schema(),
        Some("APPOINTMENTS") => appointments_schema(),
        Some("PROVIDERS") => providers_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for AgendaHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run_batch(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgendaQueryParser;

#[async_trait]
impl QueryParser for AgendaQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgendaHandler {
    type Statement = String;
    type QueryParser = AgendaQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql_text = substitute_params(portal);
        self.run(&engine, &sql_text).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, portal.parameters.as_slice())
}

/// One left-to-right pass over `sql`; spliced values are never rescanned.
/// Placeholders without a bound value are kept as written.
fn substitute<T: AsRef<[u8]>>(sql: &str, params: &[Option<T>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let Some(param) = sql[start + 1..i]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx))
        else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        match param {
            Some(value) => {
                let text = String::from_utf8_lossy(value.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = i;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AgendaFactory {
    handler: Arc<AgendaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AgendaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgendaFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AgendaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AgendaHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgendaFactory {
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

// ── Errors ───────────────────────────────────────────────────────

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.class().sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
