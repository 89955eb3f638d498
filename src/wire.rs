use std::fmt::Debug;
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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::PetschedAuthSource;
use crate::engine::{ConflictKind, Engine, EngineError};
use crate::model::*;
use crate::observability::{self, AUTH_FAILURES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct PetschedHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<PetschedQueryParser>,
}

impl PetschedHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(PetschedQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("shop error: {e}"))
        })
    }

    /// Run one statement, recording query count and latency.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(command = label, "query failed: {e}");
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::UpsertCategory(category) => {
                engine.upsert_category(category).await.map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::UpsertService(service) => {
                engine.upsert_service(service).await.map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::InsertStaff(staff) => {
                engine.create_staff(staff).await.map_err(engine_err)?;
                Ok(vec![insert_tag()])
            }
            Command::UpdateStaff { id, patch } => {
                engine.update_staff(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteStaff { id } => {
                engine.delete_staff(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment(req) => {
                let appointment = engine.create_appointment(*req).await.map_err(engine_err)?;
                debug!(appointment_id = %appointment.id, staff_id = %appointment.staff_id, "booked over wire");
                Ok(vec![insert_tag()])
            }
            Command::UpdateAppointment { id, patch } => {
                engine.update_appointment(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAppointment { id } => {
                engine.delete_appointment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAppointments { id, filter } => {
                let appointments = match id {
                    Some(id) => match engine.get_appointment(id).await {
                        Ok(a) => vec![a],
                        Err(EngineError::NotFound(..)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_appointments(filter).await,
                };
                let views: Vec<AppointmentView> = appointments
                    .into_iter()
                    .filter(|a| filter.matches(a))
                    .map(|a| engine.appointment_view(a))
                    .collect();
                Ok(vec![rows(appointment_schema(), &views, encode_appointment)])
            }
            Command::SelectStaff { capability } => {
                let staff = engine.list_staff(capability.as_ref());
                Ok(vec![rows(staff_schema(), &staff, encode_staff)])
            }
            Command::SelectCustomers { id, phone } => {
                let customer = match (id, phone.as_deref()) {
                    (Some(id), phone) => engine
                        .get_customer(id)
                        .ok()
                        .filter(|c| phone.is_none_or(|p| c.phone.as_deref() == Some(p))),
                    (None, Some(phone)) => engine.find_customer_by_phone(phone),
                    (None, None) => None,
                };
                let customers: Vec<Customer> = customer.into_iter().collect();
                Ok(vec![rows(customer_schema(), &customers, encode_customer)])
            }
            Command::SelectPets { owner_id } => {
                let pets = engine.pets_of(owner_id);
                Ok(vec![rows(pet_schema(), &pets, encode_pet)])
            }
            Command::SelectSlots { staff_id, date } => {
                let day = engine.staff_schedule(staff_id, date).await.map_err(engine_err)?;
                let staff_id = day.staff.id.to_string();
                let date = day.date.format("%Y-%m-%d").to_string();
                Ok(vec![rows(slot_schema(), &day.slots, |enc, slot| {
                    enc.encode_field(&staff_id)?;
                    enc.encode_field(&day.staff.name)?;
                    enc.encode_field(&date)?;
                    enc.encode_field(slot)
                })])
            }
            Command::SelectAvailability { staff_id, start, end } => {
                let window = Span::checked(start, end)
                    .ok_or_else(|| engine_err(EngineError::InvalidRequest("end must be after start".into())))?;
                let free = engine.free_windows(staff_id, window).await.map_err(engine_err)?;
                let staff_id = staff_id.to_string();
                Ok(vec![rows(availability_schema(), &free, |enc, span| {
                    enc.encode_field(&staff_id)?;
                    enc.encode_field(&span.start)?;
                    enc.encode_field(&span.end)
                })])
            }
        }
    }
}

fn insert_tag() -> Response {
    Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn appointment_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = [
        "id",
        "staff_id",
        "staff_name",
        "service_id",
        "service_name",
        "customer_id",
        "customer_name",
        "customer_phone",
        "pet_id",
        "pet_name",
    ]
    .into_iter()
    .map(text_field)
    .collect();
    fields.push(int_field("start"));
    fields.push(int_field("end"));
    fields.extend(
        [
            "status",
            "note",
            "cancel_reason",
            "contact_name",
            "contact_phone",
            "contact_email",
        ]
        .into_iter()
        .map(text_field),
    );
    fields
}

fn encode_appointment(enc: &mut DataRowEncoder, view: &AppointmentView) -> PgWireResult<()> {
    let a = &view.appointment;
    let contact = a.contact.as_ref();
    enc.encode_field(&a.id.to_string())?;
    enc.encode_field(&a.staff_id.to_string())?;
    enc.encode_field(&view.staff_name)?;
    enc.encode_field(&a.service_id.to_string())?;
    enc.encode_field(&view.service_name)?;
    enc.encode_field(&a.customer_id.to_string())?;
    enc.encode_field(&view.customer_name)?;
    enc.encode_field(&view.customer_phone)?;
    enc.encode_field(&a.pet_id.map(|p| p.to_string()))?;
    enc.encode_field(&view.pet_name)?;
    enc.encode_field(&a.span.start)?;
    enc.encode_field(&a.span.end)?;
    enc.encode_field(&a.status.as_str())?;
    enc.encode_field(&a.note)?;
    enc.encode_field(&a.cancel_reason.as_ref().map(|r| r.to_string()))?;
    enc.encode_field(&contact.and_then(|c| c.name.clone()))?;
    enc.encode_field(&contact.and_then(|c| c.phone.clone()))?;
    enc.encode_field(&contact.and_then(|c| c.email.clone()))
}

fn staff_schema() -> Vec<FieldInfo> {
    ["id", "name", "capability", "phone", "email"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn encode_staff(enc: &mut DataRowEncoder, staff: &Staff) -> PgWireResult<()> {
    enc.encode_field(&staff.id.to_string())?;
    enc.encode_field(&staff.name)?;
    enc.encode_field(&staff.capability.as_str())?;
    enc.encode_field(&staff.phone)?;
    enc.encode_field(&staff.email)
}

fn customer_schema() -> Vec<FieldInfo> {
    ["id", "name", "phone", "email", "role"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn encode_customer(enc: &mut DataRowEncoder, customer: &Customer) -> PgWireResult<()> {
    enc.encode_field(&customer.id.to_string())?;
    enc.encode_field(&customer.name)?;
    enc.encode_field(&customer.phone)?;
    enc.encode_field(&customer.email)?;
    enc.encode_field(&customer.role)
}

fn pet_schema() -> Vec<FieldInfo> {
    ["id", "owner_id", "name", "species", "breed", "birth_date", "sex"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn encode_pet(enc: &mut DataRowEncoder, pet: &Pet) -> PgWireResult<()> {
    enc.encode_field(&pet.id.to_string())?;
    enc.encode_field(&pet.owner_id.to_string())?;
    enc.encode_field(&pet.name)?;
    enc.encode_field(&pet.species)?;
    enc.encode_field(&pet.breed)?;
    enc.encode_field(&pet.birth_date.map(|d| d.format("%Y-%m-%d").to_string()))?;
    enc.encode_field(&pet.sex)
}

fn slot_schema() -> Vec<FieldInfo> {
    ["staff_id", "staff_name", "date", "slot"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("staff_id"), int_field("start"), int_field("end")]
}

/// Schema of the rows a statement returns; empty for anything but SELECT.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("appointments") => appointment_schema(),
        Some("staff") => staff_schema(),
        Some("customers") => customer_schema(),
        Some("pets") => pet_schema(),
        Some("slots") => slot_schema(),
        Some("availability") => availability_schema(),
        _ => vec![],
    }
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for PetschedHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct PetschedQueryParser;

#[async_trait]
impl QueryParser for PetschedQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for PetschedHandler {
    type Statement = String;
    type QueryParser = PetschedQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    sql.split('$')
        .skip(1)
        .filter_map(|rest| {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<usize>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Replace `$1`, `$2`, ... with bound values as quoted text. Highest index
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct PetschedFactory {
    handler: Arc<PetschedHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<PetschedAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl PetschedFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = PetschedAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(PetschedHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for PetschedFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = PetschedFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for an engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(..) => "02000",
        EngineError::InvalidRequest(_) => "22023",
        EngineError::InvalidState(_) | EngineError::InvalidTransition { .. } => "55000",
        EngineError::NoCandidates(_) => "P0002",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::HasAppointments(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::CredentialError(_) => "XX000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::Conflict(ConflictKind::LostRace { staff_id, .. }) = &e {
        warn!(%staff_id, "booking lost a commit race");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
