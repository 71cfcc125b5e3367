use std::fmt::Debug;
use std::sync::Arc;

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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotdAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::sql::{self, Command};
use crate::venue::VenueManager;

pub struct SlotdHandler {
    venues: Arc<VenueManager>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(venues: Arc<VenueManager>) -> Self {
        Self {
            venues,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.venues.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("venue error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            crate::observability::QUERY_DURATION_SECONDS,
            "command" => label
        )
        .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSession {
                session_type,
                date,
                time,
                duration_min,
                capacity,
            } => {
                let session = engine
                    .create_session(session_type, date, time, duration_min, capacity)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(created_session_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&session.id.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateSession { id, patch } => {
                engine.update_session(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSession { id } => {
                let removed = engine.delete_session(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                )])
            }
            Command::InsertBooking {
                session_id,
                request,
                email,
                is_guest,
            } => {
                let (_, booking) = engine
                    .add_booking(session_id, request, email, is_guest)
                    .await
                    .map_err(engine_err)?;
                booking_created_response(session_id, &[booking])
            }
            Command::BatchInsertBookings {
                session_id,
                requests,
                email,
            } => {
                let added = engine
                    .add_multiple_bookings(session_id, requests, email)
                    .await
                    .map_err(engine_err)?;
                booking_created_response(session_id, &added)
            }
            Command::DeleteBooking { session_id, position } => {
                engine
                    .remove_booking(session_id, position)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::CancelBooking {
                session_id,
                first_name,
                last_name,
            } => {
                let outcome = engine
                    .cancel_user_booking(session_id, &first_name, &last_name)
                    .await
                    .map_err(engine_err)?;
                cancellation_response(&outcome)
            }
            Command::CancelBookingByToken { token } => {
                let outcome = engine
                    .cancel_booking_by_token(&token)
                    .await
                    .map_err(engine_err)?;
                cancellation_response(&outcome)
            }
            Command::InsertWaitlist {
                session_id,
                email,
                first_name,
                last_name,
            } => {
                let position = engine
                    .join_waitlist(session_id, &email, &first_name, &last_name)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(waitlist_join_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&session_id.to_string())?;
                encoder.encode_field(&(position as i32))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::DeleteWaitlist { session_id, email } => {
                let removed = engine
                    .remove_from_waitlist(session_id, &email)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                )])
            }
            Command::SelectSessions { id } => {
                let sessions = match id {
                    Some(id) => engine
                        .get_session(id)
                        .await
                        .map_err(engine_err)?
                        .into_iter()
                        .collect(),
                    None => engine.list_sessions().await.map_err(engine_err)?,
                };

                let schema = Arc::new(session_schema());
                let rows: Vec<PgWireResult<_>> = sessions
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.session_type)?;
                        encoder.encode_field(&s.date.to_string())?;
                        encoder.encode_field(&s.time.to_string())?;
                        encoder.encode_field(&(s.duration_min as i32))?;
                        encoder.encode_field(&(s.capacity as i32))?;
                        encoder.encode_field(&(s.bookings.len() as i32))?;
                        encoder.encode_field(&(s.waitlist.len() as i32))?;
                        encoder.encode_field(&s.created_at.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { session_id } => {
                let bookings = engine.get_bookings(session_id).await.map_err(engine_err)?;

                let schema = Arc::new(booking_schema());
                let sid = session_id.to_string();
                let rows: Vec<PgWireResult<_>> = bookings
                    .iter()
                    .enumerate()
                    .map(|(position, b)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&(position as i32))?;
                        encoder.encode_field(&b.first_name)?;
                        encoder.encode_field(&b.last_name)?;
                        encoder.encode_field(&b.notes)?;
                        encoder.encode_field(&b.email)?;
                        encoder.encode_field(&b.is_guest)?;
                        encoder.encode_field(&b.booked_at.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectWaitlist { session_id } => {
                let waitlist = engine.get_waitlist(session_id).await.map_err(engine_err)?;
                waitlist_response(session_id, waitlist)
            }
            Command::SelectNextOnWaitlist { session_id } => {
                let head = engine
                    .next_on_waitlist(session_id)
                    .await
                    .map_err(engine_err)?;
                waitlist_response(session_id, head.into_iter().collect())
            }
            Command::Listen { channel } => {
                let session_id_str = channel.strip_prefix("session_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected session_{{id}})"),
                    )))
                })?;
                let _session_id = Ulid::from_string(session_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int4(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn created_session_schema() -> Vec<FieldInfo> {
    vec![varchar("id")]
}

fn session_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("session_type"),
        varchar("date"),
        varchar("time"),
        int4("duration"),
        int4("capacity"),
        int4("booked"),
        int4("waitlisted"),
        varchar("created_at"),
    ]
}

fn booking_created_schema() -> Vec<FieldInfo> {
    vec![
        varchar("session_id"),
        varchar("first_name"),
        varchar("last_name"),
        varchar("cancellation_token"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        varchar("session_id"),
        int4("position"),
        varchar("first_name"),
        varchar("last_name"),
        varchar("notes"),
        varchar("email"),
        boolean("is_guest"),
        varchar("booked_at"),
    ]
}

fn waitlist_join_schema() -> Vec<FieldInfo> {
    vec![varchar("session_id"), int4("position")]
}

fn waitlist_schema() -> Vec<FieldInfo> {
    vec![
        varchar("session_id"),
        int4("position"),
        varchar("email"),
        varchar("first_name"),
        varchar("last_name"),
        varchar("added_at"),
    ]
}

fn cancellation_schema() -> Vec<FieldInfo> {
    vec![
        varchar("session_id"),
        varchar("first_name"),
        varchar("last_name"),
        boolean("needs_notification"),
        varchar("next_on_waitlist"),
    ]
}

fn booking_created_response(
    session_id: Ulid,
    bookings: &[Booking],
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(booking_created_schema());
    let sid = session_id.to_string();
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&sid)?;
            encoder.encode_field(&b.first_name)?;
            encoder.encode_field(&b.last_name)?;
            encoder.encode_field(&b.cancellation_token)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn waitlist_response(
    session_id: Ulid,
    entries: Vec<WaitlistEntry>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(waitlist_schema());
    let sid = session_id.to_string();
    let rows: Vec<PgWireResult<_>> = entries
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&sid)?;
            encoder.encode_field(&((i + 1) as i32))?;
            encoder.encode_field(&w.email)?;
            encoder.encode_field(&w.first_name)?;
            encoder.encode_field(&w.last_name)?;
            encoder.encode_field(&w.added_at.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

/// One row handed to the notification collaborator: who was cancelled,
/// whether the host needs a heads-up, and who to offer the freed spot.
fn cancellation_response(outcome: &CancellationOutcome) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(cancellation_schema());
    let next = outcome.next_on_waitlist.as_ref().map(|w| {
        serde_json::json!({
            "email": w.email,
            "first_name": w.first_name,
            "last_name": w.last_name,
        })
        .to_string()
    });
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&outcome.session.id.to_string())?;
    encoder.encode_field(&outcome.cancelled.first_name)?;
    encoder.encode_field(&outcome.cancelled.last_name)?;
    encoder.encode_field(&outcome.needs_notification)?;
    encoder.encode_field(&next)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

/// Pick the result schema from the statement text; shared by the
/// extended-protocol describe paths.
fn result_schema_for(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("INSERT") {
        if upper.contains("SESSIONS") {
            return created_session_schema();
        }
        if upper.contains("BOOKINGS") {
            return booking_created_schema();
        }
        if upper.contains("WAITLIST") {
            return waitlist_join_schema();
        }
    }
    if upper.contains("DELETE") && upper.contains("BOOKINGS") {
        if upper.contains("CANCELLATION_TOKEN")
            || (upper.contains("FIRST_NAME") && upper.contains("LAST_NAME"))
        {
            return cancellation_schema();
        }
        return vec![];
    }
    if upper.contains("SELECT") {
        if upper.contains("WAITLIST") {
            return waitlist_schema();
        }
        if upper.contains("BOOKINGS") {
            return booking_schema();
        }
        if upper.contains("SESSIONS") {
            return session_schema();
        }
    }
    vec![]
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
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
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

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
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(venues: Arc<VenueManager>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(venues)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
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

/// Serve one client connection end-to-end.
pub async fn process_connection(
    socket: TcpStream,
    venues: Arc<VenueManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SlotdFactory::new(venues, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
