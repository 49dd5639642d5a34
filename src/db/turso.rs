//! Turso (remote libSQL) backend.
//!
//! Statements travel over the Hrana HTTP pipeline (`POST /v2/pipeline`) and
//! reach SeaORM through its proxy connection, so entities, repositories and
//! migrations run unchanged with the SQLite dialect.
//!
//! A statement outside a transaction runs on a stream that is opened and
//! closed by the same request. A transaction keeps its stream open and passes
//! the baton returned by the server along with every following request.
//! Open transactions are tracked per tokio task, so two transactions
//! interleaved inside one task would share a stream.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use sea_orm::sea_query::Value;
use sea_orm::{DbErr, ProxyDatabaseTrait, ProxyExecResult, ProxyRow, RuntimeErr, Statement};
use serde::{Deserialize, Serialize};
use tokio::task;

/// A value as Hrana encodes it. Integers travel as strings to keep 64 bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HranaValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

#[derive(Debug, Serialize)]
struct PipelineRequest<'a> {
    baton: Option<&'a str>,
    requests: Vec<StreamRequest>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamRequest {
    Execute { stmt: HranaStmt },
    Close,
}

impl StreamRequest {
    fn sql(sql: impl Into<String>) -> Self {
        StreamRequest::Execute {
            stmt: HranaStmt {
                sql: sql.into(),
                args: Vec::new(),
                want_rows: false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct HranaStmt {
    sql: String,
    args: Vec<HranaValue>,
    want_rows: bool,
}

impl HranaStmt {
    fn from_statement(statement: Statement, want_rows: bool) -> Result<Self, DbErr> {
        let args = match statement.values {
            Some(values) => values
                .0
                .into_iter()
                .map(encode_value)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            sql: statement.sql,
            args,
            want_rows,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    #[serde(default)]
    baton: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    results: Vec<StreamResult>,
}

impl PipelineResponse {
    /// Result of the first request in the pipeline, which is always the
    /// statement this client sent.
    fn into_statement_result(self) -> Result<StmtResult, DbErr> {
        match self.results.into_iter().next() {
            Some(StreamResult::Ok {
                response: StreamResponse::Execute { result },
            }) => Ok(result),
            Some(StreamResult::Error { error }) => Err(query_err(match error.code {
                Some(code) => format!("{code}: {}", error.message),
                None => error.message,
            })),
            _ => Err(query_err("Turso returned no statement result")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResponse {
    Execute { result: StmtResult },
    Close,
}

#[derive(Debug, Default, Deserialize)]
struct StmtResult {
    #[serde(default)]
    cols: Vec<HranaColumn>,
    #[serde(default)]
    rows: Vec<Vec<HranaValue>>,
    #[serde(default)]
    affected_row_count: u64,
    #[serde(default)]
    last_insert_rowid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HranaColumn {
    name: Option<String>,
    decltype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HranaError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// The open stream behind a transaction.
#[derive(Debug, Clone)]
struct TxnStream {
    baton: Option<String>,
    base_url: String,
    savepoints: u32,
    /// BEGIN failed. Statements are refused until the transaction ends.
    broken: bool,
}

#[derive(Debug, Clone, Copy)]
enum TxnEnd {
    Commit,
    Rollback,
}

impl TxnEnd {
    fn keyword(self) -> &'static str {
        match self {
            TxnEnd::Commit => "COMMIT",
            TxnEnd::Rollback => "ROLLBACK",
        }
    }

    fn savepoint_sql(self, name: &str) -> String {
        match self {
            TxnEnd::Commit => format!("RELEASE SAVEPOINT {name}"),
            TxnEnd::Rollback => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }
}

/// SeaORM proxy that executes statements against a Turso database.
pub struct TursoProxy {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
    streams: Mutex<HashMap<Option<task::Id>, TxnStream>>,
}

impl fmt::Debug for TursoProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TursoProxy")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TursoProxy {
    pub fn new(url: &str, auth_token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: http_base_url(url),
            auth_token: auth_token.to_string(),
            streams: Mutex::default(),
        })
    }

    /// HTTP endpoint the pipeline requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<Option<task::Id>, TxnStream>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pipeline_request(
        &self,
        base_url: &str,
        baton: Option<&str>,
        requests: Vec<StreamRequest>,
    ) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{base_url}/v2/pipeline"))
            .bearer_auth(&self.auth_token)
            .json(&PipelineRequest { baton, requests })
    }

    async fn pipeline(
        &self,
        base_url: &str,
        baton: Option<&str>,
        requests: Vec<StreamRequest>,
    ) -> Result<PipelineResponse, DbErr> {
        let response = self
            .pipeline_request(base_url, baton, requests)
            .send()
            .await
            .map_err(|e| conn_err(format!("Turso request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(conn_err(format!("Turso responded with {status}: {body}")));
        }

        response
            .json::<PipelineResponse>()
            .await
            .map_err(|e| conn_err(format!("Malformed Turso response: {e}")))
    }

    /// Sends one statement on the stream of an open transaction and keeps the
    /// returned baton for the next request.
    async fn send_on_stream(
        &self,
        key: Option<task::Id>,
        stream: &TxnStream,
        request: StreamRequest,
    ) -> Result<StmtResult, DbErr> {
        if stream.broken {
            return Err(conn_err("Turso transaction was never started"));
        }

        let mut response = self
            .pipeline(&stream.base_url, stream.baton.as_deref(), vec![request])
            .await?;

        let baton = response.baton.take();
        let base_url = response.base_url.take();
        if let Some(open) = self.streams().get_mut(&key) {
            open.baton = baton;
            if let Some(base_url) = base_url {
                open.base_url = base_url;
            }
        }

        response.into_statement_result()
    }

    async fn run(&self, statement: Statement, want_rows: bool) -> Result<StmtResult, DbErr> {
        let request = StreamRequest::Execute {
            stmt: HranaStmt::from_statement(statement, want_rows)?,
        };
        let key = task::try_id();
        let open = self.streams().get(&key).cloned();

        match open {
            Some(stream) => self.send_on_stream(key, &stream, request).await,
            None => self
                .pipeline(&self.base_url, None, vec![request, StreamRequest::Close])
                .await?
                .into_statement_result(),
        }
    }

    async fn end_transaction(&self, end: TxnEnd) {
        let key = task::try_id();
        let open = self.streams().get(&key).cloned();
        let Some(stream) = open else {
            log::warn!("{} without an open Turso transaction", end.keyword());
            return;
        };

        if stream.savepoints > 0 {
            let name = savepoint_name(stream.savepoints);
            if let Some(open) = self.streams().get_mut(&key) {
                open.savepoints -= 1;
            }
            let request = StreamRequest::sql(end.savepoint_sql(&name));
            if let Err(e) = self.send_on_stream(key, &stream, request).await {
                log::error!("Turso {} of savepoint {} failed: {}", end.keyword(), name, e);
            }
            return;
        }

        self.streams().remove(&key);
        if stream.broken {
            return;
        }

        let result = self
            .pipeline(
                &stream.base_url,
                stream.baton.as_deref(),
                vec![StreamRequest::sql(end.keyword()), StreamRequest::Close],
            )
            .await
            .and_then(PipelineResponse::into_statement_result);
        if let Err(e) = result {
            log::error!("Turso {} failed: {}", end.keyword(), e);
        }
    }
}

#[async_trait]
impl ProxyDatabaseTrait for TursoProxy {
    async fn query(&self, statement: Statement) -> Result<Vec<ProxyRow>, DbErr> {
        let result = self.run(statement, true).await?;
        decode_rows(result)
    }

    async fn execute(&self, statement: Statement) -> Result<ProxyExecResult, DbErr> {
        let result = self.run(statement, false).await?;
        let last_insert_id = result
            .last_insert_rowid
            .as_deref()
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);

        Ok(ProxyExecResult::new(
            last_insert_id,
            result.affected_row_count,
        ))
    }

    async fn begin(&self) {
        let key = task::try_id();
        let open = self.streams().get(&key).cloned();

        if let Some(stream) = open {
            let depth = stream.savepoints + 1;
            if let Some(open) = self.streams().get_mut(&key) {
                open.savepoints = depth;
            }
            let request = StreamRequest::sql(format!("SAVEPOINT {}", savepoint_name(depth)));
            if let Err(e) = self.send_on_stream(key, &stream, request).await {
                log::error!("Failed to open Turso savepoint: {}", e);
            }
            return;
        }

        let started = match self
            .pipeline(&self.base_url, None, vec![StreamRequest::sql("BEGIN")])
            .await
        {
            Ok(mut response) => {
                let baton = response.baton.take();
                let base_url = response.base_url.take();
                response
                    .into_statement_result()
                    .map(|_| (baton, base_url))
            }
            Err(e) => Err(e),
        };

        let stream = match started {
            Ok((baton, base_url)) => TxnStream {
                baton,
                base_url: base_url.unwrap_or_else(|| self.base_url.clone()),
                savepoints: 0,
                broken: false,
            },
            Err(e) => {
                log::error!("Failed to begin Turso transaction: {}", e);
                TxnStream {
                    baton: None,
                    base_url: self.base_url.clone(),
                    savepoints: 0,
                    broken: true,
                }
            }
        };
        self.streams().insert(key, stream);
    }

    async fn commit(&self) {
        self.end_transaction(TxnEnd::Commit).await;
    }

    async fn rollback(&self) {
        self.end_transaction(TxnEnd::Rollback).await;
    }

    fn start_rollback(&self) {
        let key = task::try_id();
        let mut streams = self.streams();
        let Some(stream) = streams.get_mut(&key) else {
            return;
        };

        if stream.savepoints > 0 {
            log::warn!("Nested Turso transaction dropped; its changes stay with the outer transaction");
            stream.savepoints -= 1;
            return;
        }

        let Some(stream) = streams.remove(&key) else {
            return;
        };
        drop(streams);
        if stream.broken {
            return;
        }

        let request = self.pipeline_request(
            &stream.base_url,
            stream.baton.as_deref(),
            vec![StreamRequest::sql("ROLLBACK"), StreamRequest::Close],
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = request.send().await {
                        log::warn!("Turso rollback of dropped transaction failed: {}", e);
                    }
                });
            }
            Err(_) => log::warn!("Dropped Turso transaction left for the server to expire"),
        }
    }

    async fn ping(&self) -> Result<(), DbErr> {
        self.pipeline(
            &self.base_url,
            None,
            vec![StreamRequest::sql("SELECT 1"), StreamRequest::Close],
        )
        .await?
        .into_statement_result()
        .map(|_| ())
    }
}

/// Maps a `libsql://` URL to the HTTPS endpoint serving the same database.
pub fn http_base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    match url.split_once("://") {
        Some(("libsql" | "wss", rest)) => format!("https://{rest}"),
        Some(("ws", rest)) => format!("http://{rest}"),
        _ => url.to_string(),
    }
}

fn savepoint_name(depth: u32) -> String {
    format!("bloggy_sp_{depth}")
}

fn conn_err(message: impl Into<String>) -> DbErr {
    DbErr::Conn(RuntimeErr::Internal(message.into()))
}

fn query_err(message: impl Into<String>) -> DbErr {
    DbErr::Query(RuntimeErr::Internal(message.into()))
}

fn integer(value: i64) -> HranaValue {
    HranaValue::Integer {
        value: value.to_string(),
    }
}

fn text(value: String) -> HranaValue {
    HranaValue::Text { value }
}

fn timestamp_text<Tz: chrono::TimeZone>(value: &DateTime<Tz>) -> HranaValue
where
    Tz::Offset: fmt::Display,
{
    text(value.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}

/// Encodes a bound parameter the way the local SQLite driver stores it, so
/// rows written by either backend compare and sort the same.
fn encode_value(value: Value) -> Result<HranaValue, DbErr> {
    let encoded = match value {
        Value::Bool(v) => v.map(|b| integer(i64::from(b))),
        Value::TinyInt(v) => v.map(|n| integer(n.into())),
        Value::SmallInt(v) => v.map(|n| integer(n.into())),
        Value::Int(v) => v.map(|n| integer(n.into())),
        Value::BigInt(v) => v.map(integer),
        Value::TinyUnsigned(v) => v.map(|n| integer(n.into())),
        Value::SmallUnsigned(v) => v.map(|n| integer(n.into())),
        Value::Unsigned(v) => v.map(|n| integer(n.into())),
        Value::BigUnsigned(v) => match v {
            Some(n) => Some(integer(i64::try_from(n).map_err(|_| {
                DbErr::Custom(format!("{n} does not fit a SQLite integer"))
            })?)),
            None => None,
        },
        Value::Float(v) => v.map(|n| HranaValue::Float { value: n.into() }),
        Value::Double(v) => v.map(|n| HranaValue::Float { value: n }),
        Value::String(v) => v.map(|s| text(*s)),
        Value::Char(v) => v.map(|c| text(c.to_string())),
        Value::Bytes(v) => v.map(|b| HranaValue::Blob {
            base64: STANDARD.encode(*b),
        }),
        Value::Json(v) => v.map(|json| text(json.to_string())),
        Value::ChronoDate(v) => v.map(|d| text(d.format("%F").to_string())),
        Value::ChronoTime(v) => v.map(|t| text(t.format("%T%.f").to_string())),
        Value::ChronoDateTime(v) => v.map(|dt| text(dt.format("%F %T%.f").to_string())),
        Value::ChronoDateTimeUtc(v) => v.map(|dt| timestamp_text(&*dt)),
        Value::ChronoDateTimeLocal(v) => v.map(|dt| timestamp_text(&*dt)),
        Value::ChronoDateTimeWithTimeZone(v) => v.map(|dt| timestamp_text(&*dt)),
        Value::Uuid(v) => v.map(|id| HranaValue::Blob {
            base64: STANDARD.encode(id.as_bytes()),
        }),
        #[allow(unreachable_patterns)]
        other => return Err(DbErr::Custom(format!("Cannot bind {other:?} for Turso"))),
    };

    Ok(encoded.unwrap_or(HranaValue::Null))
}

/// How a result column is read back, chosen from its declared SQLite type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    BigInteger,
    Boolean,
    Float,
    Double,
    Text,
    Json,
    Timestamp,
    TimestampTz,
    Blob,
    /// An expression. The value's own type decides.
    Untyped,
}

impl ColumnKind {
    fn resolve(decltype: Option<&str>, name: &str) -> Self {
        let Some(decltype) = decltype else {
            // Schema lookups select boolean expressions under these aliases.
            return match name {
                "has_table" | "has_column" | "has_index" => ColumnKind::Boolean,
                _ => ColumnKind::Untyped,
            };
        };

        let base = decltype
            .split('(')
            .next()
            .unwrap_or(decltype)
            .trim()
            .to_ascii_lowercase();
        match base.as_str() {
            "integer" | "int" | "tinyint" | "smallint" => ColumnKind::Integer,
            "bigint" => ColumnKind::BigInteger,
            "boolean" | "bool" => ColumnKind::Boolean,
            "float" => ColumnKind::Float,
            "double" | "real" => ColumnKind::Double,
            "json_text" | "jsonb_text" => ColumnKind::Json,
            "timestamp_with_timezone_text" => ColumnKind::TimestampTz,
            "datetime_text" | "timestamp_text" => ColumnKind::Timestamp,
            "blob" => ColumnKind::Blob,
            _ => ColumnKind::Text,
        }
    }

    fn null(self) -> Value {
        match self {
            ColumnKind::Integer => Value::Int(None),
            ColumnKind::BigInteger => Value::BigInt(None),
            ColumnKind::Boolean => Value::Bool(None),
            ColumnKind::Float => Value::Float(None),
            ColumnKind::Double => Value::Double(None),
            ColumnKind::Json => Value::Json(None),
            ColumnKind::Timestamp => Value::ChronoDateTime(None),
            ColumnKind::TimestampTz => Value::ChronoDateTimeWithTimeZone(None),
            ColumnKind::Blob => Value::Bytes(None),
            ColumnKind::Text | ColumnKind::Untyped => Value::String(None),
        }
    }

    fn decode(self, value: HranaValue) -> Result<Value, DbErr> {
        let decoded = match (self, value) {
            (kind, HranaValue::Null) => kind.null(),
            (ColumnKind::Integer | ColumnKind::Untyped, HranaValue::Integer { value }) => {
                let n = parse_integer(&value)?;
                match i32::try_from(n) {
                    Ok(small) => Value::Int(Some(small)),
                    Err(_) => Value::BigInt(Some(n)),
                }
            }
            (ColumnKind::BigInteger, HranaValue::Integer { value }) => {
                Value::BigInt(Some(parse_integer(&value)?))
            }
            (ColumnKind::Boolean, HranaValue::Integer { value }) => {
                Value::Bool(Some(parse_integer(&value)? != 0))
            }
            (ColumnKind::Float, HranaValue::Float { value }) => Value::Float(Some(value as f32)),
            (ColumnKind::Float, HranaValue::Integer { value }) => {
                Value::Float(Some(parse_integer(&value)? as f32))
            }
            (ColumnKind::Double | ColumnKind::Untyped, HranaValue::Float { value }) => {
                Value::Double(Some(value))
            }
            (ColumnKind::Double, HranaValue::Integer { value }) => {
                Value::Double(Some(parse_integer(&value)? as f64))
            }
            (ColumnKind::Text | ColumnKind::Untyped, HranaValue::Text { value })
            | (ColumnKind::Text, HranaValue::Integer { value }) => {
                Value::String(Some(Box::new(value)))
            }
            (ColumnKind::Text, HranaValue::Float { value }) => {
                Value::String(Some(Box::new(value.to_string())))
            }
            (ColumnKind::Json, HranaValue::Text { value }) => {
                let json = serde_json::from_str(&value)
                    .map_err(|e| DbErr::Type(format!("invalid JSON column: {e}")))?;
                Value::Json(Some(Box::new(json)))
            }
            (ColumnKind::TimestampTz, HranaValue::Text { value }) => {
                Value::ChronoDateTimeWithTimeZone(Some(Box::new(parse_timestamp_tz(&value)?)))
            }
            (ColumnKind::Timestamp, HranaValue::Text { value }) => {
                Value::ChronoDateTime(Some(Box::new(parse_timestamp(&value)?)))
            }
            (ColumnKind::Blob | ColumnKind::Untyped, HranaValue::Blob { base64 }) => {
                let bytes = STANDARD
                    .decode(base64)
                    .map_err(|e| DbErr::Type(format!("invalid blob encoding: {e}")))?;
                Value::Bytes(Some(Box::new(bytes)))
            }
            (kind, value) => {
                return Err(DbErr::Type(format!("cannot read {value:?} as {kind:?}")));
            }
        };

        Ok(decoded)
    }
}

fn parse_integer(value: &str) -> Result<i64, DbErr> {
    value
        .parse()
        .map_err(|_| DbErr::Type(format!("invalid integer '{value}'")))
}

fn parse_timestamp_tz(value: &str) -> Result<DateTime<FixedOffset>, DbErr> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%F %T%.f%:z"))
        .or_else(|_| parse_timestamp(value).map(|naive| naive.and_utc().fixed_offset()))
        .map_err(|_| DbErr::Type(format!("invalid timestamp '{value}'")))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, DbErr> {
    NaiveDateTime::parse_from_str(value, "%F %T%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%FT%T%.f"))
        .map_err(|_| DbErr::Type(format!("invalid timestamp '{value}'")))
}

fn decode_rows(result: StmtResult) -> Result<Vec<ProxyRow>, DbErr> {
    let columns: Vec<(String, ColumnKind)> = result
        .cols
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let name = column
                .name
                .clone()
                .unwrap_or_else(|| format!("column{index}"));
            let kind = ColumnKind::resolve(column.decltype.as_deref(), &name);
            (name, kind)
        })
        .collect();

    result
        .rows
        .into_iter()
        .map(|row| {
            let values = columns
                .iter()
                .zip(row)
                .map(|((name, kind), value)| Ok((name.clone(), kind.decode(value)?)))
                .collect::<Result<BTreeMap<_, _>, DbErr>>()?;
            Ok(ProxyRow::new(values))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_libsql_urls_map_to_https() {
        assert_eq!(
            http_base_url("libsql://bloggy-acme.turso.io"),
            "https://bloggy-acme.turso.io"
        );
        assert_eq!(
            http_base_url("https://bloggy-acme.turso.io/"),
            "https://bloggy-acme.turso.io"
        );
        assert_eq!(http_base_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_parameters_are_stored_like_local_sqlite() {
        let created_at = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 1, 12, 30, 0)
            .unwrap();

        assert_eq!(encode_value(Value::Bool(Some(true))).unwrap(), integer(1));
        assert_eq!(encode_value(Value::BigUnsigned(Some(20))).unwrap(), integer(20));
        assert_eq!(encode_value(Value::String(None)).unwrap(), HranaValue::Null);
        assert_eq!(
            encode_value(Value::ChronoDateTimeWithTimeZone(Some(Box::new(created_at)))).unwrap(),
            text("2025-03-01T12:30:00+00:00".to_string())
        );
        assert!(encode_value(Value::BigUnsigned(Some(u64::MAX))).is_err());
    }

    #[test]
    fn test_statement_wire_format() {
        let request = PipelineRequest {
            baton: None,
            requests: vec![StreamRequest::sql("SELECT 1"), StreamRequest::Close],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "baton": null,
                "requests": [
                    { "type": "execute", "stmt": { "sql": "SELECT 1", "args": [], "want_rows": false } },
                    { "type": "close" }
                ]
            })
        );
    }

    #[test]
    fn test_rows_decode_by_declared_type() {
        let response: PipelineResponse = serde_json::from_value(json!({
            "baton": null,
            "base_url": null,
            "results": [{
                "type": "ok",
                "response": { "type": "execute", "result": {
                    "cols": [
                        { "name": "id", "decltype": "integer" },
                        { "name": "display_name", "decltype": "varchar" },
                        { "name": "created_at", "decltype": "timestamp_with_timezone_text" },
                        { "name": "deleted_at", "decltype": "timestamp_with_timezone_text" },
                        { "name": "num_items", "decltype": null },
                        { "name": "has_table", "decltype": null }
                    ],
                    "rows": [[
                        { "type": "integer", "value": "7" },
                        { "type": "text", "value": "Ada" },
                        { "type": "text", "value": "2025-03-01T12:30:00.123+00:00" },
                        { "type": "null" },
                        { "type": "integer", "value": "42" },
                        { "type": "integer", "value": "1" }
                    ]],
                    "affected_row_count": 0,
                    "last_insert_rowid": null
                }}
            }, { "type": "ok", "response": { "type": "close" } }]
        }))
        .unwrap();

        let rows = decode_rows(response.into_statement_result().unwrap()).unwrap();
        let row = &rows[0];
        assert_eq!(row.try_get::<i32, _>("id").unwrap(), 7);
        assert_eq!(row.try_get::<String, _>("display_name").unwrap(), "Ada");
        assert_eq!(
            row.try_get::<DateTime<FixedOffset>, _>("created_at")
                .unwrap()
                .timestamp_millis(),
            1_740_832_200_123
        );
        assert_eq!(
            row.try_get::<Option<DateTime<FixedOffset>>, _>("deleted_at")
                .unwrap(),
            None
        );
        assert_eq!(row.try_get::<i32, _>("num_items").unwrap(), 42);
        assert!(row.try_get::<bool, _>("has_table").unwrap());
    }

    #[test]
    fn test_statement_errors_carry_the_server_message() {
        let response: PipelineResponse = serde_json::from_value(json!({
            "baton": null,
            "results": [{
                "type": "error",
                "error": { "message": "UNIQUE constraint failed: users.email", "code": "SQLITE_CONSTRAINT" }
            }]
        }))
        .unwrap();

        let error = response.into_statement_result().unwrap_err();
        assert!(error.to_string().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn test_space_separated_timestamps_are_accepted() {
        let parsed = parse_timestamp_tz("2025-03-01 12:30:00").unwrap();
        assert_eq!(parsed.timestamp(), 1_740_832_200);
    }
}
