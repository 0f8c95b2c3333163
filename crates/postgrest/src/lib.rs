//! PostgREST client used by slotwatch
//!
//! A small builder over the PostgREST HTTP dialect that Supabase exposes at
//! `/rest/v1`. It covers what the slot tracker needs from the store:
//!
//! - `select` with equality, `not null`, and `in` filters
//! - multi-key ordering with explicit null placement
//! - `limit`
//! - `upsert` on a conflict key

use log::{debug, trace};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// PostgREST APIエラーの詳細情報
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// エラー型
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// ソート方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Where NULLs land relative to the other values of an ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// PostgREST クライアント
///
/// One instance targets one table. Builder methods consume and return `self`,
/// so a query reads left to right:
///
/// ```no_run
/// # async fn run() -> Result<(), slotwatch_postgrest::PostgrestError> {
/// use slotwatch_postgrest::{PostgrestClient, SortOrder};
///
/// let rows: Vec<serde_json::Value> =
///     PostgrestClient::new("http://localhost:54321", "anon", "appointments", reqwest::Client::new())
///         .select("*")
///         .eq("available", "true")
///         .order("appointment_date", SortOrder::Ascending)
///         .execute()
///         .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: HashMap<String, String>,
    // Ordering keys in precedence order; PostgREST takes them as one comma list.
    order_terms: Vec<String>,
    timeout: Option<Duration>,
}

impl PostgrestClient {
    /// 新しい PostgreST クライアントを作成
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        match HeaderValue::from_str(api_key) {
            Ok(value) => {
                headers.insert("apikey", value);
            }
            Err(_) => debug!("API key is not a valid header value, sending without apikey"),
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", api_key)) {
            headers.insert(reqwest::header::AUTHORIZATION, bearer);
        }

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: HashMap::new(),
            order_terms: Vec::new(),
            timeout: None,
        }
    }

    /// ヘッダーを追加
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Per-request timeout. Without one the HTTP client's own defaults apply.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// 取得するカラムを指定
    pub fn select(mut self, columns: &str) -> Self {
        self.query_params
            .insert("select".to_string(), columns.to_string());
        self
    }

    /// 等価フィルター
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.query_params
            .insert(column.to_string(), format!("eq.{}", value));
        self
    }

    /// `column IS NOT NULL`
    pub fn not_null(mut self, column: &str) -> Self {
        self.query_params
            .insert(column.to_string(), "not.is.null".to_string());
        self
    }

    /// IN フィルター
    ///
    /// Values containing PostgREST reserved characters are double-quoted.
    pub fn in_list(mut self, column: &str, values: &[&str]) -> Self {
        let value_list = values
            .iter()
            .map(|v| quote_list_value(v))
            .collect::<Vec<_>>()
            .join(",");
        self.query_params
            .insert(column.to_string(), format!("in.({})", value_list));
        self
    }

    /// ソート順を指定
    ///
    /// Repeated calls add further keys; the first call has the highest precedence.
    pub fn order(self, column: &str, order: SortOrder) -> Self {
        self.push_order(column, order, None)
    }

    /// Like [`order`](Self::order) with explicit placement of NULLs.
    pub fn order_nulls(self, column: &str, order: SortOrder, nulls: NullsOrder) -> Self {
        self.push_order(column, order, Some(nulls))
    }

    fn push_order(mut self, column: &str, order: SortOrder, nulls: Option<NullsOrder>) -> Self {
        let mut term = format!(
            "{}.{}",
            column,
            match order {
                SortOrder::Ascending => "asc",
                SortOrder::Descending => "desc",
            }
        );
        match nulls {
            Some(NullsOrder::First) => term.push_str(".nullsfirst"),
            Some(NullsOrder::Last) => term.push_str(".nullslast"),
            None => {}
        }
        self.order_terms.push(term);
        self
    }

    /// 取得件数を制限
    pub fn limit(mut self, count: usize) -> Self {
        self.query_params
            .insert("limit".to_string(), count.to_string());
        self
    }

    /// データを取得
    pub async fn execute<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<T>, PostgrestError> {
        let url = self.build_url()?;
        trace!("GET {}", url);

        let response = self
            .request(self.http_client.get(&url))
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let response = check_status(response).await?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// First row of the result set, if any. Adds `limit=1` to the query.
    pub async fn execute_one<T: for<'de> Deserialize<'de>>(
        self,
    ) -> Result<Option<T>, PostgrestError> {
        let rows = self.limit(1).execute::<T>().await?;
        Ok(rows.into_iter().next())
    }

    /// Insert-or-update keyed on `on_conflict`.
    ///
    /// Maps to `POST ?on_conflict=<column>` with
    /// `Prefer: resolution=merge-duplicates`, so an existing row with the same
    /// key is updated in place instead of failing the unique constraint.
    pub async fn upsert<T: Serialize>(
        &self,
        values: T,
        on_conflict: &str,
    ) -> Result<Value, PostgrestError> {
        let mut url = Url::parse(&self.build_url()?)?;
        url.query_pairs_mut().append_pair("on_conflict", on_conflict);
        debug!("Upserting into {} on conflict {}", self.table, on_conflict);

        let request = self
            .request(self.http_client.post(url.as_str()))
            .header(
                "prefer",
                "resolution=merge-duplicates,return=representation",
            )
            .json(&values);
        send_write(request).await
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.headers(self.headers.clone());
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    // URLを構築
    fn build_url(&self) -> Result<String, PostgrestError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
            if !self.order_terms.is_empty() {
                pairs.append_pair("order", &self.order_terms.join(","));
            }
        }

        Ok(url.to_string())
    }
}

fn quote_list_value(value: &str) -> String {
    const RESERVED: &[char] = &[',', '.', ':', '(', ')', ' ', '"'];
    if value.contains(RESERVED) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

async fn check_status(response: Response) -> Result<Response, PostgrestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
        Ok(details) => Err(PostgrestError::ApiError { details, status }),
        Err(_) => Err(PostgrestError::UnparsedApiError {
            message: error_text,
            status,
        }),
    }
}

async fn send_write(request: RequestBuilder) -> Result<Value, PostgrestError> {
    let response = request.send().await.map_err(PostgrestError::NetworkError)?;
    let response = check_status(response).await?;

    let body_text = response.text().await.map_err(|e| {
        PostgrestError::DeserializationError(format!("Failed to read response body: {}", e))
    })?;

    // 204 No Content, or `return=minimal` on the server side
    if body_text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str::<Value>(&body_text)
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_select() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("select", "*"))
            .and(header("apikey", "fake-key"))
            .and(header("authorization", "Bearer fake-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "a1", "office": "Bangor" },
                { "id": "a2", "office": "Calais" }
            ])))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "appointments",
            reqwest::Client::new(),
        );

        let data = client.select("*").execute::<Value>().await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(
            data.first()
                .and_then(|v: &Value| v.get("office"))
                .and_then(Value::as_str),
            Some("Bangor")
        );
    }

    #[tokio::test]
    async fn test_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("available", "eq.false"))
            .and(query_param("office", "in.(Augusta,Bangor)"))
            .and(query_param("completed_at", "not.is.null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "a1" }])))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "appointments",
            reqwest::Client::new(),
        );

        let data = client
            .select("*")
            .eq("available", "false")
            .in_list("office", &["Augusta", "Bangor"])
            .not_null("completed_at")
            .execute::<Value>()
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
    }

    #[tokio::test]
    async fn test_order_keys_accumulate() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param(
                "order",
                "is_golden.desc,appointment_date.asc,appointment_time.asc.nullsfirst,completed_at.desc.nullslast",
            ))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "appointments",
            reqwest::Client::new(),
        );

        let data = client
            .select("*")
            .order("is_golden", SortOrder::Descending)
            .order("appointment_date", SortOrder::Ascending)
            .order_nulls("appointment_time", SortOrder::Ascending, NullsOrder::First)
            .order_nulls("completed_at", SortOrder::Descending, NullsOrder::Last)
            .limit(10)
            .execute::<Value>()
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_in_list_quotes_reserved_characters() {
        assert_eq!(quote_list_value("Portland"), "Portland");
        assert_eq!(quote_list_value("South Portland"), "\"South Portland\"");
        assert_eq!(quote_list_value("a,b"), "\"a,b\"");
    }

    #[tokio::test]
    async fn test_execute_one() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/scrape_runs"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "r1" }])))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "scrape_runs",
            reqwest::Client::new(),
        );

        let row = client.select("*").execute_one::<Value>().await.unwrap();
        assert_eq!(row, Some(json!({ "id": "r1" })));
    }

    #[tokio::test]
    async fn test_upsert() {
        let mock_server = MockServer::start().await;
        let row = json!({ "email": "a@example.com", "active": true });

        Mock::given(method("POST"))
            .and(path("/rest/v1/email_subscribers"))
            .and(query_param("on_conflict", "email"))
            .and(headers(
                "prefer",
                vec!["resolution=merge-duplicates", "return=representation"],
            ))
            .and(body_json(&row))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([row.clone()])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "email_subscribers",
            reqwest::Client::new(),
        );

        let result = client.upsert(&row, "email").await.unwrap();
        assert_eq!(result, json!([row]));
    }

    #[tokio::test]
    async fn test_upsert_without_representation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/email_subscribers"))
            .and(query_param("on_conflict", "email"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::new(
            &mock_server.uri(),
            "fake-key",
            "email_subscribers",
            reqwest::Client::new(),
        );

        let result = client
            .upsert(json!({ "email": "b@example.com", "active": true }), "email")
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mock_server = MockServer::start().await;
        let base_uri = mock_server.uri();

        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(header("apikey", "invalid-key"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "Invalid API key"
            })))
            .mount(&mock_server)
            .await;

        let bad_row = json!({ "active": true });
        Mock::given(method("POST"))
            .and(path("/rest/v1/email_subscribers"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "23502",
                "message": "null value in column \"email\" violates not-null constraint",
                "details": null,
                "hint": null
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/server_error"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let client_401 =
            PostgrestClient::new(&base_uri, "invalid-key", "appointments", reqwest::Client::new());
        match client_401.select("*").execute::<Value>().await {
            Err(PostgrestError::ApiError { details, status }) => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
                assert_eq!(details.message, Some("Invalid API key".to_string()));
            }
            other => panic!("Expected ApiError for 401, got {:?}", other),
        }

        let client_400 =
            PostgrestClient::new(&base_uri, "fake-key", "email_subscribers", reqwest::Client::new());
        match client_400.upsert(&bad_row, "email").await {
            Err(PostgrestError::ApiError { details, status }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert_eq!(details.code, Some("23502".to_string()));
            }
            other => panic!("Expected ApiError for 400, got {:?}", other),
        }

        let client_500 =
            PostgrestClient::new(&base_uri, "fake-key", "server_error", reqwest::Client::new());
        match client_500.select("*").execute::<Value>().await {
            Err(PostgrestError::UnparsedApiError { message, status }) => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("Expected UnparsedApiError for 500, got {:?}", other),
        }
    }
}
