//! HTTP Effects
//!
//! [`ApiClient`] turns REST endpoints into request-processor effects. Path
//! parameters are taken from the request payload (`/applications/{application_id}`);
//! the remaining payload fields become the query string (GET, DELETE) or the
//! JSON body (everything else).
//!
//! Non-2xx responses become a [`RequestError`] carrying the HTTP status and
//! the backend's `code`/`message`/`details` when the body provides them.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::domain::config::ApiSettings;
use crate::error::{HttpSnafu, RequestError, Result};
use crate::services::processor::{Effect, EffectContext, EffectResult};

/// gRPC status codes the backend also reports over REST
const INVALID_ARGUMENT: i64 = 3;
const DEADLINE_EXCEEDED: i64 = 4;
const UNAVAILABLE: i64 = 14;

/// Shared JSON REST client
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context(HttpSnafu)?;
        Ok(Self::with_client(client, settings))
    }

    /// Use an existing `reqwest` client (shared connection pool)
    pub fn with_client(client: reqwest::Client, settings: &ApiSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').into(),
            token: settings.token.as_deref().map(Into::into),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Add the bearer token, if any
    pub(crate) fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Perform one call, rendering `template` from `payload`
    pub async fn call(&self, method: Method, template: &str, payload: Value) -> EffectResult {
        let (path, rest) = render_path(template, payload)?;
        let url = self.url(&path);
        tracing::debug!("{} {}", method, url);

        let mut builder = self.authorize(self.client.request(method.clone(), &url));
        if method == Method::GET || method == Method::DELETE {
            builder = builder.query(&query_pairs(&rest));
        } else if !rest.is_null() {
            builder = builder.json(&rest);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(error_from_body(status, &body));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| {
            RequestError::with_status(status.as_u16(), format!("Invalid response body: {e}"))
        })
    }

    /// Effect calling `method template` with the request payload
    ///
    /// An abort action for the operation cancels the in-flight call.
    pub fn effect<T: Into<String>>(&self, method: Method, template: T) -> impl Effect + use<T> {
        let client = self.clone();
        let template: Arc<str> = template.into().into();
        move |ctx: EffectContext| {
            let client = client.clone();
            let method = method.clone();
            let template = template.clone();
            async move {
                ctx.abort
                    .guard(client.call(method, &template, ctx.payload))
                    .await
            }
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Substitute `{name}` placeholders from `payload`
///
/// Returns the rendered path and the payload without the consumed fields.
pub fn render_path(template: &str, payload: Value) -> std::result::Result<(String, Value), RequestError> {
    let mut fields = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other if !template.contains('{') => return Ok((template.to_string(), other)),
        other => {
            return Err(invalid_argument(format!(
                "Path {template} needs an object payload, got {other}"
            )));
        }
    };

    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            return Err(invalid_argument(format!("Unterminated parameter in {template}")));
        };
        let name = &rest[start + 1..start + len];
        let value = fields
            .remove(name)
            .ok_or_else(|| invalid_argument(format!("Missing path parameter {name}")))?;
        path.push_str(&rest[..start]);
        path.push_str(&scalar_to_string(&value));
        rest = &rest[start + len + 1..];
    }
    path.push_str(rest);

    let rest = if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    };
    Ok((path, rest))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query_pairs(rest: &Value) -> Vec<(String, String)> {
    let Value::Object(fields) = rest else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .flat_map(|(key, value)| match value {
            Value::Array(items) => items
                .iter()
                .map(|item| (key.clone(), scalar_to_string(item)))
                .collect::<Vec<_>>(),
            other => vec![(key.clone(), scalar_to_string(other))],
        })
        .collect()
}

fn invalid_argument(message: String) -> RequestError {
    RequestError::new(message).code(INVALID_ARGUMENT)
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    message: Option<String>,
    details: Option<Value>,
}

/// Build the error for a non-2xx response
pub fn error_from_body(status: StatusCode, body: &[u8]) -> RequestError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let fallback = || {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    };

    let mut error = match parsed {
        Some(ErrorBody {
            code,
            message,
            details,
        }) => {
            let mut error = RequestError::with_status(status.as_u16(), message.unwrap_or_else(fallback));
            error.code = code;
            error.details = details;
            error
        }
        None => RequestError::with_status(status.as_u16(), fallback()),
    };
    if error.message.is_empty() {
        error.message = fallback();
    }
    error
}

/// Map a transport failure (no response) to a request error
fn transport_error(err: reqwest::Error) -> RequestError {
    let error = RequestError::new(err.to_string());
    let error = match err.status() {
        Some(status) => RequestError {
            status: Some(status.as_u16()),
            ..error
        },
        None => error,
    };
    if err.is_timeout() {
        error.code(DEADLINE_EXCEEDED)
    } else if err.is_connect() {
        error.code(UNAVAILABLE)
    } else {
        error
    }
}
