//! HTTP client for the `/pgselect` and `/pgcommand` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{CommandGateway, CommandOutcome, QueryResponse, RemoteRow, SqlValue, Statement};
use crate::config::{GatewayConfig, ParamMode};
use crate::errors::GatewayError;

/// Request body. `params` is only sent in [`ParamMode::Bound`].
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a [SqlValue]>,
}

/// Gateway speaking the JSON `{"query": ...}` protocol over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    select_path: String,
    command_path: String,
    param_mode: ParamMode,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        token: Option<&str>,
    ) -> Result<Self, GatewayError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("marketsync/0.1"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| GatewayError::NotConfigured(format!("invalid gateway token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        info!(base_url = %base_url, timeout_secs = timeout.as_secs(), "created HttpGateway");
        Ok(Self {
            http,
            base_url,
            select_path: "/pgselect".into(),
            command_path: "/pgcommand".into(),
            param_mode: ParamMode::Inline,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        if config.base_url.is_empty() {
            return Err(GatewayError::NotConfigured("gateway.base_url is empty".into()));
        }
        let mut gateway = Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
            config.token.as_deref(),
        )?;
        gateway.select_path = config.select_path.clone();
        gateway.command_path = config.command_path.clone();
        gateway.param_mode = config.param_mode;
        Ok(gateway)
    }

    pub fn with_param_mode(mut self, mode: ParamMode) -> Self {
        self.param_mode = mode;
        self
    }

    pub fn select_url(&self) -> String {
        format!("{}{}", self.base_url, self.select_path)
    }

    pub fn command_url(&self) -> String {
        format!("{}{}", self.base_url, self.command_path)
    }

    fn request_body<'a>(&self, stmt: &'a Statement) -> Result<QueryRequest<'a>, GatewayError> {
        match self.param_mode {
            ParamMode::Inline => Ok(QueryRequest {
                query: stmt.render_inline()?,
                params: None,
            }),
            ParamMode::Bound => Ok(QueryRequest {
                query: stmt.sql.clone(),
                params: Some(&stmt.params),
            }),
        }
    }

    async fn post(&self, url: &str, stmt: &Statement) -> Result<QueryResponse, GatewayError> {
        let body = self.request_body(stmt)?;
        debug!(url, bytes = body.query.len(), params = stmt.params.len(), "posting statement");

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            warn!(status = %status, "gateway returned error status");
            return Err(GatewayError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&text, 512),
            });
        }

        let envelope: QueryResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::DataShape(format!("invalid response envelope: {e}")))?;
        envelope.into_result()
    }
}

#[async_trait]
impl CommandGateway for HttpGateway {
    #[instrument(skip(self, stmt))]
    async fn execute_select(&self, stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError> {
        let rows = self.post(&self.select_url(), stmt).await?.rows()?;
        debug!(count = rows.len(), "select returned rows");
        Ok(rows)
    }

    #[instrument(skip(self, stmt))]
    async fn execute_command(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError> {
        let resp = self.post(&self.command_url(), stmt).await?;
        let rows_affected = resp
            .data
            .get("rows_affected")
            .and_then(|v| v.as_u64());
        Ok(CommandOutcome {
            message: resp.message,
            rows_affected,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
