//! PostgREST client for a hosted `expenses` table (Supabase REST API).

use super::{RemoteExpenseRow, RemoteGateway, format_timestamp};
use crate::config::RemoteConfig;
use crate::core::{Clock, GatewayError, Result, SyncError};
use crate::outbox::{OutboxOp, OutboxPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use std::sync::Arc;
use tracing::{Level, event};

const EXPENSES_PATH: &str = "rest/v1/expenses";

pub struct RestGateway {
    client: Client,
    base_url: String,
    anon_key: String,
    clock: Arc<dyn Clock>,
}

impl RestGateway {
    pub fn new(config: &RemoteConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            clock,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, EXPENSES_PATH)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn upsert(&self, row: &RemoteExpenseRow) -> std::result::Result<(), GatewayError> {
        let request = self
            .client
            .post(self.endpoint())
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        let response = self.authorized(request).send().await.map_err(transport)?;
        expect_success(response).await.map(|_| ())
    }

    async fn mark_deleted(&self, expense_id: &str) -> std::result::Result<(), GatewayError> {
        let body = json!({
            "deleted": true,
            "updated_at": format_timestamp(self.clock.now()),
        });
        let request = self
            .client
            .patch(self.endpoint())
            .query(&[("id", format!("eq.{}", expense_id))])
            .header("Prefer", "return=minimal")
            .json(&body);
        let response = self.authorized(request).send().await.map_err(transport)?;
        expect_success(response).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn send(&self, op: &OutboxOp) -> std::result::Result<(), GatewayError> {
        match &op.payload {
            OutboxPayload::UpsertExpense { expense } => {
                self.upsert(&RemoteExpenseRow::from_expense(expense)).await
            }
            OutboxPayload::DeleteExpense { expense_id, .. } => self.mark_deleted(expense_id).await,
        }
    }

    async fn pull_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> std::result::Result<Vec<RemoteExpenseRow>, GatewayError> {
        let mut query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "updated_at.asc".to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push((
                "updated_at".to_string(),
                format!("gt.{}", format_timestamp(cursor)),
            ));
        }

        let request = self.client.get(self.endpoint()).query(&query);
        let response = self.authorized(request).send().await.map_err(transport)?;
        let response = expect_success(response).await?;
        let rows = response
            .json::<Vec<RemoteExpenseRow>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        event!(Level::DEBUG, rows = rows.len(), "pulled remote page");
        Ok(rows)
    }
}

async fn expect_success(response: Response) -> std::result::Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Http {
        status: status.as_u16(),
        body: truncate(body),
    })
}

fn transport(err: reqwest::Error) -> GatewayError {
    if err.is_connect() || err.is_timeout() {
        GatewayError::Offline
    } else if let Some(status) = err.status() {
        GatewayError::Http {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn truncate(mut body: String) -> String {
    const MAX_BODY: usize = 512;
    if body.len() > MAX_BODY {
        let mut end = MAX_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
