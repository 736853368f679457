//! PostgREST client
//!
//! Plain request/response access to the store's tables.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{Filter, OrderBy};
use crate::error::{StoreError, StoreResult};

const PREFER_REPRESENTATION: &str = "return=representation";

pub(crate) struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(store_url: &str, api_key: &str) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| StoreError::Unavailable(format!("Invalid API key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| StoreError::Unavailable(format!("Invalid API key: {}", e)))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: rest_base_url(store_url),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, table))
    }

    pub async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        debug!("GET {} where {}", table, filter);
        let response = self
            .request(Method::GET, table)
            .query(&select_query(filter, order, limit))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn insert(&self, table: &str, row: Value) -> StoreResult<Value> {
        debug!("POST {}", table);
        let response = self
            .request(Method::POST, table)
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| StoreError::Http {
            status: 200,
            message: format!("insert into {} returned no row", table),
        })
    }

    pub async fn update(&self, table: &str, id: Uuid, patch: Value) -> StoreResult<Option<Value>> {
        debug!("PATCH {} id={}", table, id);
        let response = self
            .request(Method::PATCH, table)
            .header("Prefer", PREFER_REPRESENTATION)
            .query(&[id_query(id)])
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete(&self, table: &str, id: Uuid) -> StoreResult<bool> {
        debug!("DELETE {} id={}", table, id);
        let response = self
            .request(Method::DELETE, table)
            .header("Prefer", PREFER_REPRESENTATION)
            .query(&[id_query(id)])
            .send()
            .await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        Ok(!rows.is_empty())
    }
}

/// Turn a non-success response into a [`StoreError::Http`]
async fn check(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Http {
        status: status.as_u16(),
        message,
    })
}

fn rest_base_url(store_url: &str) -> String {
    format!("{}/rest/v1", store_url.trim_end_matches('/'))
}

fn id_query(id: Uuid) -> (&'static str, String) {
    ("id", format!("eq.{}", id))
}

fn select_query(
    filter: &Filter,
    order: Option<OrderBy>,
    limit: Option<usize>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        (filter.column, format!("eq.{}", filter.value)),
    ];
    if let Some(order) = order {
        let direction = if order.ascending { "asc" } else { "desc" };
        query.push(("order", format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    query
}
