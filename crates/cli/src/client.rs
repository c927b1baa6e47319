//! A small typed wrapper over the gateway's REST API.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;

pub struct ApiResponse {
    pub ok: bool,
    pub body: Value,
}

#[derive(Clone)]
pub struct Gateway {
    base: String,
    token: Option<String>,
    subject: String,
    roles: Option<String>,
    client: Client,
}

impl Gateway {
    pub fn new(base: String, token: Option<String>, subject: String, roles: Option<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token,
            subject,
            roles,
            client: Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base, path))
            .header("x-animus-subject", &self.subject);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(roles) = &self.roles {
            builder = builder.header("x-animus-roles", roles);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let response = builder.send().await.context("gateway unreachable")?;
        let ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("non-JSON response".into()));
        Ok(ApiResponse { ok, body })
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.send(self.request(reqwest::Method::POST, path).json(body))
            .await
    }
}
