use crate::domain::ports::{HttpExecutor, HttpResponse, NoResponse};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// GET executor backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl ReqwestExecutor {
    pub fn new(
        user_agent: Option<&str>,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(agent) = user_agent {
            builder = builder.user_agent(agent.to_string());
        }

        Ok(Self {
            client: builder.build()?,
            headers,
            timeout,
        })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, url: &str) -> std::result::Result<HttpResponse, NoResponse> {
        let mut request = self.client.get(url);

        // 添加自定義標頭
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        // 設定超時
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!("📡 GET {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| NoResponse::new(url, e.to_string()))?;
        let status = response.status().as_u16();

        // 讀取 body 失敗也視為沒有收到回應
        let body = response
            .bytes()
            .await
            .map_err(|e| NoResponse::new(url, format!("failed to read response body: {}", e)))?;

        tracing::debug!("📡 {} answered {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}
