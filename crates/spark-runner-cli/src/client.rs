//! 管理面 HTTP 客户端。

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

pub struct AdminClient {
    base: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn status(&self) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/admin/status"))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base))?;
        read_body(response).await
    }

    /// 无请求体的 POST 命令：`start`、`stop`、`shutdown`。
    pub async fn command(&self, name: &str) -> Result<Value> {
        let response = self
            .http
            .post(self.url(&format!("/admin/{name}")))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base))?;
        read_body(response).await
    }

    pub async fn reconfigure(&self, config: Value, persist: bool) -> Result<Value> {
        let response = self
            .http
            .post(self.url("/admin/reconfigure"))
            .json(&json!({ "config": config, "persist": persist }))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base))?;
        read_body(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

/// 读取应答；非 2xx 或 `ok: false` 都视为失败，并把服务端消息带回。
async fn read_body(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("admin interface returned an unreadable body (HTTP {status})"))?;
    if !status.is_success() || body.get("ok") == Some(&Value::Bool(false)) {
        bail!(
            "HTTP {status}: {}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
        );
    }
    Ok(body)
}

/// 把 TOML 配置片段读成 JSON，作为 `reconfigure` 的 `config`。
pub fn read_update(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let table: toml::Table =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    serde_json::to_value(table).context("configuration cannot be expressed as JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_files_are_converted_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.toml");
        std::fs::write(
            &path,
            "[detectors.RandomDetector.params]\nthreshold = 0.25\nseed = 9\n",
        )
        .unwrap();
        assert_eq!(
            read_update(&path).unwrap(),
            json!({ "detectors": { "RandomDetector": { "params": { "threshold": 0.25, "seed": 9 } } } })
        );
    }

    #[test]
    fn base_url_is_normalised() {
        let client = AdminClient::new("http://127.0.0.1:8000/");
        assert_eq!(client.url("/health"), "http://127.0.0.1:8000/health");
    }
}
