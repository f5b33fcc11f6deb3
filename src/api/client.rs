use super::types::{
    classify_submit, BatchStatus, BatchStatusRequest, GenerationRequest, SubmitBody,
    SubmitOutcome, TaskSnapshot, TaskStatusResponse,
};
use super::GenerationBackend;
use crate::error::{Result, StoryboardError};
use crate::script::{Character, Script};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 分镜后端的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct StoryboardClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl StoryboardClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.authorized(self.client.get(self.url(path))).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(StoryboardError::Api(format!(
                "GET {} failed (HTTP {}): {}",
                path, status, error_text
            )));
        }
        Ok(response.json().await?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .authorized(self.client.post(self.url(path)))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(StoryboardError::Api(format!(
                "POST {} failed (HTTP {}): {}",
                path, status, error_text
            )));
        }
        Ok(response.json().await?)
    }

    /// 脚本列表，兼容 `{scripts: {results: [..]}}` 和 `{scripts: [..]}`
    pub async fn list_scripts(&self) -> Result<Vec<Script>> {
        let data: Value = self.get_json("scripts").await?;
        let scripts: Vec<Script> = decode_list(&data, "scripts")?;
        info!("Fetched {} scripts", scripts.len());
        Ok(scripts)
    }

    pub async fn get_script(&self, id: i64) -> Result<Script> {
        let data: Value = self.get_json(&format!("scripts/{}", id)).await?;
        let script = data.get("script").cloned().unwrap_or(data);
        Ok(serde_json::from_value(script)?)
    }

    pub async fn list_characters(&self) -> Result<Vec<Character>> {
        let data: Value = self.get_json("characters").await?;
        let characters: Vec<Character> = decode_list(&data, "characters")?;
        info!("Fetched {} characters", characters.len());
        Ok(characters)
    }

    /// 下载图片到本地
    pub async fn download(&self, url: &str, output_path: &Path) -> Result<()> {
        info!("Downloading image from: {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoryboardError::Api(format!(
                "Image download failed (HTTP {}): {}",
                status, url
            )));
        }
        let image_data = response.bytes().await?;
        tokio::fs::write(output_path, image_data).await?;
        info!("Image saved to: {}", output_path.display());
        Ok(())
    }
}

fn decode_list<T: DeserializeOwned>(data: &Value, key: &str) -> Result<Vec<T>> {
    Ok(serde_json::from_value(nested_results(data, key))?)
}

fn nested_results(data: &Value, key: &str) -> Value {
    let inner = &data[key];
    if inner.is_array() {
        return inner.clone();
    }
    if inner["results"].is_array() {
        return inner["results"].clone();
    }
    Value::Array(Vec::new())
}

#[async_trait]
impl GenerationBackend for StoryboardClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome> {
        info!(
            "Submitting generation ({} reference images, model {})",
            request.character_image_urls.len(),
            request.model
        );
        let response = self
            .authorized(self.client.post(self.url("generation/single")))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        debug!("Generation response (HTTP {}): {}", status, response_text);

        let body: SubmitBody = match serde_json::from_str(&response_text) {
            Ok(body) => body,
            Err(e) => {
                warn!("Unparseable generation response: {}", e);
                SubmitBody::default()
            }
        };
        Ok(classify_submit(status.as_u16(), body))
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot> {
        let response: TaskStatusResponse = self
            .get_json(&format!("generation/status/{}", task_id))
            .await?;
        let mut task = response.task;
        if task.id.is_none() {
            task.id = Some(task_id.to_string());
        }
        Ok(task)
    }

    async fn batch_status(&self, task_ids: &[String]) -> Result<BatchStatus> {
        self.post_json("generation/status/batch", &BatchStatusRequest { task_ids })
            .await
    }

    async fn translate(&self, text: &str) -> Result<String> {
        let data: Value = self.post_json("translate", &json!({ "text": text })).await?;
        data["translatedText"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoryboardError::Api("Missing translatedText".to_string()))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        let data: Value = self.post_json("translate", &json!({ "texts": texts })).await?;
        let translated: Vec<String> = serde_json::from_value(data["translatedTexts"].clone())?;
        if translated.len() != texts.len() {
            return Err(StoryboardError::Api(format!(
                "Translated {} of {} texts",
                translated.len(),
                texts.len()
            )));
        }
        Ok(translated)
    }
}
