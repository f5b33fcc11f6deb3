use serde::{Deserialize, Deserializer, Serialize};

/// 单张图片生成请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image_size: String,
    pub model: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub character_image_urls: Vec<String>,
}

/// `/generation/single` 的三种结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 同步后端直接返回图片
    Completed { image_url: String },
    /// 异步任务已受理，需要轮询
    Accepted { task_id: String },
    Rejected { error: String },
}

/// 服务端任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// 服务端任务在客户端的投影
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSnapshot {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskStatusResponse {
    pub task: TaskSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchStatusRequest<'a> {
    #[serde(rename = "taskIds")]
    pub task_ids: &'a [String],
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchStatus {
    #[serde(default)]
    pub tasks: Vec<TaskSnapshot>,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub processing: usize,
}

/// 原始响应体，字段是否存在因后端模式而异
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

pub(crate) const GENERIC_SUBMIT_ERROR: &str = "Generation failed";

/// 根据 HTTP 状态码和响应体判断提交结果
pub(crate) fn classify_submit(status: u16, body: SubmitBody) -> SubmitOutcome {
    let processing = body
        .status
        .as_deref()
        .map(|s| s.eq_ignore_ascii_case("processing") || s.eq_ignore_ascii_case("pending"))
        .unwrap_or(false);
    let image_url = body.image_url.filter(|u| !u.trim().is_empty());

    match status {
        202 => match body.task_id {
            Some(task_id) => SubmitOutcome::Accepted { task_id },
            None => SubmitOutcome::Rejected {
                error: "Task accepted without a task id".to_string(),
            },
        },
        200..=299 if body.error.is_none() => match (image_url, body.task_id) {
            (Some(image_url), _) if !processing => SubmitOutcome::Completed { image_url },
            (_, Some(task_id)) if processing => SubmitOutcome::Accepted { task_id },
            _ => SubmitOutcome::Rejected {
                error: GENERIC_SUBMIT_ERROR.to_string(),
            },
        },
        _ => {
            let error = match (body.error, body.details) {
                (Some(error), Some(details)) => format!("{}: {}", error, details),
                (Some(error), None) => error,
                _ => GENERIC_SUBMIT_ERROR.to_string(),
            };
            SubmitOutcome::Rejected { error }
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
