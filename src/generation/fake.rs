use crate::api::{
    BatchStatus, GenerationBackend, GenerationRequest, SubmitOutcome, TaskSnapshot, TaskStatus,
};
use crate::error::{Result, StoryboardError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub enum FakeSubmit {
    Outcome(SubmitOutcome),
    TransportError,
    /// 永不返回，用于触发客户端超时
    Hang,
}

impl FakeSubmit {
    pub fn completed(url: &str) -> Self {
        FakeSubmit::Outcome(SubmitOutcome::Completed {
            image_url: url.to_string(),
        })
    }

    pub fn accepted(task_id: &str) -> Self {
        FakeSubmit::Outcome(SubmitOutcome::Accepted {
            task_id: task_id.to_string(),
        })
    }

    pub fn rejected(error: &str) -> Self {
        FakeSubmit::Outcome(SubmitOutcome::Rejected {
            error: error.to_string(),
        })
    }
}

/// 内存中的后端：按提示词子串决定提交结果，按任务 id 依次返回预设状态
#[derive(Default)]
pub struct FakeBackend {
    submits: Mutex<Vec<(String, FakeSubmit)>>,
    statuses: Mutex<HashMap<String, VecDeque<TaskSnapshot>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    batch_requests: Mutex<Vec<Vec<String>>>,
    status_calls: Mutex<usize>,
    batch_broken: Mutex<bool>,
    translation_broken: Mutex<bool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 后注册的规则优先
    pub fn on_submit(&self, needle: &str, result: FakeSubmit) {
        self.submits.lock().insert(0, (needle.to_string(), result));
    }

    pub fn push_status(&self, task_id: &str, status: TaskStatus, image_url: Option<&str>) {
        self.push(TaskSnapshot {
            id: Some(task_id.to_string()),
            status,
            image_url: image_url.map(str::to_string),
            error: None,
        });
    }

    pub fn push_failed(&self, task_id: &str, error: &str) {
        self.push(TaskSnapshot {
            id: Some(task_id.to_string()),
            status: TaskStatus::Failed,
            image_url: None,
            error: Some(error.to_string()),
        });
    }

    fn push(&self, snapshot: TaskSnapshot) {
        let id = snapshot.id.clone().unwrap_or_default();
        self.statuses.lock().entry(id).or_default().push_back(snapshot);
    }

    pub fn fail_batch_status(&self) {
        *self.batch_broken.lock() = true;
    }

    pub fn fail_translation(&self) {
        *self.translation_broken.lock() = true;
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn batch_requests(&self) -> Vec<Vec<String>> {
        self.batch_requests.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock()
    }

    /// 队列只剩最后一个状态时保持不变
    fn next_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        let mut statuses = self.statuses.lock();
        let queue = statuses.get_mut(task_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome> {
        self.requests.lock().push(request.clone());
        let rule = self
            .submits
            .lock()
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, result)| result.clone());
        match rule {
            Some(FakeSubmit::Outcome(outcome)) => Ok(outcome),
            Some(FakeSubmit::TransportError) => {
                Err(StoryboardError::Api("connection refused".to_string()))
            }
            Some(FakeSubmit::Hang) => std::future::pending().await,
            None => Ok(SubmitOutcome::Rejected {
                error: "no fake rule".to_string(),
            }),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot> {
        *self.status_calls.lock() += 1;
        self.next_status(task_id)
            .ok_or_else(|| StoryboardError::Api(format!("unknown task {}", task_id)))
    }

    async fn batch_status(&self, task_ids: &[String]) -> Result<BatchStatus> {
        self.batch_requests.lock().push(task_ids.to_vec());
        if *self.batch_broken.lock() {
            return Err(StoryboardError::Api("batch status HTTP 404".to_string()));
        }
        let tasks: Vec<TaskSnapshot> = task_ids
            .iter()
            .filter_map(|id| self.next_status(id))
            .collect();
        let processing = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Processing))
            .count();
        Ok(BatchStatus {
            completed: tasks.iter().filter(|t| t.status == TaskStatus::Completed).count(),
            failed: tasks.iter().filter(|t| t.status == TaskStatus::Failed).count(),
            processing,
            tasks,
        })
    }

    async fn translate(&self, text: &str) -> Result<String> {
        if *self.translation_broken.lock() {
            return Err(StoryboardError::Api("translator offline".to_string()));
        }
        Ok(format!("EN({})", text))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text).await?);
        }
        Ok(out)
    }
}
