use super::Orchestrator;
use crate::api::{GenerationBackend, TaskSnapshot, TaskStatus};
use tracing::{info, warn};

/// 单个任务的轮询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(String),
    Failed(String),
    TimedOut,
}

/// 终态判断：完成且有图片，或失败。其余情况继续轮询。
pub(super) fn resolve_snapshot(task: &TaskSnapshot) -> Option<PollOutcome> {
    match task.status {
        TaskStatus::Completed => task
            .image_url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| PollOutcome::Completed(url.clone())),
        TaskStatus::Failed => Some(PollOutcome::Failed(
            task.error
                .clone()
                .unwrap_or_else(|| "Generation failed".to_string()),
        )),
        _ => None,
    }
}

impl<B: GenerationBackend> Orchestrator<B> {
    /// 按固定间隔查询任务状态，直到完成、失败或达到次数上限
    pub async fn poll_task(&self, task_id: &str) -> PollOutcome {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            let task = match self.backend.task_status(task_id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!("Failed to get status of task {}: {}", task_id, e);
                    continue;
                }
            };

            if let Some(outcome) = resolve_snapshot(&task) {
                info!("Task {} resolved after {} checks", task_id, attempt);
                return outcome;
            }
            info!(
                "Task {} still {:?}, checking {} time ({}/{})",
                task_id,
                task.status,
                ordinal(attempt),
                attempt,
                max_attempts
            );
        }

        warn!("Task {} timed out after {} checks", task_id, max_attempts);
        PollOutcome::TimedOut
    }
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: TaskStatus, image_url: Option<&str>, error: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            id: Some("t".to_string()),
            status,
            image_url: image_url.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_snapshot() {
        assert_eq!(
            resolve_snapshot(&snapshot(TaskStatus::Completed, Some("https://x"), None)),
            Some(PollOutcome::Completed("https://x".to_string()))
        );
        // 完成但没有图片时继续轮询
        assert_eq!(resolve_snapshot(&snapshot(TaskStatus::Completed, None, None)), None);
        assert_eq!(
            resolve_snapshot(&snapshot(TaskStatus::Failed, None, None)),
            Some(PollOutcome::Failed("Generation failed".to_string()))
        );
        assert_eq!(resolve_snapshot(&snapshot(TaskStatus::Pending, None, None)), None);
        assert_eq!(resolve_snapshot(&snapshot(TaskStatus::Unknown, None, None)), None);
    }

    #[test]
    fn test_ordinal() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(22), "22nd");
        assert_eq!(ordinal(100), "100th");
    }
}
