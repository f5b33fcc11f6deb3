use super::poller::resolve_snapshot;
use super::{Orchestrator, PollOutcome};
use crate::api::{GenerationBackend, SubmitOutcome};
use crate::script::FrameStatus;
use crate::workspace::Workspace;
use futures::future::join_all;
use tracing::{error, info, warn};

/// 批量生成的整体结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Nothing,
    AllSucceeded,
    Partial,
    AllFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn outcome(&self) -> BatchOutcome {
        if self.total == 0 {
            BatchOutcome::Nothing
        } else if self.failed == 0 {
            BatchOutcome::AllSucceeded
        } else if self.completed == 0 {
            BatchOutcome::AllFailed
        } else {
            BatchOutcome::Partial
        }
    }

    fn log_progress(&self, pending: usize) {
        info!(
            "Batch progress: {}/{} completed, {} failed, {} pending",
            self.completed, self.total, self.failed, pending
        );
    }
}

/// 一个已受理、等待轮询的分镜任务
struct PendingTask {
    frame_number: i64,
    task_id: String,
}

enum Submitted {
    Done(FrameStatus),
    Pending(PendingTask),
}

impl<B: GenerationBackend> Orchestrator<B> {
    /// 为所有还没有图片的分镜生成图片。
    ///
    /// 所有请求并发提交；提交失败的分镜立即标记失败，不影响其他分镜的轮询。
    pub async fn generate_all(&self, ws: &Workspace) -> BatchSummary {
        let targets: Vec<_> = ws
            .frames()
            .into_iter()
            .filter(|f| !f.has_image() && f.status != FrameStatus::Generating)
            .collect();
        let mut summary = BatchSummary {
            total: targets.len(),
            ..BatchSummary::default()
        };
        if targets.is_empty() {
            info!("No frames without images, nothing to generate");
            return summary;
        }
        info!("Starting batch generation for {} frames", targets.len());

        let mapping = ws.mapping();
        let mut prompts: Vec<String> = targets
            .iter()
            .map(|f| crate::script::substitute(&f.original_prompt, &mapping, ws.characters()))
            .collect();
        if self.options.translate {
            let translated = self.backend.translate_batch(&prompts).await;
            prompts = match translated {
                Ok(translated) => translated,
                Err(e) => {
                    warn!("Batch translation failed, using original prompts: {}", e);
                    prompts
                }
            };
        }

        let submissions = targets.iter().zip(prompts).map(|(frame, prompt)| async move {
            let frame_number = frame.frame_number;
            if let Err(e) = ws.begin_generation(frame_number) {
                warn!("Skipping frame {}: {}", frame_number, e);
                return None;
            }
            let request = self.request_for(ws, frame, &prompt);
            let submitted = match self.submit(&request).await {
                Ok(SubmitOutcome::Completed { image_url }) => {
                    ws.complete(frame_number, image_url);
                    Submitted::Done(FrameStatus::Completed)
                }
                Ok(SubmitOutcome::Accepted { task_id }) => {
                    info!("Frame {} accepted as task {}", frame_number, task_id);
                    Submitted::Pending(PendingTask {
                        frame_number,
                        task_id,
                    })
                }
                Ok(SubmitOutcome::Rejected { error }) => {
                    warn!("Frame {} rejected: {}", frame_number, error);
                    ws.fail(frame_number, error);
                    Submitted::Done(FrameStatus::Failed)
                }
                Err(e) => {
                    let message = self.submit_error_message(&e);
                    warn!("Frame {}: {}", frame_number, message);
                    ws.fail(frame_number, message);
                    Submitted::Done(FrameStatus::Failed)
                }
            };
            Some(submitted)
        });

        let mut pending = Vec::new();
        for submitted in join_all(submissions).await {
            match submitted {
                Some(Submitted::Done(FrameStatus::Completed)) => summary.completed += 1,
                Some(Submitted::Done(_)) => summary.failed += 1,
                Some(Submitted::Pending(task)) => pending.push(task),
                None => summary.total -= 1,
            }
        }
        summary.log_progress(pending.len());

        if !pending.is_empty() {
            self.poll_batch(ws, pending, &mut summary).await;
        }

        match summary.outcome() {
            BatchOutcome::Nothing => info!("Batch generation finished with nothing submitted"),
            BatchOutcome::AllSucceeded => {
                info!("Batch generation finished: all {} frames succeeded", summary.total)
            }
            BatchOutcome::Partial => warn!(
                "Batch generation finished: {} succeeded, {} failed",
                summary.completed, summary.failed
            ),
            BatchOutcome::AllFailed => {
                error!("Batch generation finished: all {} frames failed", summary.total)
            }
        }
        summary
    }

    fn apply_outcome(&self, ws: &Workspace, frame_number: i64, outcome: PollOutcome, summary: &mut BatchSummary) {
        match outcome {
            PollOutcome::Completed(image_url) => {
                ws.complete(frame_number, image_url);
                summary.completed += 1;
            }
            PollOutcome::Failed(error) => {
                ws.fail(frame_number, error);
                summary.failed += 1;
            }
            PollOutcome::TimedOut => {
                ws.fail(frame_number, self.policy.timeout_message());
                summary.failed += 1;
            }
        }
    }

    /// 批量查询所有未完成任务；批量接口不可用时退化为逐个轮询
    async fn poll_batch(&self, ws: &Workspace, mut pending: Vec<PendingTask>, summary: &mut BatchSummary) {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0;

        while !pending.is_empty() && attempt < max_attempts {
            tokio::time::sleep(self.policy.interval).await;
            attempt += 1;

            let task_ids: Vec<String> = pending.iter().map(|t| t.task_id.clone()).collect();
            let batch = match self.backend.batch_status(&task_ids).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        "Batch status unavailable ({}), polling {} tasks individually",
                        e,
                        pending.len()
                    );
                    self.poll_individually(ws, pending, summary).await;
                    return;
                }
            };

            for task in &batch.tasks {
                let Some(id) = task.id.as_deref() else {
                    continue;
                };
                let Some(outcome) = resolve_snapshot(task) else {
                    continue;
                };
                if let Some(pos) = pending.iter().position(|t| t.task_id == id) {
                    let resolved = pending.remove(pos);
                    self.apply_outcome(ws, resolved.frame_number, outcome, summary);
                }
            }
            info!(
                "Batch status check {}/{}, server reports {} completed, {} failed, {} processing",
                attempt, max_attempts, batch.completed, batch.failed, batch.processing
            );
            summary.log_progress(pending.len());
        }

        for task in pending {
            warn!("Frame {} timed out waiting for task {}", task.frame_number, task.task_id);
            self.apply_outcome(ws, task.frame_number, PollOutcome::TimedOut, summary);
        }
    }

    async fn poll_individually(&self, ws: &Workspace, pending: Vec<PendingTask>, summary: &mut BatchSummary) {
        let polls = pending.into_iter().map(|task| async move {
            let outcome = self.poll_task(&task.task_id).await;
            (task.frame_number, outcome)
        });
        for (frame_number, outcome) in join_all(polls).await {
            self.apply_outcome(ws, frame_number, outcome, summary);
        }
        summary.log_progress(0);
    }
}
