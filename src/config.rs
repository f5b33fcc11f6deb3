use crate::error::{Result, StoryboardError};
use crate::generation::{GenerationOptions, PollPolicy, DEFAULT_SUBMIT_TIMEOUT, IMAGE_SIZES, MODELS};
use std::time::Duration;

pub const API_URL_ENV: &str = "STORYBOARD_API_URL";
pub const API_TOKEN_ENV: &str = "STORYBOARD_API_TOKEN";
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// 命令行中与配置相关的原始值，未提供的项从环境变量或默认值补齐
#[derive(Debug, Clone, Default)]
pub struct ConfigInput {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub image_size: Option<String>,
    pub model: Option<String>,
    pub translate: bool,
    pub poll_interval_secs: Option<u64>,
    pub poll_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub options: GenerationOptions,
    pub policy: PollPolicy,
}

impl Config {
    pub fn resolve(input: ConfigInput) -> Result<Self> {
        Self::resolve_with(input, |key| std::env::var(key).ok())
    }

    fn resolve_with<F>(input: ConfigInput, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = input
            .api_url
            .or_else(|| env(API_URL_ENV))
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_token = input
            .api_token
            .or_else(|| env(API_TOKEN_ENV))
            .filter(|token| !token.trim().is_empty());

        let image_size = match input.image_size {
            Some(size) => normalize_image_size(&size)?,
            None => IMAGE_SIZES[0].to_string(),
        };
        let model = input.model.unwrap_or_else(|| MODELS[0].to_string());
        if !MODELS.contains(&model.as_str()) {
            return Err(StoryboardError::Config(format!(
                "unknown model '{}', expected one of: {}",
                model,
                MODELS.join(", ")
            )));
        }

        let mut policy = PollPolicy::default();
        if let Some(secs) = input.poll_interval_secs {
            if secs == 0 {
                return Err(StoryboardError::Config(
                    "poll interval must be at least 1 second".to_string(),
                ));
            }
            policy.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = input.poll_attempts {
            if attempts == 0 {
                return Err(StoryboardError::Config(
                    "poll attempts must be at least 1".to_string(),
                ));
            }
            policy.max_attempts = attempts;
        }

        Ok(Self {
            api_url,
            api_token,
            options: GenerationOptions {
                image_size,
                model,
                translate: input.translate,
                submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            },
            policy,
        })
    }
}

/// 接受 `16:9` 或 `[16:9]`，统一为带方括号的形式
fn normalize_image_size(raw: &str) -> Result<String> {
    let bare = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let bracketed = format!("[{}]", bare);
    if IMAGE_SIZES.contains(&bracketed.as_str()) {
        Ok(bracketed)
    } else {
        Err(StoryboardError::Config(format!(
            "unsupported image size '{}', expected one of: {}",
            raw,
            IMAGE_SIZES.join(" ")
        )))
    }
}
