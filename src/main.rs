mod api;
mod config;
mod error;
mod generation;
mod script;
mod workspace;

use anyhow::{bail, Context};
use api::StoryboardClient;
use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigInput};
use error::StoryboardError;
use generation::{BatchOutcome, Orchestrator};
use script::encoding::decode_script_bytes;
use script::{validate_script, Character};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use workspace::Workspace;

#[derive(Parser, Debug)]
#[command(name = "storyboard")]
#[command(about = "Storyboard image generation from CSV scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List scripts and characters in the backend library
    Scripts,
    /// Parse a script and print its frames and character mapping
    Frames,
    /// Generate the image for one frame
    Generate {
        /// Frame number to generate
        #[arg(long)]
        frame: i64,
    },
    /// Generate images for every frame that has none yet
    GenerateAll,
    /// Download every generated image recorded in the state file
    Download {
        /// Output directory
        #[arg(short, long, default_value = "./frames")]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Local CSV script file (an unchanged script resumes from --state)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Script id in the backend library
    #[arg(long, global = true)]
    script_id: Option<i64>,

    /// Character library as a JSON array (fetched from the backend when omitted)
    #[arg(long, global = true)]
    characters: Option<PathBuf>,

    /// Character mapping override, e.g. 角色A=3 (repeatable, 0 unsets)
    #[arg(long = "map", value_parser = parse_mapping, global = true)]
    mappings: Vec<(String, i64)>,

    /// Drop the current character mapping before applying --map
    #[arg(long, global = true)]
    clear_mapping: bool,

    /// Workspace state file
    #[arg(short, long, default_value = "storyboard.json", global = true)]
    state: PathBuf,

    /// Image size, e.g. 16:9
    #[arg(long, global = true)]
    image_size: Option<String>,

    /// Generation model
    #[arg(long, global = true)]
    model: Option<String>,

    /// Translate prompts before submitting
    #[arg(long, global = true)]
    translate: bool,

    #[arg(long, global = true)]
    poll_interval_secs: Option<u64>,

    #[arg(long, global = true)]
    poll_attempts: Option<u32>,

    /// Backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token
    #[arg(long, global = true)]
    api_token: Option<String>,
}

fn parse_mapping(raw: &str) -> Result<(String, i64), String> {
    let (token, id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TOKEN=ID, got '{}'", raw))?;
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid character id '{}': {}", id, e))?;
    Ok((token.trim().to_string(), id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 加载环境变量
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let common = &cli.common;
    let config = Config::resolve(ConfigInput {
        api_url: common.api_url.clone(),
        api_token: common.api_token.clone(),
        image_size: common.image_size.clone(),
        model: common.model.clone(),
        translate: common.translate,
        poll_interval_secs: common.poll_interval_secs,
        poll_attempts: common.poll_attempts,
    })?;

    let client = Arc::new(StoryboardClient::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.options.submit_timeout,
    )?);

    match &cli.command {
        Command::Download { dir } => return download_all(&client, &common.state, dir).await,
        Command::Scripts => return list_library(&client).await,
        _ => {}
    }

    let characters = load_characters(&client, common).await?;
    let ws = open_workspace(&client, common, characters).await?;
    if common.clear_mapping {
        ws.clear_mapping();
    }
    for (token, id) in &common.mappings {
        ws.set_mapping(token, *id);
    }

    let orchestrator = Orchestrator::new(client, config.options.clone(), config.policy);
    info!(
        "Model {}, size {}, polling every {}s up to {} checks",
        config.options.model,
        config.options.image_size,
        orchestrator.policy().interval.as_secs(),
        orchestrator.policy().max_attempts
    );
    let result = tokio::select! {
        result = run_command(&cli.command, &orchestrator, &ws) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, saving workspace");
            Ok(())
        }
    };

    ws.save(&common.state)
        .await
        .context("Failed to save workspace state")?;

    if let Err(e) = result {
        error!("Storyboard command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(
    command: &Command,
    orchestrator: &Orchestrator<StoryboardClient>,
    ws: &Workspace,
) -> anyhow::Result<()> {
    match command {
        Command::Frames => {
            print_frames(ws);
            Ok(())
        }
        Command::Generate { frame } => {
            let status = orchestrator.generate_one(ws, *frame).await?;
            let frame = ws
                .frame(*frame)
                .context("Frame disappeared from workspace")?;
            match frame.current_image() {
                Some(url) => info!("Frame {} {:?}: {}", frame.frame_number, status, url),
                None => warn!(
                    "Frame {} {:?}: {}",
                    frame.frame_number,
                    status,
                    frame.error.as_deref().unwrap_or("no image")
                ),
            }
            Ok(())
        }
        Command::GenerateAll => {
            let summary = orchestrator.generate_all(ws).await;
            if summary.outcome() == BatchOutcome::AllFailed {
                bail!("all {} frames failed", summary.total);
            }
            Ok(())
        }
        Command::Download { .. } | Command::Scripts => Ok(()),
    }
}

fn print_frames(ws: &Workspace) {
    for token in ws.placeholders() {
        let id = ws.mapping().get(&token).copied().unwrap_or(0);
        println!("{} -> {} (id {})", token, ws.character_name(&token), id);
    }
    for frame in ws.frames() {
        let display = ws
            .display_prompt(frame.frame_number)
            .unwrap_or_else(|| frame.prompt.clone());
        println!(
            "[{}] scene {} {:?} ({} images)\n{}\n",
            frame.frame_number,
            frame.scene_number,
            frame.status,
            frame.generated_images.len(),
            display
        );
    }
}

async fn load_characters(client: &StoryboardClient, common: &CommonArgs) -> anyhow::Result<Vec<Character>> {
    if let Some(path) = &common.characters {
        let json = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read characters file: {}", path.display()))?;
        let characters: Vec<Character> =
            serde_json::from_str(&json).context("Invalid characters JSON")?;
        info!("Loaded {} characters from {}", characters.len(), path.display());
        return Ok(characters);
    }

    match client.list_characters().await {
        Ok(characters) => Ok(characters),
        Err(e) => {
            warn!("Could not fetch characters, continuing without: {}", e);
            Ok(Vec::new())
        }
    }
}

/// 指定了脚本时重新解析（映射随之重置），状态文件对应同一脚本时直接续用；否则从状态文件恢复
async fn open_workspace(
    client: &StoryboardClient,
    common: &CommonArgs,
    characters: Vec<Character>,
) -> anyhow::Result<Workspace> {
    let script = if let Some(path) = &common.file {
        let bytes = tokio::fs::read(path)
            .await
            .context(format!("Failed to read script: {}", path.display()))?;
        Some((None, decode_script_bytes(&bytes)))
    } else if let Some(id) = common.script_id {
        let script = client
            .get_script(id)
            .await
            .context(format!("Failed to fetch script {}", id))?;
        info!("Using script '{}'", script.name);
        Some((Some(script.id), script.csv_content))
    } else {
        None
    };

    match script {
        Some((script_id, content)) => {
            if !validate_script(&content) {
                warn!("Script does not look like a storyboard CSV (sequence,prompt)");
            }
            if tokio::fs::metadata(&common.state).await.is_ok() {
                let saved = Workspace::load(&common.state, characters.clone()).await?;
                if saved.is_same_script(script_id, &content) {
                    info!("State file matches the script, resuming");
                    return Ok(saved);
                }
            }
            let ws = Workspace::new(characters);
            let count = ws.load_script(script_id, &content);
            if count == 0 {
                return Err(StoryboardError::Script("no frames found in script".to_string()).into());
            }
            info!("Loaded {} frames", count);
            Ok(ws)
        }
        None if tokio::fs::metadata(&common.state).await.is_ok() => {
            Ok(Workspace::load(&common.state, characters).await?)
        }
        None => bail!("Either --file, --script-id or an existing --state file is required"),
    }
}

async fn list_library(client: &StoryboardClient) -> anyhow::Result<()> {
    let scripts = client.list_scripts().await.context("Failed to fetch scripts")?;
    for script in &scripts {
        println!(
            "script {}: {} [{}]",
            script.id,
            script.name,
            script.category.as_deref().unwrap_or("未分类")
        );
    }
    let characters = client
        .list_characters()
        .await
        .context("Failed to fetch characters")?;
    for character in &characters {
        println!(
            "character {}: {} [{}]",
            character.id,
            character.name,
            character.category.as_deref().unwrap_or("未分类")
        );
    }
    Ok(())
}

/// 下载所有历史图片，已存在的文件跳过
async fn download_all(client: &StoryboardClient, state: &Path, dir: &Path) -> anyhow::Result<()> {
    let ws = Workspace::load(state, Vec::new())
        .await
        .context(format!("Failed to load state: {}", state.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .context("Failed to create download directory")?;

    let mut downloaded = 0;
    for frame in ws.frames() {
        for (idx, url) in frame.generated_images.iter().enumerate() {
            let path = dir.join(format!("frame_{}_{}.png", frame.frame_number, idx + 1));
            if tokio::fs::metadata(&path).await.is_ok() {
                info!("{} already exists, skipping...", path.display());
                continue;
            }
            match client.download(url, &path).await {
                Ok(()) => downloaded += 1,
                Err(e) => warn!("Failed to download frame {} image {}: {}", frame.frame_number, idx + 1, e),
            }
        }
    }
    info!("Downloaded {} images to {}", downloaded, dir.display());
    Ok(())
}
