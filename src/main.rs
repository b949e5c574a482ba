//! agentic-rag 命令行入口
//!
//! 读取配置与预切分语料，运行一个查询并以 JSON 输出结果；`--status` 输出系统状态。
//! 会话以 FAILED 结束时进程返回非零退出码。

use std::path::PathBuf;
use std::sync::Arc;

use agentic_rag::{
    config::load_config, observability, retrieval::InMemoryRetriever, RagAgent,
};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "agentic-rag")]
#[command(about = "Answer a question from a document corpus with cited, confidence-scored output", long_about = None)]
#[command(version)]
struct Cli {
    /// Extra configuration file (overrides config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// JSON corpus of pre-chunked passages
    #[arg(long)]
    corpus: Option<PathBuf>,
    /// Locale tag for the answer, e.g. de-DE
    #[arg(long)]
    locale: Option<String>,
    /// Print provider and workflow status instead of answering
    #[arg(long)]
    status: bool,
    /// The question to answer
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;

    let retriever = match &cli.corpus {
        Some(path) => InMemoryRetriever::from_json_file(path)
            .with_context(|| format!("Failed to load corpus {}", path.display()))?,
        None => {
            warn!("no corpus given; answers will have no retrieved context");
            InMemoryRetriever::new()
        }
    };
    info!(passages = retriever.len(), "corpus loaded");

    let agent = RagAgent::from_config(&cfg, Arc::new(retriever))
        .context("Failed to build agent")?;

    if cli.status {
        println!("{}", serde_json::to_string_pretty(&agent.status())?);
        return Ok(());
    }

    let question = cli.question.join(" ");
    let handle = agent
        .start(&question, cli.locale.as_deref())
        .context("Query rejected")?;

    let session_id = handle.id().to_string();
    let join = handle.join();
    tokio::pin!(join);
    let result = tokio::select! {
        result = &mut join => result,
        _ = tokio::signal::ctrl_c() => {
            info!(session_id = %session_id, "Received Ctrl+C, cancelling session");
            agent.cancel(&session_id);
            join.await
        }
    }
    .context("Session task failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}
