//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RAG__*` 覆盖（双下划线表示嵌套，如 `RAG__WORKFLOW__TOP_K=8`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub workflow: WorkflowSection,
    pub evaluation: EvaluationSection,
    pub chain: ChainSection,
    /// 提供商列表；为空时使用内置默认链（Gemini -> OpenAI -> Ollama）
    pub providers: Vec<ProviderSection>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 同时运行的会话上限
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_concurrent_sessions: default_max_concurrent_sessions(),
        }
    }
}

fn default_max_concurrent_sessions() -> usize {
    8
}

/// 会话截止时间到达后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// 直接 FAILED
    #[default]
    Fail,
    /// 若已有候选答案则以 DONE 返回当前最佳
    BestSoFar,
}

/// [workflow] 段：阈值、迭代上限、检索数量、上下文预算
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 进入 prompt 的检索文本总字符预算
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    /// 会话级截止时间（毫秒），未设置则不限
    pub session_deadline_ms: Option<u64>,
    #[serde(default)]
    pub on_deadline: DeadlinePolicy,
    /// 覆盖内置生成系统提示词
    pub system_prompt: Option<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_iterations: default_max_iterations(),
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            max_query_chars: default_max_query_chars(),
            session_deadline_ms: None,
            on_deadline: DeadlinePolicy::default(),
            system_prompt: None,
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_iterations() -> u32 {
    3
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    6000
}

fn default_max_query_chars() -> usize {
    4000
}

/// [evaluation] 段：启发式权重与答案长度边界
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationSection {
    /// 启发式分数在最终置信度中的权重，其余来自自我评审
    #[serde(default = "default_heuristic_weight")]
    pub heuristic_weight: f64,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
    /// 判定答案引用了某段检索文本所需的最少共同词数
    #[serde(default = "default_min_overlap_terms")]
    pub min_overlap_terms: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            heuristic_weight: default_heuristic_weight(),
            min_answer_chars: default_min_answer_chars(),
            max_answer_chars: default_max_answer_chars(),
            min_overlap_terms: default_min_overlap_terms(),
        }
    }
}

fn default_heuristic_weight() -> f64 {
    0.3
}

fn default_min_answer_chars() -> usize {
    20
}

fn default_max_answer_chars() -> usize {
    6000
}

fn default_min_overlap_terms() -> usize {
    2
}

/// [chain] 段：重试退避
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            exponential_backoff: default_exponential_backoff(),
        }
    }
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_exponential_backoff() -> bool {
    true
}

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    DeepSeek,
    Ollama,
    Mock,
}

/// [[providers]] 条目
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub priority: u32,
    pub id: String,
    pub kind: ProviderKind,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub credentials_optional: bool,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_provider_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub always_available: bool,
}

fn default_provider_timeout_ms() -> u64 {
    60_000
}

fn default_provider_max_retries() -> u32 {
    1
}

impl ProviderSection {
    fn preset(priority: u32, id: &str, kind: ProviderKind) -> Self {
        Self {
            priority,
            id: id.to_string(),
            kind,
            endpoint: None,
            model: None,
            api_key_env: None,
            credentials_optional: false,
            timeout_ms: default_provider_timeout_ms(),
            max_retries: default_provider_max_retries(),
            always_available: false,
        }
    }

    /// API Key（从 api_key_env 指定的环境变量读取）
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials_optional || self.always_available || self.api_key().is_some()
    }
}

/// 内置默认链：Gemini(1) -> OpenAI(2) -> 本地 Ollama(3, always-available)
pub fn default_providers() -> Vec<ProviderSection> {
    let mut gemini = ProviderSection::preset(1, "gemini", ProviderKind::Gemini);
    gemini.model = Some("gemini-1.5-flash".to_string());
    gemini.api_key_env = Some("GOOGLE_API_KEY".to_string());

    let mut openai = ProviderSection::preset(2, "openai", ProviderKind::OpenAi);
    openai.model = Some("gpt-4o-mini".to_string());
    openai.api_key_env = Some("OPENAI_API_KEY".to_string());

    let mut ollama = ProviderSection::preset(3, "ollama", ProviderKind::Ollama);
    ollama.model = Some("llama3.2".to_string());
    ollama.endpoint = Some("http://localhost:11434".to_string());
    ollama.credentials_optional = true;
    ollama.always_available = true;
    ollama.timeout_ms = 120_000;

    vec![gemini, openai, ollama]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            workflow: WorkflowSection::default(),
            evaluation: EvaluationSection::default(),
            chain: ChainSection::default(),
            providers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 实际生效的提供商列表
    pub fn effective_providers(&self) -> Vec<ProviderSection> {
        if self.providers.is_empty() {
            default_providers()
        } else {
            self.providers.clone()
        }
    }

    /// 数值范围校验；提供商顺序由 ProviderChain::new 校验
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: String| Err(config::ConfigError::Message(msg));
        let w = &self.workflow;
        if !(0.0..=1.0).contains(&w.confidence_threshold) {
            return invalid(format!(
                "workflow.confidence_threshold must be within [0, 1], got {}",
                w.confidence_threshold
            ));
        }
        if w.max_iterations == 0 {
            return invalid("workflow.max_iterations must be at least 1".to_string());
        }
        if w.top_k == 0 {
            return invalid("workflow.top_k must be at least 1".to_string());
        }
        if w.max_query_chars == 0 {
            return invalid("workflow.max_query_chars must be at least 1".to_string());
        }
        let e = &self.evaluation;
        if !(0.0..=1.0).contains(&e.heuristic_weight) {
            return invalid(format!(
                "evaluation.heuristic_weight must be within [0, 1], got {}",
                e.heuristic_weight
            ));
        }
        if e.min_answer_chars > e.max_answer_chars {
            return invalid("evaluation.min_answer_chars exceeds max_answer_chars".to_string());
        }
        if self.app.max_concurrent_sessions == 0 {
            return invalid("app.max_concurrent_sessions must be at least 1".to_string());
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 RAG__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RAG__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RAG")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.workflow.max_iterations, 3);
        assert!((cfg.workflow.confidence_threshold - 0.7).abs() < f64::EPSILON);
        let providers = cfg.effective_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers[2].always_available);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut cfg = AppConfig::default();
        cfg.workflow.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.workflow.confidence_threshold = 0.5;
        cfg.workflow.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[workflow]
confidence_threshold = 0.8
max_iterations = 2
on_deadline = "best_so_far"

[[providers]]
priority = 1
id = "local"
kind = "mock"
always_available = true
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.workflow.max_iterations, 2);
        assert_eq!(cfg.workflow.on_deadline, DeadlinePolicy::BestSoFar);
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].kind, ProviderKind::Mock);
        assert_eq!(cfg.providers[0].max_retries, 1);
    }
}
