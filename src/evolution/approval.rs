//! 审批门：DECIDE 之后、ACT 之前对高风险计划征求批准
//!
//! 审批失败（超时、网络错误、输入错误）一律视为拒绝。

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time;

use crate::config::{ApprovalMode, ApprovalSection};
use crate::evolution::types::{RiskLevel, Task};

/// 提交给审批方的计划摘要
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub task_id: String,
    pub description: String,
    pub risk: RiskLevel,
    pub primary_targets: Vec<String>,
    pub steps: Vec<String>,
}

impl ApprovalRequest {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            risk: task.decision.risk,
            primary_targets: task.decision.primary_targets.clone(),
            steps: task
                .decision
                .plan
                .iter()
                .map(|s| format!("{}. {:?} {}", s.order, s.action, s.target))
                .collect(),
        }
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, request: &ApprovalRequest) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        tracing::warn!(task_id = %request.task_id, risk = %request.risk, "auto-approving plan");
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        false
    }
}

/// 闭包审批，供调用方按次传入
pub struct FnApproval<F>(pub F);

#[async_trait]
impl<F> ApprovalGate for FnApproval<F>
where
    F: Fn(&ApprovalRequest) -> bool + Send + Sync,
{
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        (self.0)(request)
    }
}

/// 终端交互审批，超时自动拒绝
pub struct ConsoleApproval {
    timeout: Duration,
}

impl ConsoleApproval {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes" | "是")
}

#[async_trait]
impl ApprovalGate for ConsoleApproval {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        println!("\n修复计划需要审批 ({}秒超时):", self.timeout.as_secs());
        println!("问题: {}", request.description);
        println!("风险: {}", request.risk);
        println!("目标文件: {:?}", request.primary_targets);
        for step in &request.steps {
            println!("  {step}");
        }
        print!("是否批准执行？(y/n): ");
        if io::stdout().flush().is_err() {
            return false;
        }

        // 阻塞读放到后台线程，才能套上超时
        let result = time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(|| {
                let mut input = String::new();
                io::stdin().read_line(&mut input).ok().map(|_| input)
            }),
        )
        .await;

        match result {
            Ok(Ok(Some(input))) => is_yes(&input),
            Ok(_) => {
                tracing::warn!(task_id = %request.task_id, "approval input failed, denying");
                false
            }
            Err(_) => {
                tracing::warn!(task_id = %request.task_id, "approval timed out, denying");
                false
            }
        }
    }
}

/// POST 计划摘要到 webhook，读取响应中的 `approved` 字段
pub struct WebhookApproval {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookApproval {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ApprovalGate for WebhookApproval {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        let payload = serde_json::json!({
            "plan": request,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        tracing::info!(task_id = %request.task_id, url = %self.url, "sending approval request");

        let result = time::timeout(self.timeout, self.client.post(&self.url).json(&payload).send()).await;
        let response = match result {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                tracing::warn!(status = %response.status(), "approval webhook returned error status");
                return false;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "approval webhook request failed");
                return false;
            }
            Err(_) => {
                tracing::warn!("approval webhook timed out");
                return false;
            }
        };
        match response.json::<serde_json::Value>().await {
            Ok(json) => json.get("approved").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "approval webhook returned invalid JSON");
                false
            }
        }
    }
}

/// 按 [engine.approval] 构造默认审批门；webhook 未配置 url 时拒绝一切
pub fn gate_from_config(section: &ApprovalSection) -> Arc<dyn ApprovalGate> {
    let timeout = Duration::from_secs(section.timeout_secs);
    match section.mode {
        ApprovalMode::None => Arc::new(AutoApprove),
        ApprovalMode::Deny => Arc::new(DenyAll),
        ApprovalMode::Console => Arc::new(ConsoleApproval::new(timeout)),
        ApprovalMode::Webhook => match &section.webhook_url {
            Some(url) => Arc::new(WebhookApproval::new(url.clone(), timeout)),
            None => {
                tracing::warn!("approval webhook url not configured, denying all plans");
                Arc::new(DenyAll)
            }
        },
    }
}
