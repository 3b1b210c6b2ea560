//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.execute，
//! 超时或失败时转为 EngineError（ToolTimeout / ToolFailed）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{EngineError, Result};
use crate::tools::{Tool, ToolRegistry};

const PREVIEW_CHARS: usize = 200;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 未注册的工具返回 UnknownTool，不计入审计
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String> {
        if !self.registry.contains(tool_name) {
            return Err(EngineError::UnknownTool(tool_name.to_string()));
        }
        let start = Instant::now();
        let args_preview = preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(EngineError::ToolFailed(e)),
            Err(_) => Err(EngineError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > PREVIEW_CHARS {
        format!("{}...", s.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
