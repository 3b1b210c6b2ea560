//! mend 命令行入口
//!
//! 用法：
//!   mend <project_dir> <issue...> [--category c] [--file path]... [--replace path old new]...
//!        [--dry-run] [--config file] [--json-logs]
//!
//! 对项目目录做一次快照，跑一轮修复循环，把结束后的任务以 JSON 打印到 stdout。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use mend::{
    core::create_engine_builder,
    evolution::{ImprovementRequest, IssueCategory, StaticProposer, TaskTrigger},
    observability,
};

#[derive(Debug, Default)]
struct CliArgs {
    project_dir: Option<PathBuf>,
    issue: Vec<String>,
    category: Option<IssueCategory>,
    files: Vec<String>,
    replacements: Vec<(String, String, String)>,
    dry_run: bool,
    config: Option<PathBuf>,
    json_logs: bool,
}

fn usage() -> &'static str {
    "usage: mend <project_dir> <issue...> [--category c] [--file path]... \
     [--replace path old new]... [--dry-run] [--config file] [--json-logs]"
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--category" => {
                let value = it.next().context("--category needs a value")?;
                out.category = Some(value.parse()?);
            }
            "--file" => out.files.push(it.next().context("--file needs a path")?),
            "--replace" => {
                let path = it.next().context("--replace needs <path> <old> <new>")?;
                let old = it.next().context("--replace needs <path> <old> <new>")?;
                let new = it.next().context("--replace needs <path> <old> <new>")?;
                out.replacements.push((path, old, new));
            }
            "--config" => out.config = Some(PathBuf::from(it.next().context("--config needs a path")?)),
            "--dry-run" => out.dry_run = true,
            "--json-logs" => out.json_logs = true,
            "-h" | "--help" => bail!(usage()),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{}", usage()),
            _ if out.project_dir.is_none() => out.project_dir = Some(PathBuf::from(arg)),
            _ => out.issue.push(arg),
        }
    }
    if out.project_dir.is_none() || out.issue.is_empty() {
        bail!(usage());
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.json_logs {
        observability::init_json();
    } else {
        observability::init();
    }

    let project_dir = args
        .project_dir
        .clone()
        .context("project directory is required")?;
    if !project_dir.is_dir() {
        bail!("not a directory: {}", project_dir.display());
    }

    let mut proposer = StaticProposer::new();
    for (path, old, new) in &args.replacements {
        proposer = proposer.with_replace(path, old, new);
    }

    let components = create_engine_builder(args.config.clone(), Some(project_dir))
        .with_dry_run(args.dry_run)
        .with_proposer(Arc::new(proposer))
        .build();

    let mut request = ImprovementRequest::new(TaskTrigger::UserReport, args.issue.join(" "))
        .with_affected_files(args.files.iter());
    if let Some(category) = args.category {
        request = request.with_category(category);
    }

    let task = components
        .controller
        .start_from_supplier(request, components.supplier.as_ref())
        .await
        .context("Improvement cycle failed to start")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&task).context("Failed to serialize task")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&[
            "./app",
            "button",
            "misaligned",
            "--category",
            "ui",
            "--replace",
            "src/Button.tsx",
            "left",
            "center",
            "--dry-run",
        ]))
        .unwrap();
        assert_eq!(parsed.project_dir, Some(PathBuf::from("./app")));
        assert_eq!(parsed.issue, vec!["button", "misaligned"]);
        assert_eq!(parsed.category, Some(IssueCategory::UiBug));
        assert_eq!(parsed.replacements.len(), 1);
        assert!(parsed.dry_run);
    }

    #[test]
    fn test_parse_args_requires_issue() {
        assert!(parse_args(args(&["./app"])).is_err());
        assert!(parse_args(args(&["./app", "x", "--bogus"])).is_err());
        assert!(parse_args(args(&["./app", "x", "--category", "nonsense"])).is_err());
    }
}
