//! Result rendering. Table output is a terse human summary; `json`/`yaml`
//! hand the value straight to [`forge_core::io::Output`] so scripted
//! consumers see exactly the store's own schema.

use crate::cli::OutputFormat;
use anyhow::Result;
use forge_core::io::{Output, OutputFormat as CoreFormat};
use forge_core::planner::BuildSummary;
use forge_core::store::{TestEnvironment, TestReport};
use forge_core::teststage::TestAllSummary;

pub fn build_summary(out: &mut Output, format: OutputFormat, summary: &BuildSummary) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(&summary_as_value(summary)),
        CoreFormat::Yaml => out.write_yaml(&summary_as_value(summary)),
        CoreFormat::Text => {
            out.write_line(&format!("built {} artifact(s)", summary.upserted))?;
            for partition in &summary.partitions {
                match &partition.error {
                    Some(e) => out.write_line(&format!("  {} FAILED: {e}", partition.engine))?,
                    None => out.write_line(&format!(
                        "  {} ok ({} artifact(s))",
                        partition.engine, partition.artifacts
                    ))?,
                }
            }
            Ok(())
        }
    }
}

fn summary_as_value(summary: &BuildSummary) -> serde_json::Value {
    serde_json::json!({
        "upserted": summary.upserted,
        "partitions": summary.partitions.iter().map(|p| serde_json::json!({
            "engine": p.engine,
            "artifacts": p.artifacts,
            "error": p.error,
        })).collect::<Vec<_>>(),
    })
}

pub fn environment(out: &mut Output, format: OutputFormat, env: &TestEnvironment) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(env),
        CoreFormat::Yaml => out.write_yaml(env),
        CoreFormat::Text => out.write_line(&format!(
            "{}\t{}\t{:?}\t{}",
            env.id, env.stage, env.status, env.tmp_dir
        )),
    }
}

pub fn environments(out: &mut Output, format: OutputFormat, items: &[&TestEnvironment]) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(&items),
        CoreFormat::Yaml => out.write_yaml(&items),
        CoreFormat::Text => {
            for env in items {
                out.write_line(&format!(
                    "{}\t{}\t{:?}\t{}",
                    env.id, env.stage, env.status, env.tmp_dir
                ))?;
            }
            Ok(())
        }
    }
}

pub fn report(out: &mut Output, format: OutputFormat, report: &TestReport) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(report),
        CoreFormat::Yaml => out.write_yaml(report),
        CoreFormat::Text => out.write_line(&format!(
            "{}\t{}\t{:?}\t{:.2}s\t{}/{} passed",
            report.id,
            report.stage,
            report.status,
            report.duration,
            report.test_stats.passed,
            report.test_stats.total
        )),
    }
}

pub fn reports(out: &mut Output, format: OutputFormat, items: &[&TestReport]) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(&items),
        CoreFormat::Yaml => out.write_yaml(&items),
        CoreFormat::Text => {
            for r in items {
                out.write_line(&format!(
                    "{}\t{}\t{:?}\t{:.2}s\t{}/{} passed",
                    r.id, r.stage, r.status, r.duration, r.test_stats.passed, r.test_stats.total
                ))?;
            }
            Ok(())
        }
    }
}

pub fn test_all_summary(out: &mut Output, format: OutputFormat, summary: &TestAllSummary) -> Result<()> {
    match format.into() {
        CoreFormat::Json => out.write_json(&summary_all_as_value(summary)),
        CoreFormat::Yaml => out.write_yaml(&summary_all_as_value(summary)),
        CoreFormat::Text => {
            for stage in &summary.passed {
                out.write_line(&format!("{stage}\tpassed"))?;
            }
            for (stage, message) in &summary.failed {
                out.write_line(&format!("{stage}\tFAILED: {message}"))?;
            }
            Ok(())
        }
    }
}

fn summary_all_as_value(summary: &TestAllSummary) -> serde_json::Value {
    serde_json::json!({
        "passed": summary.passed,
        "failed": summary.failed.iter().map(|(stage, message)| serde_json::json!({
            "stage": stage,
            "message": message,
        })).collect::<Vec<_>>(),
    })
}
