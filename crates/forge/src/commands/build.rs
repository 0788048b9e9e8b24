use super::{context, render, OWN_VERSION};
use crate::cli::{OutputFormat, DEFAULT_NAMESPACE};
use anyhow::Result;
use forge_core::io::Output;
use forge_core::planner;
use forge_core::store::Store;

/// `forge build [name]` (`spec.md` §6). Builds every declared artifact when
/// `name` is omitted.
pub async fn run(name: Option<String>) -> Result<i32> {
    let ctx = context::load()?;
    let mut store = Store::read_or_create(&ctx.store_path)?;

    match planner::run_build(
        &ctx.manifest,
        &ctx.root_dir,
        name.as_deref(),
        &ctx.store_path,
        DEFAULT_NAMESPACE,
        OWN_VERSION,
        &mut store,
    )
    .await
    {
        Ok(summary) => {
            let mut out = Output::new();
            render::build_summary(&mut out, OutputFormat::Table, &summary)?;
            out.flush()?;
            Ok(if summary.success() { 0 } else { 1 })
        }
        Err(e) => {
            eprintln!("build failed: {e}");
            Ok(1)
        }
    }
}
