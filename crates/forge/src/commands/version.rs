use super::OWN_VERSION;
use anyhow::Result;

/// `forge version` (`spec.md` §6).
pub fn run() -> Result<i32> {
    println!("forge {OWN_VERSION}");
    Ok(0)
}
