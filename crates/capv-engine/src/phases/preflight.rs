use capv_common::ToolRegistry;

use crate::pipeline::PhaseContext;
use crate::Result;

/// Fail before touching anything when a required binary is missing
pub(crate) async fn run(ctx: &PhaseContext) -> Result<()> {
    ctx.events.progress("checking required tools");
    ToolRegistry::for_spec(&ctx.spec).preflight(ctx.runner.as_ref())?;
    Ok(())
}
