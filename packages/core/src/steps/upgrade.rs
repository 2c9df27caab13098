use chrono::Utc;

use super::{Step, StepContext, StepError, StepOutcome};
use crate::state::keys;

/// Full `apt-get upgrade`, at most once per day
pub struct Upgrade;

impl Upgrade {
    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }
}

impl Step for Upgrade {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        if !ctx.config.upgrade_packages {
            return Ok(StepOutcome::NoChange);
        }
        let today = Self::today();
        if ctx.state.matches(keys::PACKAGES_UPGRADED, &today.as_str().into())? {
            tracing::debug!("[{}] already upgraded today", ctx.id());
            return Ok(StepOutcome::NoChange);
        }

        tracing::info!("[{}] updating and upgrading packages", ctx.id());
        ctx.remote.sudo("apt-get -qqy update")?;
        ctx.remote
            .sudo("DEBIAN_FRONTEND=noninteractive apt-get -qqy upgrade")?;
        ctx.state.set(keys::PACKAGES_UPGRADED, today.into())?;
        Ok(StepOutcome::Applied)
    }
}
