//! System time zone and its rollback

use super::{Step, StepContext, StepError, StepOutcome};
use crate::backup::{backup_file, restore_file};
use crate::remote::{Privilege, escape_ere, shell_quote};

const TIMEZONE_FILE: &str = "/etc/timezone";
const RECONFIGURE: &str = "dpkg-reconfigure --frontend noninteractive tzdata";

fn valid_zone(zone: &str) -> bool {
    !zone.is_empty()
        && !zone.starts_with('/')
        && !zone.contains("..")
        && zone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_+-/".contains(c))
}

pub struct Timezone;

impl Step for Timezone {
    fn name(&self) -> &'static str {
        "timezone"
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let zone = ctx.config.timezone.as_str();
        if !valid_zone(zone) {
            return Err(StepError::Unsupported {
                host: ctx.id(),
                reason: format!("'{zone}' is not a time zone name"),
            });
        }

        let remote = ctx.remote;
        let current = format!("^{}$", escape_ere(zone));
        if remote.contains(TIMEZONE_FILE, &current, Privilege::Root)? {
            tracing::debug!("[{}] time zone already {}", ctx.id(), zone);
            return Ok(StepOutcome::NoChange);
        }

        tracing::info!("[{}] setting time zone to {}", ctx.id(), zone);
        backup_file(remote, TIMEZONE_FILE)?;
        remote.write_file(TIMEZONE_FILE, &format!("{zone}\n"), Privilege::Root)?;
        remote.sudo(&format!(
            "ln -sf {} /etc/localtime",
            shell_quote(&format!("/usr/share/zoneinfo/{zone}"))
        ))?;
        remote.sudo(RECONFIGURE)?;
        Ok(StepOutcome::Applied)
    }
}

/// Put back the previous /etc/timezone
pub fn rollback(ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
    if !restore_file(ctx.remote, TIMEZONE_FILE)? {
        return Ok(StepOutcome::NoChange);
    }
    ctx.remote.sudo(RECONFIGURE)?;
    Ok(StepOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path;
    use crate::prompt::Unattended;
    use crate::steps::testing::Rig;

    fn rig(zone: &str) -> Rig {
        let mut rig = Rig::new("root");
        rig.config.timezone = zone.to_string();
        rig.host.put_file(TIMEZONE_FILE, "Etc/UTC\n");
        rig
    }

    #[test]
    fn test_sets_zone() {
        let rig = rig("Australia/Melbourne");
        assert_eq!(rig.apply(&Timezone).unwrap(), StepOutcome::Applied);
        assert_eq!(rig.host.file(TIMEZONE_FILE).unwrap(), "Australia/Melbourne\n");
        assert_eq!(
            rig.host.count("ln -sf /usr/share/zoneinfo/Australia/Melbourne /etc/localtime"),
            1
        );
        assert_eq!(rig.host.count(RECONFIGURE), 1);
    }

    #[test]
    fn test_second_run_is_noop() {
        let rig = rig("Australia/Melbourne");
        rig.apply(&Timezone).unwrap();
        rig.host.clear_log();
        assert_eq!(rig.apply(&Timezone).unwrap(), StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }

    #[test]
    fn test_prefix_of_current_zone_is_not_a_match() {
        let rig = rig("Etc/UT");
        assert_eq!(rig.apply(&Timezone).unwrap(), StepOutcome::Applied);
    }

    #[test]
    fn test_rejects_bad_zone() {
        let rig = rig("../../etc/passwd");
        assert!(matches!(
            rig.apply(&Timezone).unwrap_err(),
            StepError::Unsupported { .. }
        ));
        assert!(rig.host.calls().is_empty());
    }

    #[test]
    fn test_rollback_restores_and_reconfigures() {
        let rig = rig("Europe/Berlin");
        rig.apply(&Timezone).unwrap();
        rig.host.clear_log();

        let outcome = rig.run(&Unattended, |ctx| rollback(ctx)).unwrap();
        assert_eq!(outcome, StepOutcome::Applied);
        assert_eq!(rig.host.file(TIMEZONE_FILE).unwrap(), "Etc/UTC\n");
        assert!(!rig.host.has_path(&backup_path(TIMEZONE_FILE)));
        assert_eq!(rig.host.count(RECONFIGURE), 1);

        assert_eq!(
            rig.run(&Unattended, |ctx| rollback(ctx)).unwrap(),
            StepOutcome::NoChange
        );
    }
}
