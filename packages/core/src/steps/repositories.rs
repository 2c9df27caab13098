use super::packages::installed_packages;
use super::{Step, StepContext, StepError, StepOutcome};
use crate::backup::backup_file;
use crate::remote::{Privilege, shell_quote};
use crate::state::{StateValue, keys};

const SOURCES_LIST: &str = "/etc/apt/sources.list";
const UNIVERSE_COMMENTED: &str = "^#[[:space:]]?deb .*universe";

/// Enable the universe component and add the configured apt repositories
pub struct Repositories;

impl Step for Repositories {
    fn name(&self) -> &'static str {
        "repositories"
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let desired = ctx.config.package_repositories.clone();
        let recorded = ctx.state.get(keys::PACKAGE_REPOSITORIES)?;
        let recorded: Vec<String> = recorded
            .as_ref()
            .and_then(StateValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        if recorded == desired {
            return Ok(StepOutcome::NoChange);
        }

        let remote = ctx.remote;
        if remote.contains(SOURCES_LIST, UNIVERSE_COMMENTED, Privilege::Root)? {
            backup_file(remote, SOURCES_LIST)?;
            remote.uncomment(SOURCES_LIST, "deb .*universe", Privilege::Root)?;
            tracing::info!("[{}] enabled universe sources", ctx.id());
        }

        let pending: Vec<&String> = desired.iter().filter(|r| !recorded.contains(r)).collect();
        if !pending.is_empty() {
            if !installed_packages(remote)?.contains("software-properties-common") {
                remote.sudo(
                    "DEBIAN_FRONTEND=noninteractive apt-get install -qqy software-properties-common",
                )?;
            }
            for repo in pending {
                remote.sudo(&format!("add-apt-repository -y {}", shell_quote(repo)))?;
                tracing::info!("[{}] added repository {}", ctx.id(), repo);
            }
        }

        remote.sudo("apt-get -qq update")?;
        ctx.state
            .set(keys::PACKAGE_REPOSITORIES, StateValue::List(desired))?;
        Ok(StepOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path;
    use crate::steps::testing::Rig;

    fn rig() -> Rig {
        let mut rig = Rig::new("root");
        rig.config.package_repositories = vec!["ppa:deadsnakes/ppa".to_string()];
        rig.host.put_file(
            SOURCES_LIST,
            "deb http://archive.ubuntu.com/ubuntu jammy main\n# deb http://archive.ubuntu.com/ubuntu jammy universe\n",
        );
        rig
    }

    #[test]
    fn test_adds_repositories_and_universe() {
        let rig = rig();
        assert_eq!(rig.apply(&Repositories).unwrap(), StepOutcome::Applied);

        let sources = rig.host.file(SOURCES_LIST).unwrap();
        assert!(sources.contains("\ndeb http://archive.ubuntu.com/ubuntu jammy universe\n"));
        assert!(rig.host.file(&backup_path(SOURCES_LIST)).is_some());
        assert!(rig.host.packages().contains("software-properties-common"));
        assert_eq!(rig.host.count("add-apt-repository -y ppa:deadsnakes/ppa"), 1);
        assert_eq!(
            rig.state(keys::PACKAGE_REPOSITORIES),
            Some(StateValue::List(vec!["ppa:deadsnakes/ppa".to_string()]))
        );
    }

    #[test]
    fn test_second_run_is_noop() {
        let rig = rig();
        rig.apply(&Repositories).unwrap();
        rig.host.clear_log();
        assert_eq!(rig.apply(&Repositories).unwrap(), StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }

    #[test]
    fn test_only_new_repositories_added() {
        let mut rig = rig();
        rig.apply(&Repositories).unwrap();
        rig.config
            .package_repositories
            .push("ppa:ondrej/php".to_string());
        rig.host.clear_log();

        assert_eq!(rig.apply(&Repositories).unwrap(), StepOutcome::Applied);
        assert_eq!(rig.host.count("add-apt-repository"), 1);
        assert_eq!(rig.host.count("ppa:ondrej/php"), 1);
    }
}
