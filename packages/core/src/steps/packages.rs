use std::collections::BTreeSet;

use super::{Step, StepContext, StepError, StepOutcome, home_dir};
use crate::remote::{Privilege, Remote, shell_quote};
use crate::state::{REMOTE_STATE_DIR, keys};

/// One package name per line, for every package hostkeep installed
pub const PACKAGE_LOG: &str = "/var/local/hostkeep/packages_installed.txt";

const APACHE_CONF: &str = "/etc/apache2/apache2.conf";
const APACHE_DEFAULT_SITE: &str = "/etc/apache2/sites-enabled/000-default.conf";

const VIRTUALENV_PROFILE: &[&str] = &[
    "export WORKON_HOME=$HOME/env",
    "source /usr/local/bin/virtualenvwrapper.sh",
];

/// Names of installed packages from `dpkg-query` status lines
///
/// Architecture qualifiers are dropped, so `libc6:amd64` reads as `libc6`.
pub fn parse_installed(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("install ok installed "))
        .map(|name| {
            let name = name.trim();
            name.split_once(':').map_or(name, |(base, _)| base).to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Snapshot of the host's installed packages
pub(crate) fn installed_packages(remote: &dyn Remote) -> Result<BTreeSet<String>, StepError> {
    let line = "dpkg-query -W -f='${Status} ${Package}\\n'";
    let output = remote.run_warn(line)?;
    match output.status {
        0 => Ok(parse_installed(&output.stdout)),
        127 => Err(StepError::Unsupported {
            host: remote.identity().to_string(),
            reason: "dpkg-query not found; only Debian-family hosts are supported".to_string(),
        }),
        status => Err(crate::host::HostError::CommandFailed {
            host: remote.identity().to_string(),
            command: line.to_string(),
            status,
            stderr: output.stderr,
        }
        .into()),
    }
}

fn valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name.len() > 1
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+-.".contains(c))
}

/// Install missing packages and apply their one-time tuning
pub struct Packages;

impl Packages {
    fn disable_apparmor(
        ctx: &mut StepContext<'_>,
        installed: &BTreeSet<String>,
    ) -> Result<bool, StepError> {
        if !ctx.config.disable_apparmor
            || !installed.contains("apparmor")
            || ctx.state.is_set(keys::APPARMOR_DISABLED)?
        {
            return Ok(false);
        }
        tracing::info!("[{}] disabling AppArmor", ctx.id());
        ctx.sudo_tolerant("systemctl stop apparmor")?;
        ctx.sudo_tolerant("systemctl disable apparmor")?;
        ctx.state.set(keys::APPARMOR_DISABLED, true.into())?;
        Ok(true)
    }

    fn install(ctx: &mut StepContext<'_>, package: &str) -> Result<(), StepError> {
        if !valid_package_name(package) {
            return Err(StepError::Unsupported {
                host: ctx.id(),
                reason: format!("'{package}' is not a valid package name"),
            });
        }
        let remote = ctx.remote;
        tracing::info!("[{}] installing {}", ctx.id(), package);
        remote.sudo(&format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -qqy {package}"
        ))?;

        if ctx.installed.is_empty() && !remote.exists(REMOTE_STATE_DIR, Privilege::Root)? {
            remote.sudo(&format!("mkdir -p -- {}", shell_quote(REMOTE_STATE_DIR)))?;
        }
        remote.append(PACKAGE_LOG, package, Privilege::Root)?;
        ctx.installed.push(package.to_string());

        if package == "apache2" {
            Self::tune_apache(ctx)?;
        }
        Ok(())
    }

    /// Low-memory defaults, applied on the run that installs apache2
    fn tune_apache(ctx: &StepContext<'_>) -> Result<(), StepError> {
        let remote = ctx.remote;
        remote.sudo(&format!("rm -f -- {}", shell_quote(APACHE_DEFAULT_SITE)))?;
        remote.substitute(
            APACHE_CONF,
            "^[[:space:]]*KeepAlive[[:space:]]+On[[:space:]]*$",
            "KeepAlive Off",
            Privilege::Root,
        )?;
        remote.substitute(
            APACHE_CONF,
            "^[[:space:]]*StartServers[[:space:]]+[0-9]+[[:space:]]*$",
            "StartServers 1",
            Privilege::Root,
        )?;
        remote.substitute(
            APACHE_CONF,
            "^[[:space:]]*MaxClients[[:space:]]+[0-9]+[[:space:]]*$",
            "MaxClients 100",
            Privilege::Root,
        )?;
        tracing::info!("[{}] tuned apache2", ctx.id());
        Ok(())
    }

    fn disable_apache_modules(ctx: &StepContext<'_>) -> Result<bool, StepError> {
        let remote = ctx.remote;
        let mut changed = false;
        for module in &ctx.config.apache_disable_modules {
            let load = format!("/etc/apache2/mods-enabled/{module}.load");
            if !remote.exists(&load, Privilege::Root)? {
                continue;
            }
            let conf = format!("/etc/apache2/mods-enabled/{module}.conf");
            remote.sudo(&format!(
                "rm -f -- {} {}",
                shell_quote(&load),
                shell_quote(&conf)
            ))?;
            tracing::info!("[{}] disabled apache module {}", ctx.id(), module);
            changed = true;
        }
        Ok(changed)
    }

    fn python_tooling(ctx: &mut StepContext<'_>) -> Result<bool, StepError> {
        let mut changed = false;
        if !ctx.state.is_set(keys::PYTHON_TOOLING)? {
            tracing::info!("[{}] installing virtualenv tooling", ctx.id());
            ctx.remote
                .sudo("pip3 install --upgrade virtualenv virtualenvwrapper")?;
            ctx.state.set(keys::PYTHON_TOOLING, true.into())?;
            changed = true;
        }
        let profile = format!("{}/.profile", home_dir(&ctx.remote.identity().user));
        for line in VIRTUALENV_PROFILE {
            changed |= ctx.remote.append(&profile, line, Privilege::User)?;
        }
        Ok(changed)
    }
}

impl Step for Packages {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let installed = installed_packages(ctx.remote)?;
        let mut changed = Self::disable_apparmor(ctx, &installed)?;

        let missing: Vec<String> = ctx
            .config
            .packages
            .iter()
            .filter(|p| !installed.contains(p.as_str()))
            .cloned()
            .collect();
        for package in &missing {
            Self::install(ctx, package)?;
            changed = true;
        }

        if ctx.config.wants_package("apache2") {
            changed |= Self::disable_apache_modules(ctx)?;
        }
        if ctx.config.wants_package("python3-pip") {
            changed |= Self::python_tooling(ctx)?;
        }

        Ok(if changed {
            StepOutcome::Applied
        } else {
            StepOutcome::NoChange
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateValue;
    use crate::steps::testing::Rig;

    fn rig(packages: &[&str]) -> Rig {
        let mut rig = Rig::new("root");
        rig.config.packages = packages.iter().map(|p| p.to_string()).collect();
        rig
    }

    #[test]
    fn test_parse_installed() {
        let out = "install ok installed git\n\
                   deinstall ok config-files nginx\n\
                   install ok installed libc6:amd64\n";
        let parsed = parse_installed(out);
        assert_eq!(
            parsed.into_iter().collect::<Vec<_>>(),
            vec!["git".to_string(), "libc6".to_string()]
        );
    }

    #[test]
    fn test_installs_only_missing() {
        let rig = rig(&["git", "curl"]);
        rig.host.install("git");

        let installed = rig.run(&crate::prompt::Unattended, |ctx| {
            assert_eq!(Packages.apply(ctx).unwrap(), StepOutcome::Applied);
            ctx.installed.clone()
        });
        assert_eq!(installed, vec!["curl"]);
        assert_eq!(rig.host.count("apt-get install"), 1);
        assert_eq!(rig.host.file(PACKAGE_LOG).unwrap(), "curl\n");
    }

    #[test]
    fn test_second_run_is_noop() {
        let rig = rig(&["git", "curl"]);
        rig.apply(&Packages).unwrap();
        rig.host.clear_log();
        assert_eq!(rig.apply(&Packages).unwrap(), StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }

    #[test]
    fn test_non_debian_is_unsupported() {
        let rig = rig(&["git"]);
        rig.host.fail("dpkg-query", 127, "sh: dpkg-query: not found");
        let err = rig.apply(&Packages).unwrap_err();
        assert!(matches!(err, StepError::Unsupported { .. }));
        assert!(err.to_string().contains("web1.example.com"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let rig = rig(&["git; rm -rf /"]);
        assert!(matches!(
            rig.apply(&Packages).unwrap_err(),
            StepError::Unsupported { .. }
        ));
        assert_eq!(rig.host.count("apt-get"), 0);
    }

    #[test]
    fn test_apache_tuned_on_install_only() {
        let rig = rig(&["apache2"]);
        rig.host.put_file(
            APACHE_CONF,
            "KeepAlive On\n    StartServers 5\nMaxClients 150\n",
        );
        rig.host.put_file(APACHE_DEFAULT_SITE, "<VirtualHost *:80>\n");
        rig.host.put_file("/etc/apache2/mods-enabled/status.load", "LoadModule\n");
        rig.host.put_file("/etc/apache2/mods-enabled/status.conf", "<IfModule>\n");

        assert_eq!(rig.apply(&Packages).unwrap(), StepOutcome::Applied);
        assert_eq!(
            rig.host.file(APACHE_CONF).unwrap(),
            "KeepAlive Off\nStartServers 1\nMaxClients 100\n"
        );
        assert!(!rig.host.has_path(APACHE_DEFAULT_SITE));
        assert!(!rig.host.has_path("/etc/apache2/mods-enabled/status.load"));

        // re-enabled by hand: disabled again, but no re-tuning
        rig.host.put_file("/etc/apache2/mods-enabled/status.load", "LoadModule\n");
        rig.host.clear_log();
        assert_eq!(rig.apply(&Packages).unwrap(), StepOutcome::Applied);
        assert_eq!(rig.host.count("rm -f"), 1);
        assert!(rig.host.calls().iter().all(|c| !c.line.starts_with("file:substitute")));
    }

    #[test]
    fn test_apparmor_disabled_once() {
        let mut rig = rig(&[]);
        rig.config.disable_apparmor = true;
        rig.host.install("apparmor");
        rig.host.fail("systemctl stop apparmor", 5, "Unit apparmor.service not loaded.");

        let tolerated = rig.run(&crate::prompt::Unattended, |ctx| {
            Packages.apply(ctx).unwrap();
            ctx.tolerated.len()
        });
        assert_eq!(tolerated, 1);
        assert_eq!(rig.state(keys::APPARMOR_DISABLED), Some(StateValue::Bool(true)));

        rig.host.clear_log();
        assert_eq!(rig.apply(&Packages).unwrap(), StepOutcome::NoChange);
        assert_eq!(rig.host.count("apparmor"), 0);
    }

    #[test]
    fn test_python_tooling_once() {
        let rig = rig(&["python3-pip"]);
        rig.apply(&Packages).unwrap();
        assert_eq!(rig.host.count("pip3 install"), 1);
        let profile = rig.host.file("/root/.profile").unwrap();
        assert!(profile.contains("export WORKON_HOME=$HOME/env\n"));

        rig.host.clear_log();
        assert_eq!(rig.apply(&Packages).unwrap(), StepOutcome::NoChange);
        assert!(rig.host.mutations().is_empty());
    }
}
