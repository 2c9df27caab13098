use tera::Context;

use super::packages::installed_packages;
use super::{Step, StepContext, StepError, StepOutcome};
use crate::backup::backup_file;
use crate::deploy::{UploadOptions, upload_template};
use crate::remote::{Privilege, shell_quote};
use crate::state::{StateValue, keys};
use crate::templates::{UFW_SITE_PROFILE, UFW_TOOL_PROFILE};

const UFW_CONF: &str = "/etc/ufw/ufw.conf";
const APPLICATIONS_DIR: &str = "/etc/ufw/applications.d";

/// (template, ufw application name)
const PROFILES: &[(&str, &str)] = &[
    (UFW_TOOL_PROFILE, "hostkeep"),
    (UFW_SITE_PROFILE, "hostkeep-site"),
];

fn valid_rule(rule: &str) -> bool {
    rule.chars()
        .all(|c| c.is_ascii_alphanumeric() || " /:.,-_".contains(c))
}

/// ufw with the hostkeep application profiles and the configured rules
///
/// Rules only ever get added. Dropping one from the configuration leaves it
/// active on the host.
pub struct Firewall;

impl Firewall {
    fn refresh_profiles(ctx: &mut StepContext<'_>, first_install: bool) -> Result<(), StepError> {
        let remote = ctx.remote;
        let mut context = Context::new();
        context.insert("ssh_port", &ctx.config.ssh_port);
        let upload = UploadOptions {
            privilege: Privilege::Root,
            backup: false,
        };

        for (template, name) in PROFILES {
            let dest = format!("{APPLICATIONS_DIR}/{name}");
            upload_template(remote, ctx.templates, template, &context, &dest, upload)?;
            remote.sudo(&format!("chown root:root {}", shell_quote(&dest)))?;
            if first_install {
                ctx.sudo_tolerant(&format!("ufw allow {name}"))?;
            } else {
                ctx.sudo_tolerant(&format!("ufw app update {name}"))?;
            }
        }

        if remote.contains(UFW_CONF, "^ENABLED=no$", Privilege::Root)? {
            backup_file(remote, UFW_CONF)?;
            remote.substitute(UFW_CONF, "^ENABLED=no$", "ENABLED=yes", Privilege::Root)?;
        }
        ctx.sudo_tolerant("ufw --force enable")?;

        ctx.state.set(
            keys::FIREWALL_PROFILE_VERSION,
            ctx.config.ssh_port.to_string().into(),
        )?;
        tracing::info!(
            "[{}] ufw profiles set for ssh port {}",
            ctx.id(),
            ctx.config.ssh_port
        );
        Ok(())
    }
}

impl Step for Firewall {
    fn name(&self) -> &'static str {
        "firewall"
    }

    fn fail_closed(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let desired = ctx.config.firewall_rules_for(&ctx.host.roles);
        if let Some(bad) = desired.iter().find(|r| !valid_rule(r)) {
            return Err(StepError::Unsupported {
                host: ctx.id(),
                reason: format!("firewall rule '{bad}' contains unsupported characters"),
            });
        }

        let recorded: Vec<String> = ctx
            .state
            .get(keys::FIREWALL_RULES)?
            .as_ref()
            .and_then(StateValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let mut pending: Vec<String> = Vec::new();
        for rule in desired.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
            if !recorded.iter().any(|r| r == rule) && !pending.iter().any(|r| r == rule) {
                pending.push(rule.to_string());
            }
        }

        let version = ctx.state.get(keys::FIREWALL_PROFILE_VERSION)?;
        let port = ctx.config.ssh_port.to_string();
        let profiles_stale = version.as_ref().and_then(StateValue::as_text) != Some(port.as_str());
        let ufw_missing = !installed_packages(ctx.remote)?.contains("ufw");

        if !ufw_missing && !profiles_stale && pending.is_empty() {
            return Ok(StepOutcome::NoChange);
        }

        let prompt = format!("Enable the ufw firewall on {}?", ctx.remote.identity().host);
        if !ctx.gate(ctx.config.enable_firewall, &prompt, true)? {
            return Ok(StepOutcome::declined("firewall not enabled"));
        }

        if ufw_missing {
            tracing::info!("[{}] installing ufw", ctx.id());
            ctx.remote
                .sudo("DEBIAN_FRONTEND=noninteractive apt-get install -qqy ufw")?;
            ctx.installed.push("ufw".to_string());
        }

        if profiles_stale {
            Self::refresh_profiles(ctx, version.is_none())?;
        }

        if !pending.is_empty() {
            for rule in &pending {
                tracing::info!("[{}] ufw {}", ctx.id(), rule);
                ctx.sudo_tolerant(&format!("ufw {rule}"))?;
            }
            ctx.sudo_tolerant("ufw app update all")?;
            let mut applied = recorded;
            applied.extend(pending);
            ctx.state.set(keys::FIREWALL_RULES, applied.into())?;
        }

        ctx.sudo_tolerant("ufw reload")?;
        Ok(StepOutcome::Applied)
    }
}
