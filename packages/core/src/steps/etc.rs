use std::net::{IpAddr, ToSocketAddrs};

use tera::Context;

use super::{Step, StepContext, StepError, StepOutcome};
use crate::deploy::{UploadOptions, upload_template};
use crate::remote::{Privilege, remote_parent, shell_quote};

/// Directories shared by many packages: templates there only replace files
const EXISTING_ONLY: &[&str] = &[
    "/etc",
    "/etc/init.d",
    "/etc/logrotate.d",
    "/etc/rsyslog.d",
    "/etc/cron.d",
];

/// Address the host name resolves to, IPv4 first
fn resolve(host: &str, port: u16) -> Option<IpAddr> {
    let addrs: Vec<IpAddr> = (host, port).to_socket_addrs().ok()?.map(|a| a.ip()).collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Render the operator's `etc/` templates onto the host
pub struct EtcUpload;

impl Step for EtcUpload {
    fn name(&self) -> &'static str {
        "etc"
    }

    fn apply(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        if ctx.config.etc_templates_dir.is_none() {
            return Ok(StepOutcome::NoChange);
        }
        let files = ctx.templates.etc_files();
        if files.is_empty() {
            return Ok(StepOutcome::NoChange);
        }

        let remote = ctx.remote;
        let identity = remote.identity();
        let host_ip = match resolve(&identity.host, identity.port) {
            Some(ip) => ip.to_string(),
            None => {
                tracing::warn!("[{}] could not resolve {}", ctx.id(), identity.host);
                identity.host.clone()
            }
        };
        let mut context = Context::new();
        context.insert("host", &ctx.host.hostname);
        context.insert("host_ip", &host_ip);
        context.insert("ssh_port", &ctx.config.ssh_port);

        let mut uploaded = 0;
        for (template, dest) in &files {
            let parent = remote_parent(dest);
            let wanted = if EXISTING_ONLY.contains(&parent) {
                remote.exists(dest, Privilege::Root)?
            } else {
                remote.exists(parent, Privilege::Root)?
            };
            if !wanted {
                tracing::debug!("[{}] skipping {}", ctx.id(), dest);
                continue;
            }

            if upload_template(
                remote,
                ctx.templates,
                template,
                &context,
                dest,
                UploadOptions::default(),
            )? {
                let quoted = shell_quote(dest);
                remote.sudo(&format!("chown root:root {quoted}"))?;
                let mode = if parent == "/etc/init.d" { "ugo+rx" } else { "ugo+r" };
                remote.sudo(&format!("chmod {mode} {quoted}"))?;
                uploaded += 1;
            }
        }

        if uploaded == 0 {
            return Ok(StepOutcome::NoChange);
        }
        tracing::info!("[{}] uploaded {} etc files", ctx.id(), uploaded);
        Ok(StepOutcome::Applied)
    }
}
