//! Render a template and put it on the host

use tera::Context;

use crate::backup::backup_file;
use crate::remote::{Privilege, Remote};
use crate::steps::StepError;
use crate::templates::Templates;

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    pub privilege: Privilege,
    /// Back up an existing destination before replacing it
    pub backup: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            privilege: Privilege::Root,
            backup: true,
        }
    }
}

/// Render `name` and write it to `dest` when the content differs
///
/// Returns true if the remote file changed. An identical file is left
/// alone, so no backup is taken either.
pub fn upload_template(
    remote: &dyn Remote,
    templates: &Templates,
    name: &str,
    context: &Context,
    dest: &str,
    opts: UploadOptions,
) -> Result<bool, StepError> {
    let rendered = templates
        .render(name, context)
        .map_err(|e| StepError::Template {
            host: remote.identity().to_string(),
            template: name.to_string(),
            reason: e.to_string(),
        })?;

    let current = remote.read_file(dest, opts.privilege)?;
    if current.as_deref() == Some(rendered.as_str()) {
        tracing::debug!("[{}] {} is up to date", remote.identity(), dest);
        return Ok(false);
    }

    if opts.backup && current.is_some() {
        backup_file(remote, dest)?;
    }
    remote.write_file(dest, &rendered, opts.privilege)?;
    tracing::info!("[{}] uploaded {} to {}", remote.identity(), name, dest);
    Ok(true)
}
