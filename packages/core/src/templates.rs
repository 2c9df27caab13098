//! Tera templates for remote configuration files
//!
//! The built-in templates are compiled into the binary. An operator template
//! directory is layered on top: a file there replaces the built-in template
//! with the same relative name, and files under `etc/` feed the etc upload.

use std::error::Error as _;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};
use thiserror::Error;

use crate::config::Config;

pub const SSHD_CONFIG: &str = "ssh/sshd_config";
pub const UFW_TOOL_PROFILE: &str = "ufw/hostkeep";
pub const UFW_SITE_PROFILE: &str = "ufw/hostkeep-site";

/// Prefix of templates that mirror the remote `/etc` tree
pub const ETC_PREFIX: &str = "etc/";

const EMBEDDED: &[(&str, &str)] = &[
    (SSHD_CONFIG, include_str!("../templates/ssh/sshd_config")),
    (UFW_TOOL_PROFILE, include_str!("../templates/ufw/hostkeep.ufw")),
    (UFW_SITE_PROFILE, include_str!("../templates/ufw/hostkeep-site.ufw")),
];

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to load template {name}: {reason}")]
    Load { name: String, reason: String },

    #[error("Failed to render template {name}: {reason}")]
    Render { name: String, reason: String },

    #[error("Failed to read template directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tera's top-level message hides the useful part in its source chain
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Sorted list of regular files below `dir`
fn walkdir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut results = Vec::new();
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                results.extend(walkdir(&path)?);
            } else {
                results.push(path);
            }
        }
    }
    results.sort();
    Ok(results)
}

pub struct Templates {
    tera: Tera,
}

impl Templates {
    /// No templates at all
    pub fn empty() -> Self {
        let mut tera = Tera::default();
        // config files, not HTML
        tera.autoescape_on(vec![]);
        Self { tera }
    }

    /// The templates compiled into the binary
    pub fn embedded() -> Result<Self, TemplateError> {
        let mut templates = Self::empty();
        for (name, content) in EMBEDDED {
            templates.add_raw(name, content)?;
        }
        tracing::debug!("Loaded {} embedded templates", EMBEDDED.len());
        Ok(templates)
    }

    /// Embedded templates plus the operator's `etc_templates_dir`, if set
    pub fn for_config(config: &Config) -> Result<Self, TemplateError> {
        let mut templates = Self::embedded()?;
        if let Some(dir) = &config.etc_templates_dir {
            templates.add_dir(Path::new(dir))?;
        }
        Ok(templates)
    }

    pub fn add_raw(&mut self, name: &str, content: &str) -> Result<(), TemplateError> {
        self.tera
            .add_raw_template(name, content)
            .map_err(|e| TemplateError::Load {
                name: name.to_string(),
                reason: describe(&e),
            })
    }

    /// Load every file below `dir`, named by its path relative to `dir`
    ///
    /// Returns the names added, in sorted order.
    pub fn add_dir(&mut self, dir: &Path) -> Result<Vec<String>, TemplateError> {
        let io = |source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut added = Vec::new();
        for path in walkdir(dir).map_err(io)? {
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let name = relative.to_string_lossy().replace('\\', "/");
            let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            self.add_raw(&name, &content)?;
            tracing::debug!("Loaded template {} from {}", name, dir.display());
            added.push(name);
        }
        tracing::info!("Loaded {} templates from {}", added.len(), dir.display());
        Ok(added)
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        self.tera
            .render(name, context)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                reason: describe(&e),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// Loaded template names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(String::from).collect();
        names.sort();
        names
    }

    /// Templates destined for `/etc`, as (template name, remote path)
    pub fn etc_files(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(ETC_PREFIX)?.to_string();
                Some((name, format!("/etc/{rest}")))
            })
            .collect()
    }
}
