//! Host identity
//!
//! The `user@host:port` triple a session is connected as. State is keyed by
//! the canonical host part only: a setup pass moves a machine from
//! `root@h:22` to `deploy@h:10022` and its record has to follow.

use std::fmt;

use super::error::HostError;

/// Port assumed when an address carries none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Who we are connected as, and where
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostIdentity {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl HostIdentity {
    /// Build an identity, canonicalizing the host name
    pub fn new(user: impl Into<String>, host: &str, port: u16) -> Self {
        Self {
            user: user.into(),
            host: canonical_host(host),
            port,
        }
    }

    /// Parse `[user@]host[:port]`, with IPv6 hosts written as `[addr]:port`
    pub fn parse(address: &str, default_user: &str, default_port: u16) -> Result<Self, HostError> {
        let address = address.trim();
        let (user, rest) = match address.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (user, rest),
            Some(_) => {
                return Err(HostError::InvalidConfig(format!(
                    "empty user in address '{address}'"
                )));
            }
            None => (default_user, address),
        };

        let (host, port) = if let Some(stripped) = rest.strip_prefix('[') {
            let (host, tail) = stripped.split_once(']').ok_or_else(|| {
                HostError::InvalidConfig(format!("unterminated '[' in address '{address}'"))
            })?;
            match tail.strip_prefix(':') {
                Some(port) => (host, parse_port(port, address)?),
                None if tail.is_empty() => (host, default_port),
                None => {
                    return Err(HostError::InvalidConfig(format!(
                        "unexpected '{tail}' in address '{address}'"
                    )));
                }
            }
        } else if rest.matches(':').count() > 1 {
            // bare IPv6 literal without a port
            (rest, default_port)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, parse_port(port, address)?),
                None => (rest, default_port),
            }
        };

        if host.is_empty() {
            return Err(HostError::InvalidConfig(format!(
                "missing host name in address '{address}'"
            )));
        }

        Ok(Self::new(user, host, port))
    }

    /// Same host, different account
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..self.clone()
        }
    }

    /// Same host, different port
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// Key under which this host's state record is stored
    pub fn namespace(&self) -> &str {
        &self.host
    }

    /// `user@host` as passed to ssh
    pub fn destination(&self) -> String {
        if self.host.contains(':') {
            format!("{}@[{}]", self.user, self.host)
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16, HostError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(HostError::InvalidConfig(format!(
            "invalid port '{port}' in address '{address}'"
        ))),
        Ok(port) => Ok(port),
    }
}

/// Lowercase, strip brackets and a trailing dot
pub fn canonical_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.trim_end_matches('.').to_lowercase()
}
