//! Shell rendition of the file operations
//!
//! Every file operation becomes one POSIX shell line built from `test`,
//! `grep -E` and `sed -E`. Status codes are mapped back to booleans; any
//! status outside the documented ones is an error.

use super::{CommandOutput, Executor, Privilege, RemoteCommand};
use crate::host::HostError;

/// Quote `s` for a POSIX shell, leaving plain words untouched
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Escape `s` so it matches literally inside an extended regex
pub fn escape_ere(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if r"\.[]{}()*+?^$|".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn sed_pattern(pattern: &str) -> String {
    pattern.replace('/', r"\/")
}

fn sed_replacement(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '&' | '/' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str(r"\n"),
            _ => out.push(c),
        }
    }
    out
}

fn query(exec: &dyn Executor, line: String, privilege: Privilege) -> Result<CommandOutput, HostError> {
    exec.execute(&RemoteCommand::new(line).as_privilege(privilege).warn_only())
}

fn mutate(exec: &dyn Executor, line: String, privilege: Privilege) -> Result<CommandOutput, HostError> {
    exec.execute(&RemoteCommand::new(line).as_privilege(privilege))
}

fn unexpected(exec: &dyn Executor, line: &str, output: &CommandOutput) -> HostError {
    HostError::CommandFailed {
        host: exec.identity().to_string(),
        command: line.to_string(),
        status: output.status,
        stderr: output.stderr.trim().to_string(),
    }
}

fn sed_in_place(
    exec: &dyn Executor,
    path: &str,
    script: &str,
    privilege: Privilege,
) -> Result<(), HostError> {
    let line = format!(
        "sed -i -E -e {} -- {}",
        shell_quote(script),
        shell_quote(path)
    );
    mutate(exec, line, privilege)?;
    Ok(())
}

pub fn exists(exec: &dyn Executor, path: &str, privilege: Privilege) -> Result<bool, HostError> {
    let line = format!("test -e {}", shell_quote(path));
    let output = query(exec, line.clone(), privilege)?;
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(unexpected(exec, &line, &output)),
    }
}

pub fn contains(
    exec: &dyn Executor,
    path: &str,
    pattern: &str,
    privilege: Privilege,
) -> Result<bool, HostError> {
    let path = shell_quote(path);
    let line = format!(
        "[ -e {path} ] || exit 1; grep -Eq -e {} -- {path}",
        shell_quote(pattern)
    );
    let output = query(exec, line.clone(), privilege)?;
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(unexpected(exec, &line, &output)),
    }
}

pub fn comment(
    exec: &dyn Executor,
    path: &str,
    pattern: &str,
    privilege: Privilege,
) -> Result<(), HostError> {
    let script = format!(r"s/^([[:space:]]*)({})/\1#\2/", sed_pattern(pattern));
    sed_in_place(exec, path, &script, privilege)
}

pub fn uncomment(
    exec: &dyn Executor,
    path: &str,
    pattern: &str,
    privilege: Privilege,
) -> Result<(), HostError> {
    let script = format!(
        r"s/^([[:space:]]*)#[[:space:]]?({})/\1\2/",
        sed_pattern(pattern)
    );
    sed_in_place(exec, path, &script, privilege)
}

pub fn substitute(
    exec: &dyn Executor,
    path: &str,
    before: &str,
    after: &str,
    privilege: Privilege,
) -> Result<(), HostError> {
    let script = format!(
        "s/{}/{}/g",
        sed_pattern(before),
        sed_replacement(after)
    );
    sed_in_place(exec, path, &script, privilege)
}

pub fn append(
    exec: &dyn Executor,
    path: &str,
    text: &str,
    privilege: Privilege,
) -> Result<bool, HostError> {
    let file = shell_quote(path);
    let check = format!("grep -qxF -e {} -- {file}", shell_quote(text));
    let output = query(exec, check, privilege)?;
    if output.success() {
        return Ok(false);
    }

    // keep a missing final newline from gluing two lines together
    let line = format!(
        "[ ! -s {file} ] || [ -z \"$(tail -c1 {file})\" ] || echo >> {file}; printf '%s\\n' {} >> {file}",
        shell_quote(text)
    );
    mutate(exec, line, privilege)?;
    Ok(true)
}

pub fn read_file(
    exec: &dyn Executor,
    path: &str,
    privilege: Privilege,
) -> Result<Option<String>, HostError> {
    let file = shell_quote(path);
    let line = format!("[ -f {file} ] || exit 3; cat -- {file}");
    let output = query(exec, line.clone(), privilege)?;
    match output.status {
        0 => Ok(Some(output.stdout)),
        3 => Ok(None),
        _ => Err(unexpected(exec, &line, &output)),
    }
}

pub fn write_file(
    exec: &dyn Executor,
    path: &str,
    content: &str,
    privilege: Privilege,
) -> Result<bool, HostError> {
    if read_file(exec, path, privilege)?.as_deref() == Some(content) {
        return Ok(false);
    }
    let line = format!("cat > {}", shell_quote(path));
    exec.execute(
        &RemoteCommand::new(line)
            .as_privilege(privilege)
            .with_stdin(content),
    )?;
    Ok(true)
}
