//! In-memory host for tests
//!
//! Holds a tiny filesystem, a package set and the ports sshd answers on.
//! Every command and file operation is logged with the session user so tests can
//! assert who ran what, and how many calls changed the host.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use regex::{NoExpand, Regex};

use crate::host::{HostError, HostIdentity};
use crate::prompt::{PromptError, Prompter};
use crate::remote::{CommandOutput, Connector, Executor, Privilege, FileOps, Remote, RemoteCommand};
use crate::steps::home_dir;

/// One logged call against the fake host
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub user: String,
    pub port: u16,
    pub line: String,
    pub privilege: Privilege,
    pub stdin: Option<String>,
    pub mutating: bool,
}

#[derive(Default)]
struct Sim {
    files: RefCell<BTreeMap<String, String>>,
    dirs: RefCell<BTreeSet<String>>,
    packages: RefCell<BTreeSet<String>>,
    ports: RefCell<BTreeSet<u16>>,
    locked: RefCell<BTreeSet<String>>,
    replies: RefCell<Vec<(String, CommandOutput)>>,
    calls: RefCell<Vec<Call>>,
    connections: RefCell<Vec<(HostIdentity, Option<String>)>>,
    visudo_fails: Cell<bool>,
    down: Cell<bool>,
    login_key: RefCell<Option<String>>,
}

const READ_ONLY: &[&str] = &["cat", "dpkg-query", "visudo", "grep", "test", "id", "true"];

/// A session on the simulated host
#[derive(Clone)]
pub(crate) struct FakeHost {
    sim: Rc<Sim>,
    identity: HostIdentity,
}

impl FakeHost {
    /// Fresh Debian host listening on port 22, connected as `user`
    pub fn new(user: &str) -> Self {
        let sim = Sim::default();
        sim.ports.borrow_mut().insert(22);
        let host = Self {
            sim: Rc::new(sim),
            identity: HostIdentity::new(user, "web1.example.com", 22),
        };
        host.put_file(
            "/etc/os-release",
            "ID=ubuntu\nID_LIKE=debian\nPRETTY_NAME=\"Ubuntu 22.04.3 LTS\"\nVERSION_ID=\"22.04\"\n",
        );
        host.put_file("/etc/ssh/sshd_config", "Port 22\nPermitRootLogin yes\n");
        host.put_file("/etc/group", "root:x:0:\nadm:x:4:\n");
        host.put_file("/etc/sudoers", "root ALL=(ALL:ALL) ALL\n");
        host.put_dir("/root");
        host.put_dir("/var/local");
        host
    }

    /// Another session on the same host
    pub fn session(&self, identity: HostIdentity) -> Self {
        Self {
            sim: Rc::clone(&self.sim),
            identity,
        }
    }

    pub fn as_user(&self, user: &str) -> Self {
        self.session(self.identity.with_user(user))
    }

    pub fn on_port(&self, port: u16) -> Self {
        self.session(self.identity.with_port(port))
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { host: self.clone() }
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.sim
            .files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
    }

    pub fn put_dir(&self, path: &str) {
        self.sim.dirs.borrow_mut().insert(path.to_string());
    }

    pub fn install(&self, package: &str) {
        self.sim.packages.borrow_mut().insert(package.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.sim.files.borrow().get(path).cloned()
    }

    pub fn has_path(&self, path: &str) -> bool {
        path_exists(&self.sim, path)
    }

    pub fn packages(&self) -> BTreeSet<String> {
        self.sim.packages.borrow().clone()
    }

    pub fn is_locked(&self, user: &str) -> bool {
        self.sim.locked.borrow().contains(user)
    }

    pub fn listens_on(&self, port: u16) -> bool {
        self.sim.ports.borrow().contains(&port)
    }

    pub fn set_down(&self, down: bool) {
        self.sim.down.set(down);
    }

    /// Accept new logins only from accounts whose authorized_keys hold `key`
    pub fn require_key_login(&self, key: &str) {
        *self.sim.login_key.borrow_mut() = Some(key.to_string());
    }

    pub fn fail_visudo(&self) {
        self.sim.visudo_fails.set(true);
    }

    /// Answer commands starting with `prefix` with `output`
    pub fn reply(&self, prefix: &str, output: CommandOutput) {
        self.sim
            .replies
            .borrow_mut()
            .push((prefix.to_string(), output));
    }

    pub fn fail(&self, prefix: &str, status: i32, stderr: &str) {
        self.reply(
            prefix,
            CommandOutput {
                status,
                stderr: stderr.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.sim.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.mutating).collect()
    }

    /// Lines of executed commands, file operations excluded
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.line.starts_with("file:"))
            .map(|c| c.line)
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|l| l.contains(needle)).count()
    }

    pub fn connections(&self) -> Vec<(HostIdentity, Option<String>)> {
        self.sim.connections.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.sim.calls.borrow_mut().clear();
        self.sim.connections.borrow_mut().clear();
    }

    fn reachable(&self) -> Result<(), HostError> {
        if self.sim.down.get() || !self.sim.ports.borrow().contains(&self.identity.port) {
            return Err(HostError::Unreachable {
                host: self.identity.to_string(),
                reason: "Connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn log(&self, line: String, privilege: Privilege, stdin: Option<String>, mutating: bool) {
        self.sim.calls.borrow_mut().push(Call {
            user: self.identity.user.clone(),
            port: self.identity.port,
            line,
            privilege,
            stdin,
            mutating,
        });
    }

    fn file_log(&self, op: &str, path: &str, arg: &str, privilege: Privilege, mutating: bool) {
        self.log(format!("file:{op} {path} {arg}"), privilege, None, mutating);
    }

    fn failed(&self, line: &str, status: i32, stderr: &str) -> HostError {
        HostError::CommandFailed {
            host: self.identity.to_string(),
            command: line.to_string(),
            status,
            stderr: stderr.to_string(),
        }
    }

    fn edit_lines(
        &self,
        path: &str,
        edit: impl Fn(&str) -> String,
    ) -> Result<(), HostError> {
        let mut files = self.sim.files.borrow_mut();
        let Some(content) = files.get(path) else {
            return Err(self.failed(path, 2, "sed: can't read file"));
        };
        let mut out = String::new();
        for line in content.lines() {
            out.push_str(&edit(line));
            out.push('\n');
        }
        files.insert(path.to_string(), out);
        Ok(())
    }

    fn regex(&self, pattern: &str) -> Result<Regex, HostError> {
        Regex::new(pattern).map_err(|e| self.failed(pattern, 2, &e.to_string()))
    }

    /// Apply the effect of a command the fake understands
    fn interpret(&self, command: &RemoteCommand) -> CommandOutput {
        let words = split_words(&command.line);
        let argv: Vec<&str> = words
            .iter()
            .map(String::as_str)
            .skip_while(|w| w.contains('=') && !w.starts_with('-'))
            .collect();
        let operands: Vec<&str> = argv
            .iter()
            .skip(1)
            .copied()
            .filter(|w| !w.starts_with('-'))
            .collect();
        let ok = CommandOutput::default();
        let sim = &self.sim;

        match argv.first().copied().unwrap_or_default() {
            "cat" => match operands.first().and_then(|p| sim.files.borrow().get(*p).cloned()) {
                Some(stdout) => CommandOutput {
                    stdout,
                    ..Default::default()
                },
                None => status(1, "cat: No such file or directory"),
            },
            "cp" => {
                if operands.len() < 2 {
                    return status(1, "cp: missing operand");
                }
                let (src, dst) = (operands[operands.len() - 2], operands[operands.len() - 1]);
                let content = sim.files.borrow().get(src).cloned();
                match content {
                    Some(content) => {
                        sim.files.borrow_mut().insert(dst.to_string(), content);
                        ok
                    }
                    None => status(1, "cp: cannot stat: No such file or directory"),
                }
            }
            "rm" => {
                let recursive = argv.iter().any(|w| w.starts_with('-') && w.contains('r'));
                for path in operands {
                    sim.files.borrow_mut().remove(path);
                    if recursive {
                        let prefix = format!("{path}/");
                        sim.files.borrow_mut().retain(|p, _| !p.starts_with(&prefix));
                        sim.dirs
                            .borrow_mut()
                            .retain(|d| d != path && !d.starts_with(&prefix));
                    }
                }
                ok
            }
            "mkdir" => {
                let mut skip_next = false;
                for word in argv.iter().skip(1) {
                    if skip_next {
                        skip_next = false;
                        continue;
                    }
                    if *word == "-m" {
                        skip_next = true;
                        continue;
                    }
                    if word.starts_with('-') {
                        continue;
                    }
                    sim.dirs.borrow_mut().insert(word.to_string());
                }
                ok
            }
            "apt-get" => {
                if let Some(pos) = argv.iter().position(|w| *w == "install") {
                    for package in argv[pos + 1..].iter().filter(|w| !w.starts_with('-')) {
                        sim.packages.borrow_mut().insert(package.to_string());
                    }
                }
                ok
            }
            "dpkg-query" => {
                let stdout = sim
                    .packages
                    .borrow()
                    .iter()
                    .map(|p| format!("install ok installed {p}\n"))
                    .collect();
                CommandOutput {
                    stdout,
                    ..Default::default()
                }
            }
            "visudo" => {
                if sim.visudo_fails.get() {
                    status(1, ">>> /tmp/sudoers.hostkeep: syntax error near line 3 <<<")
                } else {
                    ok
                }
            }
            "groupadd" => {
                if let Some(group) = operands.last() {
                    let mut files = sim.files.borrow_mut();
                    let entry = files.entry("/etc/group".to_string()).or_default();
                    entry.push_str(&format!("{group}:x:27:\n"));
                }
                ok
            }
            "useradd" => {
                if let Some(user) = operands.last() {
                    sim.dirs.borrow_mut().insert(format!("/home/{user}"));
                }
                ok
            }
            "usermod" => {
                if argv.contains(&"-L") {
                    if let Some(user) = operands.last() {
                        sim.locked.borrow_mut().insert(user.to_string());
                    }
                }
                ok
            }
            "systemctl" if argv.contains(&"restart") && argv.contains(&"ssh") => {
                // the control master keeps earlier ports usable
                let config = sim.files.borrow().get("/etc/ssh/sshd_config").cloned();
                if let Some(config) = config {
                    for line in config.lines() {
                        if let Some(port) = line.strip_prefix("Port ") {
                            if let Ok(port) = port.trim().parse() {
                                sim.ports.borrow_mut().insert(port);
                            }
                        }
                    }
                }
                ok
            }
            _ => ok,
        }
    }
}

fn status(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

fn path_exists(sim: &Sim, path: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    sim.files.borrow().contains_key(path)
        || sim.dirs.borrow().contains(path)
        || sim.files.borrow().keys().any(|p| p.starts_with(&prefix))
        || sim.dirs.borrow().iter().any(|d| d.starts_with(&prefix))
}

/// Split a shell line into words, honouring single quotes
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

impl Executor for FakeHost {
    fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, HostError> {
        self.reachable()?;

        let scripted = self
            .sim
            .replies
            .borrow()
            .iter()
            .find(|(prefix, _)| command.line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone());

        let name = split_words(&command.line)
            .into_iter()
            .find(|w| !(w.contains('=') && !w.starts_with('-')))
            .unwrap_or_default();
        let mutating = !READ_ONLY.contains(&name.as_str());
        self.log(
            command.line.clone(),
            command.privilege,
            command.stdin.clone(),
            mutating,
        );

        let output = match scripted {
            Some(output) => output,
            None => self.interpret(command),
        };
        if !output.success() && !command.warn_only {
            return Err(self.failed(&command.line, output.status, &output.stderr));
        }
        Ok(output)
    }
}

impl FileOps for FakeHost {
    fn exists(&self, path: &str, privilege: Privilege) -> Result<bool, HostError> {
        self.reachable()?;
        self.file_log("exists", path, "", privilege, false);
        Ok(path_exists(&self.sim, path))
    }

    fn contains(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<bool, HostError> {
        self.reachable()?;
        self.file_log("contains", path, pattern, privilege, false);
        let re = self.regex(pattern)?;
        Ok(self
            .sim
            .files
            .borrow()
            .get(path)
            .is_some_and(|content| content.lines().any(|l| re.is_match(l))))
    }

    fn comment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError> {
        self.reachable()?;
        self.file_log("comment", path, pattern, privilege, true);
        let re = self.regex(&format!("^([[:space:]]*)({pattern})"))?;
        self.edit_lines(path, |l| re.replace(l, "${1}#${2}").into_owned())
    }

    fn uncomment(&self, path: &str, pattern: &str, privilege: Privilege) -> Result<(), HostError> {
        self.reachable()?;
        self.file_log("uncomment", path, pattern, privilege, true);
        let re = self.regex(&format!("^([[:space:]]*)#[[:space:]]?({pattern})"))?;
        self.edit_lines(path, |l| re.replace(l, "${1}${2}").into_owned())
    }

    fn substitute(
        &self,
        path: &str,
        before: &str,
        after: &str,
        privilege: Privilege,
    ) -> Result<(), HostError> {
        self.reachable()?;
        self.file_log("substitute", path, &format!("{before} -> {after}"), privilege, true);
        let re = self.regex(before)?;
        self.edit_lines(path, |l| re.replace_all(l, NoExpand(after)).into_owned())
    }

    fn append(&self, path: &str, line: &str, privilege: Privilege) -> Result<bool, HostError> {
        self.reachable()?;
        let mut files = self.sim.files.borrow_mut();
        let content = files.entry(path.to_string()).or_default();
        if content.lines().any(|l| l == line) {
            drop(files);
            self.file_log("append", path, line, privilege, false);
            return Ok(false);
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(line);
        content.push('\n');
        drop(files);
        self.file_log("append", path, line, privilege, true);
        Ok(true)
    }

    fn read_file(&self, path: &str, privilege: Privilege) -> Result<Option<String>, HostError> {
        self.reachable()?;
        self.file_log("read", path, "", privilege, false);
        Ok(self.file(path))
    }

    fn write_file(&self, path: &str, content: &str, privilege: Privilege) -> Result<bool, HostError> {
        self.reachable()?;
        if self.file(path).as_deref() == Some(content) {
            self.file_log("write", path, "", privilege, false);
            return Ok(false);
        }
        self.file_log("write", path, "", privilege, true);
        self.put_file(path, content);
        Ok(true)
    }
}

/// Hands out sessions on the shared fake host
pub(crate) struct FakeConnector {
    host: FakeHost,
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        identity: &HostIdentity,
        sudo_password: Option<&str>,
    ) -> Result<Box<dyn Remote>, HostError> {
        self.host
            .sim
            .connections
            .borrow_mut()
            .push((identity.clone(), sudo_password.map(str::to_string)));
        let refused = || HostError::AuthFailed {
            host: identity.to_string(),
            key_hint: None,
        };
        // sessions already open ride the control master; new logins are refused
        if self.host.sim.locked.borrow().contains(&identity.user) {
            return Err(refused());
        }
        let session = self.host.session(identity.clone());
        if let Some(key) = self.host.sim.login_key.borrow().as_deref() {
            session.reachable()?;
            let authorized = format!("{}/.ssh/authorized_keys", home_dir(&identity.user));
            let allowed = session
                .file(&authorized)
                .is_some_and(|content| content.lines().any(|l| l == key));
            if !allowed {
                return Err(refused());
            }
        }
        Ok(Box::new(session))
    }
}

/// Prompter answering from queues; an empty queue is an error
#[derive(Default)]
pub(crate) struct ScriptedPrompter {
    confirms: RefCell<VecDeque<bool>>,
    inputs: RefCell<VecDeque<String>>,
    passwords: RefCell<VecDeque<String>>,
    pub asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm_with(self, answer: bool) -> Self {
        self.confirms.borrow_mut().push_back(answer);
        self
    }

    pub fn input_with(self, answer: &str) -> Self {
        self.inputs.borrow_mut().push_back(answer.to_string());
        self
    }

    pub fn password_with(self, answer: &str) -> Self {
        self.passwords.borrow_mut().push_back(answer.to_string());
        self
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool, PromptError> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.confirms
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PromptError::Unavailable(prompt.to_string()))
    }

    fn input(&self, prompt: &str, _default: &str) -> Result<String, PromptError> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.inputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PromptError::Unavailable(prompt.to_string()))
    }

    fn password(&self, prompt: &str) -> Result<String, PromptError> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.passwords
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PromptError::Unavailable(prompt.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_quotes() {
        assert_eq!(
            split_words("cp -p -- '/etc/my file' /tmp/x"),
            vec!["cp", "-p", "--", "/etc/my file", "/tmp/x"]
        );
    }

    #[test]
    fn test_read_only_commands_are_not_mutations() {
        let host = FakeHost::new("root");
        host.run("cat /etc/os-release").unwrap();
        host.sudo("dpkg-query -W").unwrap();
        assert!(host.mutations().is_empty());
        host.sudo("apt-get install -qqy git").unwrap();
        assert_eq!(host.mutations().len(), 1);
        assert!(host.packages().contains("git"));
    }

    #[test]
    fn test_key_login_needs_authorized_key() {
        let host = FakeHost::new("root");
        host.require_key_login("ssh-ed25519 AAAA op");
        let connector = host.connector();
        let deploy = HostIdentity::new("deploy", "web1.example.com", 22);
        assert!(matches!(
            connector.connect(&deploy, Some("pw")),
            Err(HostError::AuthFailed { .. })
        ));

        host.put_file("/home/deploy/.ssh/authorized_keys", "ssh-ed25519 AAAA op\n");
        assert!(connector.connect(&deploy, None).is_ok());
        assert!(matches!(
            connector.connect(&deploy.with_port(10022), None),
            Err(HostError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_other_port_is_unreachable() {
        let host = FakeHost::new("root").on_port(10022);
        assert!(matches!(
            host.run("true"),
            Err(HostError::Unreachable { .. })
        ));
    }
}
