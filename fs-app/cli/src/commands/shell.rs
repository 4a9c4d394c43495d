//! Interactive shell and script runner
//!
//! Lines are split on whitespace and dispatched to the [`FileSystem`] command
//! surface. A failing command prints its error and the shell carries on.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chainfs::{BackingStore, EntryKind, FileBackedStore, FileSystem, FsConfig, FsError, SeekMode};

/// Run a file of shell commands
#[derive(Parser, Debug)]
#[command(about = "Run a file of shell commands")]
pub struct RunArgs {
    /// Script with one command per line; `#` starts a comment line
    pub script: PathBuf,

    /// Print each command before running it
    #[arg(short, long)]
    pub echo: bool,
}

/// What the loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

const HELP: &str = "\
commands:
  create [size-mb]          format [block-size]       mount | unmount | sync
  login [user [password]]   logout [-s|-e]            useradd user [password]
  trust user                untrust user
  mkdir path...             rmdir path...             touch path...
  rm path...                mv src dst-dir            cp src dst-dir
  rename path new-name      ls [path]                 cd [path]
  pwd                       stat path                 statfs
  chmod who how path        open r|w|rw path          close path
  read path len             write path text...        seek path -b|-c offset
  help                      exit";

/// A shell session over one engine
pub struct Shell<S: BackingStore> {
    fs: FileSystem<S>,
    interactive: bool,
    echo: bool,
}

impl<S: BackingStore> Shell<S> {
    pub fn new(fs: FileSystem<S>, interactive: bool) -> Self {
        Self {
            fs,
            interactive,
            echo: false,
        }
    }

    #[cfg(test)]
    pub fn filesystem(&self) -> &FileSystem<S> {
        &self.fs
    }

    /// Mount the disk, formatting it first when it has never been formatted
    /// or its superblock is unreadable
    pub fn bootstrap<W: Write>(&mut self, out: &mut W) -> Result<()> {
        match self.fs.mount() {
            Ok(()) => {}
            Err(e) if e.needs_format() => {
                let block_size = self.fs.config().block_size;
                writeln!(out, "{}; formatting with {}-byte blocks", e, block_size)?;
                self.fs.format(block_size).context("Failed to format disk")?;
            }
            Err(e) => return Err(e).context("Failed to mount disk"),
        }
        info!("Mounted, working directory {}", self.fs.pwd());
        Ok(())
    }

    fn prompt(&self) -> String {
        format!(
            "chainfs@{}:{} $ ",
            self.fs.whoami().unwrap_or_default(),
            self.fs.pwd()
        )
    }

    /// Ask for credentials until a login succeeds. Returns `false` when the
    /// input ends first.
    fn login_prompt<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> Result<bool> {
        loop {
            let Some(name) = ask(input, out, "Login as: ")? else {
                return Ok(false);
            };
            let Some(password) = ask(input, out, "Password: ")? else {
                return Ok(false);
            };
            match self.fs.login(&name, &password) {
                Ok(_) => return Ok(true),
                Err(FsError::PermissionDenied(_)) => {
                    writeln!(out, "Access denied. Please check username or password.")?
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read and run commands until `exit`, `logout -e` or end of input, then
    /// unmount
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<()> {
        let mut line = String::new();
        loop {
            if self.interactive {
                if self.fs.is_mounted()
                    && self.fs.session() == 0
                    && !self.login_prompt(&mut input, &mut out)?
                {
                    break;
                }
                write!(out, "{}", self.prompt())?;
                out.flush()?;
            }

            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            if self.echo {
                writeln!(out, "$ {}", line.trim_end())?;
            }
            match self.execute(&line, &mut input, &mut out) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => writeln!(out, "{:#}", e)?,
            }
        }

        if self.fs.is_mounted() {
            self.fs.unmount()?;
        }
        writeln!(out, "Bye!")?;
        Ok(())
    }

    /// Run one command line
    pub fn execute<R: BufRead, W: Write>(
        &mut self,
        line: &str,
        input: &mut R,
        out: &mut W,
    ) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Flow::Continue);
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (cmd, args) = (tokens[0], &tokens[1..]);
        debug!("SHELL: {} {:?}", cmd, args);
        self.dispatch(cmd, args, input, out)
            .with_context(|| cmd.to_string())
    }

    fn dispatch<R: BufRead, W: Write>(
        &mut self,
        cmd: &str,
        args: &[&str],
        input: &mut R,
        out: &mut W,
    ) -> Result<Flow> {
        match cmd {
            "exit" | "quit" => return Ok(Flow::Exit),
            "help" => writeln!(out, "{}", HELP)?,

            "create" => {
                let size_mb: u64 = match args.first() {
                    Some(arg) => parse(arg, "size")?,
                    None => 1,
                };
                self.fs.create_disk(size_mb.saturating_mul(1024 * 1024))?;
                writeln!(out, "disk created; run 'format' before use")?;
            }
            "format" => {
                let block_size = match args.first() {
                    Some(arg) => parse(arg, "block size")?,
                    None => self.fs.config().block_size,
                };
                self.fs.format(block_size)?;
            }
            "mount" => self.bootstrap(out)?,
            "unmount" | "umount" => self.fs.unmount()?,
            "sync" => self.fs.update()?,

            "login" => {
                let name = match args.first() {
                    Some(name) => name.to_string(),
                    None => require(ask(input, out, "Login as: ")?)?,
                };
                let password = match args.get(1) {
                    Some(password) => password.to_string(),
                    None => require(ask(input, out, "Password: ")?)?,
                };
                self.fs.login(&name, &password)?;
            }
            "logout" => {
                let option = match args {
                    [] => "-s",
                    [option] => *option,
                    _ => bail!("too many operands"),
                };
                if option != "-s" && option != "-e" {
                    bail!("unknown operand: '{}'", option);
                }
                match self.fs.logout() {
                    Ok(()) | Err(FsError::NoSession) => {}
                    Err(e) => return Err(e.into()),
                }
                if option == "-e" {
                    return Ok(Flow::Exit);
                }
            }
            "useradd" => {
                let name = operand(args, 0)?;
                let password = match args.get(1) {
                    Some(password) => password.to_string(),
                    None => require(ask(input, out, "Password: ")?)?,
                };
                let uid = self.fs.add_user(name, &password)?;
                writeln!(out, "{} has uid {}", name, uid)?;
            }
            "trust" => self.fs.grant_trust(operand(args, 0)?)?,
            "untrust" => self.fs.revoke_trust(operand(args, 0)?)?,

            "mkdir" => {
                for path in operands(args)? {
                    self.fs.mkdir(path)?;
                }
            }
            "rmdir" => {
                for path in operands(args)? {
                    self.fs.rmdir(path)?;
                }
            }
            "touch" => {
                for path in operands(args)? {
                    self.fs.touch(path)?;
                }
            }
            "rm" => {
                for path in operands(args)? {
                    self.fs.rm(path)?;
                }
            }
            "mv" => self.fs.mv(operand(args, 0)?, operand(args, 1)?)?,
            "cp" => self.fs.cp(operand(args, 0)?, operand(args, 1)?)?,
            "rename" => self.fs.rename(operand(args, 0)?, operand(args, 1)?)?,
            "ls" => self.ls(args.first().copied(), out)?,
            "cd" => self.fs.cd(args.first().copied().unwrap_or("/"))?,
            "pwd" => writeln!(out, "{}", self.fs.pwd())?,
            "stat" => {
                let stat = self.fs.stat(operand(args, 0)?)?;
                writeln!(out, "  name: {}", stat.name)?;
                writeln!(out, "  kind: {}", kind_name(stat.kind))?;
                writeln!(out, " inode: {}", stat.inode)?;
                writeln!(out, "content: {}", stat.content)?;
                writeln!(out, " owner: {}", self.owner_name(stat.owner))?;
                writeln!(out, "  mode: {}", stat.permissions)?;
                writeln!(out, "  size: {}", stat.size)?;
            }
            "statfs" => {
                let stats = self.fs.statfs()?;
                writeln!(
                    out,
                    "capacity {} bytes, {} blocks of {} bytes, {} free, {} slots per index table, {} users",
                    stats.capacity,
                    stats.block_count,
                    stats.block_size,
                    stats.free_blocks,
                    stats.index_capacity,
                    stats.users
                )?;
            }
            "chmod" => self.fs.chmod(operand(args, 0)?, operand(args, 1)?, operand(args, 2)?)?,

            "open" => self.fs.open(operand(args, 0)?, operand(args, 1)?)?,
            "close" => self.fs.close(operand(args, 0)?)?,
            "read" => {
                let len: usize = parse(operand(args, 1)?, "length")?;
                let data = self.fs.read(operand(args, 0)?, len)?;
                writeln!(out, "{}", String::from_utf8_lossy(&data))?;
            }
            "write" => {
                let path = operand(args, 0)?;
                operand(args, 1)?;
                self.fs.write(path, args[1..].join(" ").as_bytes())?;
            }
            "seek" => {
                let path = operand(args, 0)?;
                let mode = match operand(args, 1)? {
                    "-b" => SeekMode::Absolute,
                    "-c" => SeekMode::Relative,
                    other => bail!("unknown option: '{}'", other),
                };
                let offset: i64 = parse(operand(args, 2)?, "offset")?;
                self.fs.seek(path, mode, offset)?;
            }

            _ => bail!("undefined command"),
        }
        Ok(Flow::Continue)
    }

    fn owner_name(&self, uid: u8) -> String {
        self.fs
            .users()
            .ok()
            .and_then(|users| users.get(uid))
            .map_or_else(|| uid.to_string(), |u| u.name.clone())
    }

    fn ls<W: Write>(&mut self, path: Option<&str>, out: &mut W) -> Result<()> {
        let entries = self.fs.ls(path)?;
        for entry in entries {
            let kind = match entry.kind {
                EntryKind::Directory => 'd',
                EntryKind::File => '-',
            };
            writeln!(
                out,
                "{}{} {:<16} {:>10} {}",
                kind,
                entry.permissions,
                self.owner_name(entry.owner),
                entry.size,
                entry.name
            )?;
        }
        Ok(())
    }
}

fn kind_name(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Directory => "directory",
        EntryKind::File => "file",
    }
}

fn operand<'a>(args: &[&'a str], index: usize) -> Result<&'a str> {
    args.get(index).copied().ok_or_else(|| anyhow!("missing operand"))
}

fn operands<'a, 'b>(args: &'b [&'a str]) -> Result<&'b [&'a str]> {
    if args.is_empty() {
        bail!("missing operand");
    }
    Ok(args)
}

fn parse<T: std::str::FromStr>(arg: &str, what: &str) -> Result<T> {
    arg.parse()
        .map_err(|_| anyhow!("invalid {}: '{}'", what, arg))
}

fn require(answer: Option<String>) -> Result<String> {
    answer.ok_or_else(|| anyhow!("unexpected end of input"))
}

/// Print `prompt` and read one line. `None` at end of input.
fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> Result<Option<String>> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn open_shell(config: FsConfig, interactive: bool) -> Result<Shell<FileBackedStore>> {
    let path = config.disk_path.clone();
    if !path.is_file() {
        bail!(
            "Disk image {} does not exist; run `chainfs create` first",
            path.display()
        );
    }
    let mut shell = Shell::new(
        FileSystem::new(FileBackedStore::new(&path), config),
        interactive,
    );
    shell
        .bootstrap(&mut std::io::stdout())
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(shell)
}

/// `chainfs shell`
pub fn run_interactive(config: FsConfig) -> Result<()> {
    let mut shell = open_shell(config, true)?;
    println!("ChainFS {} - type 'help' for commands", env!("CARGO_PKG_VERSION"));
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    shell.run(stdin.lock(), stdout.lock())
}

/// `chainfs run <script>`
pub fn run_script(args: RunArgs, config: FsConfig) -> Result<()> {
    let script = File::open(&args.script)
        .with_context(|| format!("Failed to open script {}", args.script.display()))?;
    let mut shell = open_shell(config, false)?;
    shell.echo = args.echo;
    shell.run(BufReader::new(script), std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfs::MemoryStore;
    use std::io::Cursor;

    fn shell(interactive: bool) -> Shell<MemoryStore> {
        let mut fs = FileSystem::new(MemoryStore::new(), FsConfig::default());
        fs.create_disk(1 << 20).unwrap();
        let mut shell = Shell::new(fs, interactive);
        let mut sink = Vec::new();
        shell.bootstrap(&mut sink).unwrap();
        assert!(String::from_utf8(sink).unwrap().contains("formatting"));
        shell
    }

    fn run_lines(shell: &mut Shell<MemoryStore>, script: &str) -> String {
        let mut out = Vec::new();
        shell.run(Cursor::new(script.as_bytes()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_script_session() {
        let mut shell = shell(false);
        let out = run_lines(
            &mut shell,
            "login root root\n\
             mkdir docs\n\
             touch docs/a.txt\n\
             open rw docs/a.txt\n\
             write docs/a.txt hello   world\n\
             seek docs/a.txt -b 6\n\
             read docs/a.txt 64\n\
             close docs/a.txt\n\
             cd docs\n\
             pwd\n\
             ls\n\
             logout -e\n\
             mkdir never\n",
        );

        assert!(out.contains("world\n"), "{}", out);
        assert!(out.contains("/docs\n"));
        assert!(out.lines().any(|l| l.starts_with("-rwxrwx root") && l.ends_with(" a.txt")));
        assert!(out.ends_with("Bye!\n"));
        assert!(!shell.filesystem().is_mounted());
    }

    #[test]
    fn test_errors_do_not_end_the_session() {
        let mut shell = shell(false);
        let out = run_lines(
            &mut shell,
            "mkdir a\nmkdir a\nfrobnicate\nrm missing\nseek x -q 1\nread\nmkdir b\nls\n",
        );

        assert!(out.contains("mkdir: 'a': already exists"), "{}", out);
        assert!(out.contains("frobnicate: undefined command"));
        assert!(out.contains("rm: 'missing': no such file or directory"));
        assert!(out.contains("seek: unknown option: '-q'"));
        assert!(out.contains("read: missing operand"));
        assert!(out.lines().any(|l| l.ends_with(" b")));
    }

    #[test]
    fn test_logout_operands() {
        let mut shell = shell(false);
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();

        let err = shell.execute("logout -q", &mut input, &mut out).unwrap_err();
        assert_eq!(format!("{:#}", err), "logout: unknown operand: '-q'");
        assert!(shell.execute("logout -s -e", &mut input, &mut out).is_err());
        // Without a session, -s is a no-op and -e still exits
        assert_eq!(
            shell.execute("logout", &mut input, &mut out).unwrap(),
            Flow::Continue
        );
        assert_eq!(
            shell.execute("logout -e", &mut input, &mut out).unwrap(),
            Flow::Exit
        );
    }

    #[test]
    fn test_interactive_login_retries() {
        let mut shell = shell(true);
        let out = run_lines(&mut shell, "root\nbad\nroot\nroot\npwd\nexit\n");

        assert!(out.contains("Access denied."), "{}", out);
        assert!(out.contains("chainfs@root:/ $ "));
        assert!(out.contains("/\n"));
    }

    #[test]
    fn test_login_prompts_for_missing_password() {
        let mut shell = shell(false);
        let out = run_lines(&mut shell, "login root\nroot\nuseradd bob pw\nexit\n");
        assert!(out.contains("Password: "));
        assert!(out.contains("bob has uid 2"), "{}", out);
    }

    #[test]
    fn test_bootstrap_fails_without_disk() {
        let fs = FileSystem::new(MemoryStore::new(), FsConfig::default());
        let mut shell = Shell::new(fs, false);
        assert!(shell.bootstrap(&mut Vec::new()).is_err());
    }
}
