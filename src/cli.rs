//! Command-line interface for shell-courier.
//!
//! Uses lexopt; global options may appear before or after the subcommand.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout of `wait-tcp`.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Remote host.
    pub host: Option<String>,
    /// Remote SSH port.
    pub port: Option<u16>,
    /// Remote login user.
    pub user: Option<String>,
    /// Private key file.
    pub identity: Option<PathBuf>,
    /// Connection attempts.
    pub retries: Option<u32>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// What to do.
    pub command: Option<Subcommand>,
}

/// Service operation requested by `service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Enable,
    Disable,
    Start,
    Stop,
    Status,
}

impl ServiceAction {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    /// Run a local pipeline.
    Eval { command_line: String },
    /// Run a remote command.
    Ssh { sudo: bool, command: String },
    /// Install a file on the remote host.
    Scp {
        local: PathBuf,
        remote: String,
        owner: String,
        group: String,
        mode: u32,
    },
    /// Query or change a systemd service.
    Service { action: ServiceAction, name: String },
    /// Install and start a systemd unit.
    DeployService { name: String, unit_file: PathBuf },
    /// Wait for a TCP port to accept connections.
    WaitTcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
}

impl Subcommand {
    /// Whether this subcommand talks to the configured remote host.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Ssh { .. } | Self::Scp { .. } | Self::Service { .. } | Self::DeployService { .. }
        )
    }
}

/// Subcommand-specific flags, validated once the subcommand is known.
#[derive(Debug, Default)]
struct Flags {
    sudo: bool,
    owner: Option<String>,
    group: Option<String>,
    mode: Option<u32>,
    timeout: Option<Duration>,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut flags = Flags::default();
    let mut positional: Vec<String> = Vec::new();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                result.host = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('u') | Long("user") => {
                result.user = Some(parser.value()?.parse()?);
            }
            Short('i') | Long("identity") => {
                result.identity = Some(parser.value()?.parse()?);
            }
            Short('r') | Long("retries") => {
                let value: String = parser.value()?.parse()?;
                result.retries = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("retries", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("sudo") => {
                flags.sudo = true;
            }
            Long("owner") => {
                flags.owner = Some(parser.value()?.parse()?);
            }
            Long("group") => {
                flags.group = Some(parser.value()?.parse()?);
            }
            Long("mode") => {
                let value: String = parser.value()?.parse()?;
                let digits = value.trim_start_matches("0o");
                flags.mode = Some(
                    u32::from_str_radix(digits, 8)
                        .ok()
                        .filter(|m| *m <= 0o7777)
                        .ok_or(ArgsError::InvalidValue("mode", value))?,
                );
            }
            Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout", value))?;
                flags.timeout = Some(Duration::from_secs(secs));
            }
            Value(val) => {
                positional.push(val.string()?);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    if !positional.is_empty() {
        result.command = Some(build_subcommand(positional, flags)?);
    }
    Ok(result)
}

fn build_subcommand(positional: Vec<String>, flags: Flags) -> Result<Subcommand, ArgsError> {
    let mut words = positional.into_iter();
    let name = words.next().unwrap_or_default();
    let rest: Vec<String> = words.collect();

    let command = match name.as_str() {
        "eval" => Subcommand::Eval {
            command_line: joined(&name, rest)?,
        },
        "ssh" => Subcommand::Ssh {
            sudo: flags.sudo,
            command: joined(&name, rest)?,
        },
        "scp" => {
            let [local, remote] = exactly::<2>(&name, rest)?;
            Subcommand::Scp {
                local: PathBuf::from(local),
                remote,
                owner: flags.owner.unwrap_or_default(),
                group: flags.group.unwrap_or_default(),
                mode: flags.mode.unwrap_or(0o644),
            }
        }
        "service" => {
            let [action, service] = exactly::<2>(&name, rest)?;
            Subcommand::Service {
                action: ServiceAction::parse(&action)
                    .ok_or(ArgsError::InvalidValue("service action", action))?,
                name: service,
            }
        }
        "deploy-service" => {
            let [service, unit_file] = exactly::<2>(&name, rest)?;
            Subcommand::DeployService {
                name: service,
                unit_file: PathBuf::from(unit_file),
            }
        }
        "wait-tcp" => {
            let [host, port] = exactly::<2>(&name, rest)?;
            Subcommand::WaitTcp {
                host,
                port: port
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("port", port.clone()))?,
                timeout: flags.timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT),
            }
        }
        _ => return Err(ArgsError::UnknownCommand(name)),
    };
    Ok(command)
}

/// The remaining words as one command line.
fn joined(name: &str, rest: Vec<String>) -> Result<String, ArgsError> {
    if rest.is_empty() {
        return Err(ArgsError::MissingArgument(name.to_string()));
    }
    Ok(rest.join(" "))
}

fn exactly<const N: usize>(name: &str, rest: Vec<String>) -> Result<[String; N], ArgsError> {
    match rest.len() {
        n if n < N => Err(ArgsError::MissingArgument(name.to_string())),
        n if n > N => Err(ArgsError::UnexpectedArgument(rest[N].clone())),
        _ => rest
            .try_into()
            .map_err(|_| ArgsError::MissingArgument(name.to_string())),
    }
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-courier {version}
Run local pipelines and remote commands, upload files, manage services

USAGE:
    shell-courier [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    eval <CMDLINE>                      Run a local pipeline (| < > supported)
    ssh [--sudo] <CMD>                  Run a command on the remote host
    scp <LOCAL> <REMOTE>                Install a file on the remote host
        [--owner U] [--group G] [--mode 0644]
    service <ACTION> <NAME>             enable, disable, start, stop or status
    deploy-service <NAME> <UNIT_FILE>   Install, enable and start a systemd unit
    wait-tcp <HOST> <PORT> [--timeout SECS]
                                        Wait for a TCP port to accept connections

OPTIONS:
    -H, --host <HOST>       Remote host
    -p, --port <PORT>       Remote SSH port [default: 22]
    -u, --user <USER>       Remote login user
    -i, --identity <FILE>   Private key file
    -r, --retries <N>       Connection attempts [default: 1]
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELL_COURIER_HOST           Remote host (overrides config)
    SHELL_COURIER_PORT           Remote port (overrides config)
    SHELL_COURIER_USER           Remote user (overrides config)
    SHELL_COURIER_PASSWORD       Login password
    SHELL_COURIER_IDENTITY       Private key file
    SHELL_COURIER_SUDO_PASSWORD  Password for sudo, if not the login password
    SHELL_COURIER_LOG_LEVEL      Log level (overrides config)
    RUST_LOG                     Alternative log level setting

EXAMPLES:
    # Local pipeline
    shell-courier eval "cat access.log | grep 500 > errors.txt"

    # Remote command as root
    shell-courier -H 10.0.0.5 -u deploy -i ~/.ssh/id_ed25519 ssh --sudo -- apt-get update

    # Install a config file
    shell-courier -H 10.0.0.5 -u deploy scp app.conf /etc/app/app.conf --owner app --mode 0640
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-courier {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
    /// A subcommand is missing a required argument.
    MissingArgument(String),
    /// Unknown subcommand.
    UnknownCommand(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
            Self::MissingArgument(command) => {
                write!(f, "missing arguments for '{}'", command)
            }
            Self::UnknownCommand(command) => {
                write!(f, "unknown command: '{}'", command)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("shell-courier")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(result.command.is_none());
    }

    #[test]
    fn test_global_options() {
        let result = parse_args_from(args(&[
            "-H", "10.0.0.5", "-p", "2222", "-u", "deploy", "-i", "/keys/id", "-r", "3",
        ]))
        .unwrap();
        assert_eq!(result.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(result.port, Some(2222));
        assert_eq!(result.user.as_deref(), Some("deploy"));
        assert_eq!(result.identity, Some(PathBuf::from("/keys/id")));
        assert_eq!(result.retries, Some(3));
    }

    #[test]
    fn test_eval_joins_words() {
        let result = parse_args_from(args(&["eval", "echo hello | tr a-z A-Z"])).unwrap();
        assert_eq!(
            result.command,
            Some(Subcommand::Eval {
                command_line: "echo hello | tr a-z A-Z".into()
            })
        );
    }

    #[test]
    fn test_ssh_sudo_after_double_dash() {
        let result =
            parse_args_from(args(&["-H", "web-1", "ssh", "--sudo", "--", "ls", "-la", "/root"]))
                .unwrap();
        assert_eq!(
            result.command,
            Some(Subcommand::Ssh {
                sudo: true,
                command: "ls -la /root".into()
            })
        );
    }

    #[test]
    fn test_scp_flags() {
        let result = parse_args_from(args(&[
            "scp", "app.conf", "/etc/app/app.conf", "--owner", "app", "--mode", "0640",
        ]))
        .unwrap();
        assert_eq!(
            result.command,
            Some(Subcommand::Scp {
                local: PathBuf::from("app.conf"),
                remote: "/etc/app/app.conf".into(),
                owner: "app".into(),
                group: String::new(),
                mode: 0o640,
            })
        );
    }

    #[test]
    fn test_service_actions() {
        let result = parse_args_from(args(&["service", "restart", "nginx"]));
        assert!(result.is_err());

        let result = parse_args_from(args(&["service", "status", "nginx"])).unwrap();
        assert_eq!(
            result.command,
            Some(Subcommand::Service {
                action: ServiceAction::Status,
                name: "nginx".into()
            })
        );
        assert!(result.command.unwrap().is_remote());
    }

    #[test]
    fn test_wait_tcp() {
        let result =
            parse_args_from(args(&["wait-tcp", "db", "5432", "--timeout", "10"])).unwrap();
        let command = result.command.unwrap();
        assert!(!command.is_remote());
        assert_eq!(
            command,
            Subcommand::WaitTcp {
                host: "db".into(),
                port: 5432,
                timeout: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_missing_and_extra_arguments() {
        assert!(matches!(
            parse_args_from(args(&["scp", "only-one"])),
            Err(ArgsError::MissingArgument(_))
        ));
        assert!(matches!(
            parse_args_from(args(&["deploy-service", "app", "app.service", "extra"])),
            Err(ArgsError::UnexpectedArgument(_))
        ));
        assert!(matches!(
            parse_args_from(args(&["ssh"])),
            Err(ArgsError::MissingArgument(_))
        ));
        assert!(matches!(
            parse_args_from(args(&["frobnicate"])),
            Err(ArgsError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_help_flag() {
        let result = parse_args_from(args(&["-h"])).unwrap();
        assert!(result.help);

        let result = parse_args_from(args(&["--help"])).unwrap();
        assert!(result.help);
    }

    #[test]
    fn test_version_flag() {
        let result = parse_args_from(args(&["-V"])).unwrap();
        assert!(result.version);
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse_args_from(args(&["-p", "invalid"])).is_err());
        assert!(parse_args_from(args(&["scp", "a", "/b", "--mode", "999"])).is_err());
        assert!(parse_args_from(args(&["wait-tcp", "db", "port"])).is_err());
    }
}
