//! Command-line definition.

use clap::{Args, Parser, Subcommand, ValueEnum};
use fsdock_core::files::sort::{ListingOptions, SortMode};
use fsdock_core::files::{FileParams, LineBreak};
use fsdock_core::server::{AuthMethod, Scheme, ServerConfig};

const ENVIRONMENT_HELP: &str = "\
<BACKEND> is \"local\", \"root\" or the uuid of a stored server.

Environment:
  FSDOCK_SECRET      Password or key passphrase for remote servers
  FSDOCK_CONFIG_DIR  Configuration directory
  RUST_LOG           Log filter (default: warn)";

/// Browse and edit local, privileged and remote filesystems.
#[derive(Debug, Parser)]
#[command(name = "fsdock", version, arg_required_else_help = true, after_help = ENVIRONMENT_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a directory (the backend's start directory by default)
    #[command(name = "ls")]
    List {
        backend: String,
        path: Option<String>,
        #[command(flatten)]
        listing: ListingArgs,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a text file
    Cat {
        backend: String,
        path: String,
        #[command(flatten)]
        text: TextArgs,
    },
    /// Replace a text file with standard input
    Write {
        backend: String,
        path: String,
        #[command(flatten)]
        text: TextArgs,
    },
    /// Create a directory
    Mkdir { backend: String, path: String },
    /// Create an empty file
    Touch { backend: String, path: String },
    /// Delete a file or directory tree
    #[command(name = "rm")]
    Remove { backend: String, path: String },
    /// Rename within the parent directory
    Rename {
        backend: String,
        path: String,
        new_name: String,
    },
    /// Copy into a directory
    #[command(name = "cp")]
    Copy {
        backend: String,
        source: String,
        destination: String,
    },
    /// Move into a directory
    #[command(name = "mv")]
    Move {
        backend: String,
        source: String,
        destination: String,
    },
    /// Pack sources into a .tar.gz archive
    #[command(name = "tar")]
    Compress {
        backend: String,
        archive: String,
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Unpack a .tar.gz archive into a directory
    #[command(name = "untar")]
    Extract {
        backend: String,
        archive: String,
        destination: String,
    },
    /// Check that a backend is reachable and accepts the credentials
    Ping { backend: String },
    /// List stored servers
    Servers {
        #[arg(long)]
        json: bool,
    },
    /// Store a server and print its uuid
    AddServer(AddServerArgs),
    /// Forget a stored server
    RemoveServer { uuid: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Name,
    Size,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LineBreakArg {
    Lf,
    Crlf,
    Cr,
}

#[derive(Debug, Args)]
pub struct ListingArgs {
    /// Include dotfiles
    #[arg(short = 'a', long = "all")]
    all: bool,
    #[arg(long, value_enum, default_value_t = SortArg::Name)]
    sort: SortArg,
    /// Mix directories in with files
    #[arg(long)]
    no_folders_first: bool,
}

impl ListingArgs {
    pub fn options(&self) -> ListingOptions {
        ListingOptions {
            sort_mode: match self.sort {
                SortArg::Name => SortMode::Name,
                SortArg::Size => SortMode::Size,
                SortArg::Date => SortMode::Date,
            },
            folders_first: !self.no_folders_first,
            show_hidden: self.all,
        }
    }
}

#[derive(Debug, Args)]
pub struct TextArgs {
    /// Character set label, e.g. windows-1251
    #[arg(long)]
    charset: Option<String>,
    #[arg(long, value_enum)]
    linebreak: Option<LineBreakArg>,
}

impl TextArgs {
    pub fn params(&self) -> FileParams {
        let mut params = FileParams::default();
        if let Some(charset) = &self.charset {
            params.charset = charset.clone();
        }
        if let Some(linebreak) = self.linebreak {
            params.linebreak = match linebreak {
                LineBreakArg::Lf => LineBreak::Lf,
                LineBreakArg::Crlf => LineBreak::CrLf,
                LineBreakArg::Cr => LineBreak::Cr,
            };
        }
        params
    }
}

#[derive(Debug, Args)]
pub struct AddServerArgs {
    /// ftp, ftps, ftpes or sftp
    scheme: Scheme,
    name: String,
    address: String,
    username: String,
    /// Defaults to the scheme's well-known port
    #[arg(long)]
    port: Option<u16>,
    /// Directory to open first
    #[arg(long)]
    dir: Option<String>,
    /// Private key file; switches to key authentication
    #[arg(long)]
    key: Option<String>,
}

impl AddServerArgs {
    pub fn into_config(self) -> ServerConfig {
        let mut server = ServerConfig::new(self.scheme, &self.name, &self.address, &self.username);
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(dir) = self.dir {
            server.initial_dir = dir;
        }
        if let Some(key) = self.key {
            server.auth_method = AuthMethod::Key;
            server.key_id = Some(key);
        }
        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(line: &str) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("fsdock").chain(line.split_whitespace()))
            .map(|cli| cli.command)
    }

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn list_with_options() {
        let Command::List {
            backend,
            path,
            listing,
            json,
        } = parse("ls local /tmp -a --sort size --json").unwrap()
        else {
            panic!("expected ls");
        };
        assert_eq!(backend, "local");
        assert_eq!(path.as_deref(), Some("/tmp"));
        assert!(json);
        assert_eq!(
            listing.options(),
            ListingOptions {
                sort_mode: SortMode::Size,
                folders_first: true,
                show_hidden: true,
            }
        );
    }

    #[test]
    fn list_defaults_hide_dotfiles() {
        match parse("ls root").unwrap() {
            Command::List { path, listing, .. } => {
                assert!(path.is_none());
                assert!(!listing.options().show_hidden);
                assert_eq!(listing.options().sort_mode, SortMode::Name);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cat_charset_and_linebreak() {
        match parse("cat local /a.txt --charset windows-1251 --linebreak crlf").unwrap() {
            Command::Cat { text, .. } => {
                assert_eq!(text.params(), FileParams::new("windows-1251", LineBreak::CrLf));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            parse("cat local /a --linebreak dos").unwrap_err().kind(),
            ErrorKind::InvalidValue
        );
    }

    #[test]
    fn add_server_with_key() {
        let Command::AddServer(args) =
            parse("add-server sftp build 10.0.0.5 ci --port 2200 --key ~/.ssh/ci").unwrap()
        else {
            panic!("expected add-server");
        };
        let server = args.into_config();
        assert_eq!(server.scheme, Scheme::Sftp);
        assert_eq!(server.port, 2200);
        assert_eq!(server.auth_method, AuthMethod::Key);
        assert_eq!(server.key_id.as_deref(), Some("~/.ssh/ci"));
    }

    #[test]
    fn add_server_rejects_unknown_scheme() {
        assert_eq!(
            parse("add-server gopher a b c").unwrap_err().kind(),
            ErrorKind::ValueValidation
        );
    }

    #[test]
    fn tar_needs_sources() {
        assert_eq!(
            parse("tar local /out.tar.gz").unwrap_err().kind(),
            ErrorKind::MissingRequiredArgument
        );
        match parse("tar local /out.tar.gz /a /b").unwrap() {
            Command::Compress { sources, .. } => assert_eq!(sources, vec!["/a", "/b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn leftovers_are_rejected() {
        assert_eq!(
            parse("rm local /a /b").unwrap_err().kind(),
            ErrorKind::UnknownArgument
        );
        assert_eq!(
            parse("rm local /a --force").unwrap_err().kind(),
            ErrorKind::UnknownArgument
        );
        assert_eq!(
            parse("frobnicate").unwrap_err().kind(),
            ErrorKind::InvalidSubcommand
        );
    }

    #[test]
    fn help_and_version_are_not_usage_errors() {
        let help = parse("--help").unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        assert!(!help.use_stderr());
        assert_eq!(parse("--version").unwrap_err().kind(), ErrorKind::DisplayVersion);
        assert!(parse("").unwrap_err().use_stderr());
    }
}
