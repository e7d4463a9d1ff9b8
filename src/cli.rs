//! Command-line argument structures

use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use exn::ResultExt;
use siphon_storage::{FileId, FileQuery};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "siphon")]
#[command(version)]
#[command(about = "Move files between local directories and S3-compatible object storage", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "SIPHON_CONFIG")]
    pub config: Option<PathBuf>,

    /// More output; repeat for more detail (ignored when RUST_LOG is set)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open and close a source's connection, reporting its status
    Check {
        /// Configured source name
        source: String,
    },

    /// List files in a source
    Ls {
        source: String,

        #[command(flatten)]
        selection: Selection,
    },

    /// Show a single file, or report that it's absent
    Stat {
        source: String,

        /// File id, relative to the source's location
        id: String,
    },

    /// Compare every matching file in one source against another
    Compare {
        from: String,
        to: String,

        #[command(flatten)]
        selection: Selection,
    },

    /// Copy new and updated files from one source into another
    Sync {
        from: String,
        to: String,

        #[command(flatten)]
        selection: Selection,

        /// Also transfer files the destination has a newer version of
        #[arg(short, long)]
        force: bool,

        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,

        /// Move each delivered file under this prefix in the origin
        #[arg(long, value_name = "PREFIX")]
        archive: Option<String>,
    },

    /// Move a file within a source
    #[command(alias = "move")]
    Mv {
        source: String,
        from: String,
        to: String,
    },
}

/// Which files a command works on.
#[derive(Args, Debug, Default)]
pub struct Selection {
    /// Regular expression the whole file name must match
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,
}
impl Selection {
    pub fn query(&self) -> Result<FileQuery> {
        let query = FileQuery::all().recursive(self.recursive);
        match &self.pattern {
            Some(pattern) => query.pattern(pattern).or_raise(|| ErrorKind::Argument(format!("--pattern {pattern}"))),
            None => Ok(query),
        }
    }
}

/// Parse a file id given on the command line.
pub fn file_id(raw: &str) -> Result<FileId> {
    FileId::parse(raw).or_raise(|| ErrorKind::Argument(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync() {
        let cli = Cli::try_parse_from([
            "siphon", "-vv", "sync", "outbox", "archive", "-p", r".*\.csv", "-r", "--dry-run", "--archive", "done",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Sync { from, to, selection, force, dry_run, archive } = cli.command else {
            panic!("expected the sync command");
        };
        assert_eq!((from.as_str(), to.as_str()), ("outbox", "archive"));
        assert!(selection.recursive && dry_run && !force);
        assert_eq!(archive.as_deref(), Some("done"));
        let query = selection.query().unwrap();
        assert!(query.is_recursive());
        assert!(query.matches_name("a.csv"));
        assert!(!query.matches_name("a.csv.bak"));
    }

    #[test]
    fn test_invalid_pattern() {
        let selection = Selection { pattern: Some("(".to_string()), recursive: false };
        let err = selection.query().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Argument(_)));
    }

    #[rstest]
    #[case("a/b.csv", true)]
    #[case("./a//b.csv", true)]
    #[case("../escape", false)]
    #[case("", false)]
    fn test_file_id(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(file_id(raw).is_ok(), valid);
    }
}
