use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RevisionCli {
    Bio1,
    Bio2,
    Bio3,
    Biocv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScriptKindCli {
    Init,
    Main,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Structured,
    Assembly,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log decoding decisions to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles an SCD script
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Lists the symbol table of a revision, or looks up one name
    Symbols {
        #[arg(long, value_enum, default_value_t = RevisionCli::Bio2)]
        revision: RevisionCli,

        /// Constant name to resolve to its value
        name: Option<String>,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a script stored in a file
    File {
        /// Path to the file holding the script
        path: PathBuf,

        /// Instruction set revision
        #[arg(long, value_enum, default_value_t = RevisionCli::Bio2)]
        revision: RevisionCli,

        /// Script kind, which selects framing and procedure names
        #[arg(long, value_enum, default_value_t = ScriptKindCli::Main)]
        kind: ScriptKindCli,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Structured)]
        mode: DecompileModeCli,

        /// Offset reported for the first script byte (defaults to --skip)
        #[arg(long, value_parser = parse_number)]
        base_offset: Option<usize>,

        /// Bytes to skip before the script starts
        #[arg(long, value_parser = parse_number, default_value = "0")]
        skip: usize,

        /// Script length in bytes (default: rest of the file)
        #[arg(long, value_parser = parse_number)]
        length: Option<usize>,
    },
}

/// Accepts decimal or `0x` prefixed hexadecimal.
fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn numbers_accept_hex() {
        assert_eq!(parse_number("16"), Ok(16));
        assert_eq!(parse_number("0x1A0"), Ok(0x1a0));
        assert!(parse_number("0xzz").is_err());
    }

    #[test]
    fn command_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_decompile_file() {
        let cli = Cli::try_parse_from([
            "bioscd", "-v", "decompile", "file", "room.rdt", "--revision", "biocv", "--kind", "init", "--mode",
            "assembly", "--skip", "0x40", "--length", "32",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(TopLevel::Decompile {
                command: DecompileCommand::File { revision, kind, mode, skip, length, base_offset, .. },
            }) => {
                assert_eq!(revision, RevisionCli::Biocv);
                assert_eq!(kind, ScriptKindCli::Init);
                assert_eq!(mode, DecompileModeCli::Assembly);
                assert_eq!(skip, 0x40);
                assert_eq!(length, Some(32));
                assert_eq!(base_offset, None);
            }
            _ => panic!("expected decompile file"),
        }
    }
}
