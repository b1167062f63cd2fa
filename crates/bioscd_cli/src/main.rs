use clap::{CommandFactory, Parser};

use crate::cli::{Cli, DecompileCommand, DecompileModeCli, RevisionCli, ScriptKindCli, TopLevel};

mod cli;

fn revision(r: RevisionCli) -> bioscd_lib::Revision {
    match r {
        RevisionCli::Bio1 => bioscd_lib::Revision::Bio1,
        RevisionCli::Bio2 => bioscd_lib::Revision::Bio2,
        RevisionCli::Bio3 => bioscd_lib::Revision::Bio3,
        RevisionCli::Biocv => bioscd_lib::Revision::BioCv,
    }
}

fn main() {
    let cli = Cli::parse();

    // covers bioscd_lib too; RUST_LOG overrides -v
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("bioscd", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                revision: rev,
                kind,
                mode,
                base_offset,
                skip,
                length,
            } => {
                let kind = match kind {
                    ScriptKindCli::Init => bioscd_lib::ScriptKind::Init,
                    ScriptKindCli::Main => bioscd_lib::ScriptKind::Main,
                    ScriptKindCli::Event => bioscd_lib::ScriptKind::Event,
                };
                let mode = match mode {
                    DecompileModeCli::Structured => bioscd_lib::DecompileMode::Structured,
                    DecompileModeCli::Assembly => bioscd_lib::DecompileMode::Assembly,
                };
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        eprintln!("failed to read {path:?}: {e}");
                        std::process::exit(1);
                    }
                };
                log::debug!("read {} bytes from {path:?}", bytes.len());
                let options = bioscd_lib::DecompileOptions {
                    revision: revision(rev),
                    kind,
                    mode,
                    base_offset: base_offset.unwrap_or(skip),
                };
                let result = bioscd_lib::script_slice(&bytes, skip, length)
                    .and_then(|script| bioscd_lib::decompile_with_options(script, options));
                match result {
                    Ok(out) => {
                        print!("{out}");
                    }
                    Err(e) => {
                        eprintln!("decompile error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Symbols { revision: rev, name }) => {
            let isa = bioscd_lib::instruction_set(revision(rev));
            let constants = isa.constants();
            match name {
                Some(name) => match constants.resolve_name(&name) {
                    Some(value) => println!("{name} = 0x{value:02X}"),
                    None => {
                        eprintln!("no {} constant named {name}", isa.revision());
                        std::process::exit(1);
                    }
                },
                None => {
                    for sym in constants.entries() {
                        println!("{:<10} 0x{:02X} {}", sym.class.name(), sym.value, sym.name);
                    }
                }
            }
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("{e}");
            }
        }
    }
}
