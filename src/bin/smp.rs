//! smp - Strategic Merge Patch CLI tool
//!
//! A command line tool for diffing, patching, and reconciling JSON
//! documents with strategic merge semantics.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use kube_client_core::strategicpatch::{
    create_three_way_merge_patch, create_two_way_merge_patch, strategic_merge_patch,
    SchemaDescriptor,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    eprintln!(
        r#"smp {} - Strategic Merge Patch CLI tool

USAGE:
    smp [OPTIONS] <COMMAND>

OPTIONS:
    -s, --schema <FILE>      Path to a patch-metadata descriptor file (JSON)
    -o, --output <FILE>      Output location. Use '-' for stdout (default: -)
    -h, --help               Print help information
    -V, --version            Print version information

COMMANDS:
    diff --original <FILE> --modified <FILE>
                             Create a two-way merge patch
    apply --original <FILE> --patch <FILE>
                             Apply a strategic merge patch
    three-way --original <FILE> --modified <FILE> --current <FILE> [--overwrite]
                             Create a three-way merge patch, detecting
                             conflicts with the current state unless
                             --overwrite is given
"#,
        VERSION
    );
}

fn print_version() {
    println!("smp {}", VERSION);
}

#[derive(Debug)]
struct Cli {
    schema: Option<PathBuf>,
    output: Option<PathBuf>,
    command: Command,
}

#[derive(Debug)]
enum Command {
    Diff {
        original: PathBuf,
        modified: PathBuf,
    },
    Apply {
        original: PathBuf,
        patch: PathBuf,
    },
    ThreeWay {
        original: PathBuf,
        modified: PathBuf,
        current: PathBuf,
        overwrite: bool,
    },
}

fn parse_args() -> Result<Option<Cli>, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut schema = None;
    let mut output = None;
    let mut command_name: Option<String> = None;
    let mut original = None;
    let mut modified = None;
    let mut current = None;
    let mut patch = None;
    let mut overwrite = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-V" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-s" | "--schema" => {
                let value = iter.next().ok_or("--schema requires a value")?;
                schema = Some(PathBuf::from(value));
            }
            "-o" | "--output" => {
                let value = iter.next().ok_or("--output requires a value")?;
                if value != "-" {
                    output = Some(PathBuf::from(value));
                }
            }
            "--original" => {
                let value = iter.next().ok_or("--original requires a value")?;
                original = Some(PathBuf::from(value));
            }
            "--modified" => {
                let value = iter.next().ok_or("--modified requires a value")?;
                modified = Some(PathBuf::from(value));
            }
            "--current" => {
                let value = iter.next().ok_or("--current requires a value")?;
                current = Some(PathBuf::from(value));
            }
            "--patch" => {
                let value = iter.next().ok_or("--patch requires a value")?;
                patch = Some(PathBuf::from(value));
            }
            "--overwrite" => overwrite = true,
            name if command_name.is_none() && !name.starts_with('-') => {
                command_name = Some(name.to_string());
            }
            unknown => return Err(format!("unknown argument: {}", unknown)),
        }
    }

    let command = match command_name.as_deref() {
        Some("diff") => Command::Diff {
            original: original.ok_or("diff requires --original")?,
            modified: modified.ok_or("diff requires --modified")?,
        },
        Some("apply") => Command::Apply {
            original: original.ok_or("apply requires --original")?,
            patch: patch.ok_or("apply requires --patch")?,
        },
        Some("three-way") => Command::ThreeWay {
            original: original.ok_or("three-way requires --original")?,
            modified: modified.ok_or("three-way requires --modified")?,
            current: current.ok_or("three-way requires --current")?,
            overwrite,
        },
        Some(unknown) => return Err(format!("unknown command: {}", unknown)),
        None => return Err("no command given; see --help".to_string()),
    };

    Ok(Some(Cli {
        schema,
        output,
        command,
    }))
}

fn load_schema(path: Option<&PathBuf>) -> Result<SchemaDescriptor, String> {
    match path {
        Some(path) => {
            let data = fs::read(path)
                .map_err(|err| format!("cannot read {}: {}", path.display(), err))?;
            serde_json::from_slice(&data)
                .map_err(|err| format!("cannot parse {}: {}", path.display(), err))
        }
        None => Ok(SchemaDescriptor::default()),
    }
}

fn read_document(path: &PathBuf) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|err| format!("cannot read {}: {}", path.display(), err))
}

fn write_output(output: Option<&PathBuf>, data: &[u8]) -> Result<(), String> {
    match output {
        Some(path) => fs::write(path, data)
            .map_err(|err| format!("cannot write {}: {}", path.display(), err)),
        None => {
            let mut stdout = io::stdout();
            stdout
                .write_all(data)
                .and_then(|_| stdout.write_all(b"\n"))
                .map_err(|err| format!("cannot write to stdout: {}", err))
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let schema = load_schema(cli.schema.as_ref())?;

    let result = match &cli.command {
        Command::Diff { original, modified } => {
            let original = read_document(original)?;
            let modified = read_document(modified)?;
            create_two_way_merge_patch(&original, &modified, &schema, &[])
                .map_err(|err| err.to_string())?
        }
        Command::Apply { original, patch } => {
            let original = read_document(original)?;
            let patch = read_document(patch)?;
            strategic_merge_patch(&original, &patch, &schema).map_err(|err| err.to_string())?
        }
        Command::ThreeWay {
            original,
            modified,
            current,
            overwrite,
        } => {
            let original = read_document(original)?;
            let modified = read_document(modified)?;
            let current = read_document(current)?;
            create_three_way_merge_patch(&original, &modified, &current, &schema, *overwrite, &[])
                .map_err(|err| err.to_string())?
        }
    };

    write_output(cli.output.as_ref(), &result)
}

fn main() -> ExitCode {
    match parse_args() {
        Ok(Some(cli)) => match run(cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("smp: {}", err);
                ExitCode::FAILURE
            }
        },
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("smp: {}", err);
            print_help();
            ExitCode::FAILURE
        }
    }
}
