use std::{
    error::Error,
    fs::File,
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
};

use clap::{Parser as ClapParser, ValueEnum};

use kc::{
    driver::{Emit, Session},
    lexer::Lexer,
    objcode::{FileType, ObjCodeWriter},
    parser::Parser,
};

#[derive(ClapParser)]
#[command(version, about = "Compiler and JIT for the K language")]
struct Cli {
    /// Input files; reads standard input when empty
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// What to do with the generated IR
    #[arg(long, value_enum, default_value_t = EmitArg::Jit)]
    emit: EmitArg,

    /// Run the optimization pipeline before emission
    #[arg(short = 'O', long)]
    optimize: bool,

    /// Report each parsed top-level construct
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EmitArg {
    /// Evaluate top-level expressions as they appear
    Jit,
    /// Write an object file per input
    Obj,
    /// Write the IR listing per input
    Asm,
}

impl From<EmitArg> for Emit {
    fn from(arg: EmitArg) -> Emit {
        match arg {
            EmitArg::Jit => Emit::Jit,
            EmitArg::Obj => Emit::Object,
            EmitArg::Asm => Emit::Assembly,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.files.is_empty() {
        let stdin = io::stdin();
        compile(cli, stdin.lock(), None)?;
        return Ok(());
    }

    for path in &cli.files {
        let file = File::open(path)?;
        compile(cli, BufReader::new(file), Some(path))?;
    }
    Ok(())
}

/// Runs one input through a session and emits per `--emit`. All
/// diagnostics and prompts go to standard error; only object and
/// assembly bytes reach files or standard output.
fn compile(cli: &Cli, input: impl io::BufRead, path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let module_name = match path {
        Some(path) => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        None => String::new(),
    };
    let interactive = path.is_none();

    let mut parser = Parser::new(Lexer::new(input));
    let mut session = Session::new(cli.emit.into(), cli.optimize, cli.verbose, module_name);
    let mut stderr = io::stderr();

    session.run(&mut parser, &mut stderr, interactive)?;
    let module = session.finish(&mut stderr)?;

    match cli.emit {
        EmitArg::Jit => {}
        EmitArg::Obj => {
            let out = output_path(path, "o");
            ObjCodeWriter::host().write_module_to_file(&out, &module, FileType::Object)?;
            eprintln!("Wrote {}", out.display());
        }
        EmitArg::Asm => match path {
            Some(_) => {
                let out = output_path(path, "s");
                ObjCodeWriter::host().write_module_to_file(&out, &module, FileType::Assembly)?;
                eprintln!("Wrote {}", out.display());
            }
            None => {
                write!(io::stdout(), "{module}")?;
            }
        },
    }
    Ok(())
}

fn output_path(path: Option<&Path>, extension: &str) -> PathBuf {
    match path {
        Some(path) => path.with_extension(extension),
        None => PathBuf::from("out").with_extension(extension),
    }
}
