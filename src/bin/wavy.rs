use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use wavy::{
    loader, logging, pipeline, Bytecode, Lexer, Program, Value, VirtualMachine, VmConfig,
    DEFAULT_MAX_STEPS,
};

#[derive(Parser)]
#[command(name = "wavy")]
#[command(about = "The Wavy programming language")]
struct Cli {
    file: PathBuf,

    /// Write tokens, the parsed program, bytecode and the result to `<file>.out`
    #[arg(long)]
    dump: bool,

    /// Abort after executing this many instructions
    #[arg(long, env = "WAVY_MAX_STEPS", default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u64,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose).map_err(|error| anyhow!(error))?;

    let program = loader::load_program(&cli.file)?;
    let bytecode = pipeline::compile(&program).context("Compiler error")?;

    let config = VmConfig {
        max_steps: Some(cli.max_steps),
        ..VmConfig::default()
    };
    let mut vm = VirtualMachine::with_config(bytecode.clone(), config);
    let result = vm.run();

    if cli.dump {
        let path = dump_path(&cli.file);
        let dump = render_dump(&cli, &program, &bytecode, &vm.exports, &result)?;
        fs::write(&path, dump).with_context(|| format!("Failed to write dump: {}", path.display()))?;
    }

    let value = result.context("Runtime error")?;
    for (destination, value) in vm.exports.iter() {
        println!("{} = {}", destination, value);
    }
    if value != Value::Null {
        println!("{}", value);
    }
    Ok(())
}

fn dump_path(file: &Path) -> PathBuf {
    let mut path = file.as_os_str().to_owned();
    path.push(".out");
    PathBuf::from(path)
}

fn render_dump(
    cli: &Cli,
    program: &Program,
    bytecode: &Bytecode,
    exports: &[(String, Value)],
    result: &Result<Value, wavy::RuntimeError>,
) -> Result<String> {
    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read file: {}", cli.file.display()))?;
    let tokens = Lexer::new(&source).tokenize();

    let mut out = String::new();
    writeln!(out, "== tokens ==")?;
    for token in tokens.iter() {
        writeln!(out, "{}:{} {}", token.line, token.column, token)?;
    }
    writeln!(out, "\n== program ==\n{}", program)?;
    writeln!(out, "\n== bytecode ==\n{}", bytecode.disassemble())?;
    writeln!(out, "\n== exports ==")?;
    for (destination, value) in exports {
        writeln!(out, "{} = {}", destination, value)?;
    }
    match result {
        Ok(value) => writeln!(out, "\n== result ==\n{}", value)?,
        Err(error) => writeln!(out, "\n== result ==\nruntime error: {}", error)?,
    }
    Ok(out)
}
