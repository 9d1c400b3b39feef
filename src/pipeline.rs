use crate::{
    compiler::{Bytecode, CompileError, Compiler},
    flatten,
    lexer::LexError,
    parser::{ParseError, Parser},
    symbol_table::SymbolTable,
    value::{Constant, Value},
    vm::{RuntimeError, VirtualMachine, VmConfig, GLOBALS_SIZE},
    Program,
};
use std::fmt::{self, Display, Formatter};
use tracing::debug;

/// An error from one stage of the pipeline. Later stages never run once an
/// earlier one has failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Lex(Vec<LexError>),
    Parse(Vec<ParseError>),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Lex(errors) => write!(f, "lexer errors:\n\t{}", flatten(errors, "\n\t")),
            Self::Parse(errors) => write!(f, "parser errors:\n\t{}", flatten(errors, "\n\t")),
            Self::Compile(error) => write!(f, "compile error: {}", error),
            Self::Runtime(error) => write!(f, "runtime error: {}", error),
        }
    }
}

impl std::error::Error for Error {}

impl From<CompileError> for Error {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<RuntimeError> for Error {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(error)
    }
}

pub fn parse(source: &str) -> Result<Program, Error> {
    let mut parser = Parser::from_source(source);
    let program = parser.parse_program();
    if !parser.lexer_errors().is_empty() {
        return Err(Error::Lex(parser.lexer_errors().to_vec()));
    }
    if !parser.errors().is_empty() {
        return Err(Error::Parse(parser.errors().to_vec()));
    }
    debug!(statements = program.statements.len(), "parsed program");
    Ok(program)
}

pub fn compile(program: &Program) -> Result<Bytecode, Error> {
    Ok(Compiler::new().compile(program)?)
}

pub fn evaluate(source: &str) -> Result<Value, Error> {
    evaluate_with(source, VmConfig::default())
}

pub fn evaluate_with(source: &str, config: VmConfig) -> Result<Value, Error> {
    let bytecode = compile(&parse(source)?)?;
    Ok(VirtualMachine::with_config(bytecode, config).run()?)
}

/// Evaluates successive inputs against shared globals, as the REPL does.
/// An input that fails to compile leaves the session untouched.
pub struct Session {
    symbols: SymbolTable,
    constants: Vec<Constant>,
    globals: Vec<Value>,
    config: VmConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Session {
    pub fn new(config: VmConfig) -> Self {
        Self {
            symbols: SymbolTable::new(),
            constants: Vec::new(),
            globals: vec![Value::Null; GLOBALS_SIZE],
            config,
        }
    }

    pub fn eval(&mut self, source: &str) -> Result<Value, Error> {
        let program = parse(source)?;
        let mut compiler = Compiler::new_with_state(self.symbols.clone(), self.constants.clone());
        let bytecode = compiler.compile(&program)?;
        let (symbols, constants) = compiler.into_state();
        self.symbols = symbols;
        self.constants = constants;

        let globals = std::mem::take(&mut self.globals);
        let mut vm = VirtualMachine::new_with_globals(bytecode, globals, self.config);
        let result = vm.run();
        self.globals = vm.into_globals();
        Ok(result?)
    }
}
