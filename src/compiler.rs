use crate::{
    code::{Instruction, Instructions, Opcode},
    symbol_table::{Symbol, SymbolScope, SymbolTable},
    value::{CompiledFunction, Constant},
    Assignment, Block, Expression, Foreach, Function, Identifier, Literal, Operator, Position,
    Program, Statement,
};
use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    mem,
    sync::Arc,
};
use tracing::{debug, trace};

const MAX_WIDE_OPERAND: usize = u16::MAX as usize;
const MAX_NARROW_OPERAND: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    UnresolvedIdentifier { name: String, line: usize, column: usize },
    DuplicateParameter { name: String, line: usize, column: usize },
    UnresolvedLoad { path: String, line: usize, column: usize },
    UnsupportedOperator(Operator),
    TooManyConstants,
    TooManyGlobals,
    TooManyLocals,
    TooManyArguments,
    TooManyElements,
    TooManyFreeVariables,
    JumpOutOfRange,
}

impl CompileError {
    fn at(position: Position, build: impl FnOnce(usize, usize) -> Self) -> Self {
        build(position.line, position.column)
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UnresolvedIdentifier { name, line, column } => {
                write!(f, "{}:{}: identifier not found: {}", line, column, name)
            }
            Self::DuplicateParameter { name, line, column } => {
                write!(f, "{}:{}: duplicate parameter: {}", line, column, name)
            }
            Self::UnresolvedLoad { path, line, column } => {
                write!(f, "{}:{}: load of {:?} was not resolved", line, column, path)
            }
            Self::UnsupportedOperator(operator) => write!(f, "unsupported operator: {}", operator),
            Self::TooManyConstants => write!(f, "too many constants (max {})", MAX_WIDE_OPERAND + 1),
            Self::TooManyGlobals => write!(f, "too many globals (max {})", MAX_WIDE_OPERAND + 1),
            Self::TooManyLocals => write!(f, "too many locals (max {})", MAX_NARROW_OPERAND + 1),
            Self::TooManyArguments => write!(f, "too many arguments (max {})", MAX_NARROW_OPERAND),
            Self::TooManyElements => write!(f, "too many array elements (max {})", MAX_WIDE_OPERAND),
            Self::TooManyFreeVariables => {
                write!(f, "too many captured variables (max {})", MAX_NARROW_OPERAND)
            }
            Self::JumpOutOfRange => write!(f, "jump target out of range (max {})", MAX_WIDE_OPERAND),
        }
    }
}

impl std::error::Error for CompileError {}

type Result<T, E = CompileError> = std::result::Result<T, E>;

/// Compiler output. The constant pool is immutable, so a `Bytecode` can be
/// cloned cheaply and run by several VMs at once.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Arc<[Constant]>,
}

impl Bytecode {
    pub fn disassemble(&self) -> String {
        let mut sections = vec![self.instructions.to_string()];
        for (index, constant) in self.constants.iter().enumerate() {
            if let Constant::Function(function) = constant {
                sections.push(format!("\nconstant {}: {}\n{}", index, constant, function.instructions));
            }
        }
        sections.join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

/// Position of a forward jump whose target is not known yet.
#[must_use]
struct Fixup(usize);

pub struct Compiler {
    constants: Vec<Constant>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing: Vec<CompilationScope>,
    hidden_symbols: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::new_with_state(SymbolTable::new(), Vec::new())
    }

    /// Continues from the globals and constants of an earlier compilation.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Constant>) -> Self {
        Self {
            constants,
            symbol_table,
            scope: CompilationScope::default(),
            enclosing: Vec::new(),
            hidden_symbols: 0,
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Constant>) {
        (self.symbol_table, self.constants)
    }

    pub fn compile(&mut self, program: &Program) -> Result<Bytecode> {
        for statement in program.statements.iter() {
            self.compile_statement(statement)?;
        }
        let bytecode = self.bytecode();
        debug!(
            bytes = bytecode.instructions.len(),
            constants = bytecode.constants.len(),
            globals = self.symbol_table.num_definitions,
            "compiled program"
        );
        Ok(bytecode)
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: Instructions(self.scope.instructions.clone()),
            constants: Arc::from(self.constants.as_slice()),
        }
    }

    fn add_constant(&mut self, constant: Constant) -> Result<usize> {
        if self.constants.len() > MAX_WIDE_OPERAND {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(constant);
        Ok(self.constants.len() - 1)
    }

    fn emit(&mut self, opcode: Opcode, operands: Vec<usize>) -> usize {
        let position = self.scope.instructions.len();
        let bytes = Instruction::new(opcode, operands).as_bytes();
        self.scope.instructions.extend_from_slice(&bytes);
        self.scope.previous = self.scope.last;
        self.scope.last = Some(EmittedInstruction { opcode, position });
        position
    }

    fn emit_jump(&mut self, opcode: Opcode) -> Fixup {
        Fixup(self.emit(opcode, vec![0]))
    }

    fn patch_jump(&mut self, fixup: Fixup) -> Result<()> {
        let target = self.jump_target()?;
        let bytes = (target as u16).to_be_bytes();
        self.scope.instructions[fixup.0 + 1..fixup.0 + 3].copy_from_slice(&bytes);
        Ok(())
    }

    fn emit_jump_back(&mut self, target: usize) -> Result<()> {
        if target > MAX_WIDE_OPERAND {
            return Err(CompileError::JumpOutOfRange);
        }
        self.emit(Opcode::Jump, vec![target]);
        Ok(())
    }

    fn jump_target(&self) -> Result<usize> {
        let target = self.scope.instructions.len();
        if target > MAX_WIDE_OPERAND {
            return Err(CompileError::JumpOutOfRange);
        }
        Ok(target)
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        matches!(self.scope.last, Some(last) if last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.scope.last {
            self.scope.instructions.truncate(last.position);
            self.scope.last = self.scope.previous;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = self.scope.last.as_mut() {
            self.scope.instructions[last.position] = Opcode::ReturnValue as u8;
            last.opcode = Opcode::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        self.enclosing.push(mem::take(&mut self.scope));
        let outer = mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> (Vec<u8>, SymbolTable) {
        let scope = mem::replace(&mut self.scope, self.enclosing.pop().unwrap_or_default());
        let outer = self.symbol_table.outer.take().map(|outer| *outer).unwrap_or_default();
        let table = mem::replace(&mut self.symbol_table, outer);
        (scope.instructions, table)
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, vec![]);
            }
            Statement::Assignment(assignment) => {
                self.compile_expression(&assignment.value)?;
                let symbol = self.define_for_write(&assignment.target)?;
                self.store_symbol(&symbol);
            }
            Statement::Return(Some(value)) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, vec![]);
            }
            Statement::Return(None) => {
                self.emit(Opcode::Return, vec![]);
            }
            Statement::Load(path, position) => {
                return Err(CompileError::at(*position, |line, column| {
                    CompileError::UnresolvedLoad {
                        path: path.clone(),
                        line,
                        column,
                    }
                }))
            }
            Statement::Export(name, destination) => {
                let symbol = self.resolve(name)?;
                self.load_symbol(&symbol);
                let index = self.add_constant(Constant::String(Arc::from(destination.as_str())))?;
                self.emit(Opcode::Export, vec![index]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        for statement in block.0.iter() {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// Compiles a block that produces a value: its last expression statement,
    /// or null.
    fn compile_block_value(&mut self, block: &Block) -> Result<()> {
        let start = self.scope.instructions.len();
        self.compile_block(block)?;
        let ends_in_own_pop = matches!(
            self.scope.last,
            Some(last) if last.opcode == Opcode::Pop && last.position >= start
        );
        if ends_in_own_pop {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, vec![]);
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::Identifier(identifier) => {
                let symbol = self.resolve(identifier)?;
                self.load_symbol(&symbol);
            }
            Expression::Literal(literal) => self.compile_literal(literal)?,
            Expression::Array(elements) => {
                if elements.len() > MAX_WIDE_OPERAND {
                    return Err(CompileError::TooManyElements);
                }
                for element in elements.iter() {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, vec![elements.len()]);
            }
            Expression::Function(function) => self.compile_function(function)?,
            Expression::Prefix(operator, operand) => {
                self.compile_expression(operand)?;
                let opcode = match operator {
                    Operator::Not => Opcode::Bang,
                    Operator::Negate => Opcode::Minus,
                    _ => return Err(CompileError::UnsupportedOperator(*operator)),
                };
                self.emit(opcode, vec![]);
            }
            Expression::Infix(left, operator, right) => {
                self.compile_infix(left, *operator, right)?
            }
            Expression::Index(collection, index) => {
                self.compile_expression(collection)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, vec![]);
            }
            Expression::Call(callee, arguments) => {
                if arguments.len() > MAX_NARROW_OPERAND {
                    return Err(CompileError::TooManyArguments);
                }
                self.compile_expression(callee)?;
                for argument in arguments.iter() {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, vec![arguments.len()]);
            }
            Expression::If(condition, consequence, alternative) => {
                self.compile_expression(condition)?;
                let skip_consequence = self.emit_jump(Opcode::JumpNotTruthy);
                self.compile_block_value(consequence)?;
                let skip_alternative = self.emit_jump(Opcode::Jump);
                self.patch_jump(skip_consequence)?;
                match alternative {
                    Some(alternative) => self.compile_block_value(alternative)?,
                    None => {
                        self.emit(Opcode::Null, vec![]);
                    }
                }
                self.patch_jump(skip_alternative)?;
            }
            Expression::For(condition, body) => {
                let start = self.jump_target()?;
                self.compile_expression(condition)?;
                let exit = self.emit_jump(Opcode::JumpNotTruthy);
                self.compile_block(body)?;
                self.emit_jump_back(start)?;
                self.patch_jump(exit)?;
                self.emit(Opcode::Null, vec![]);
            }
            Expression::Foreach(foreach) => self.compile_foreach(foreach)?,
            Expression::Assign(assignment) => self.compile_assign(assignment)?,
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) -> Result<()> {
        let constant = match literal {
            Literal::Integer(value) => Constant::Integer(*value),
            Literal::Float(value) => Constant::Float(*value),
            Literal::String(value) => Constant::String(Arc::from(value.as_str())),
            Literal::Boolean(true) => {
                self.emit(Opcode::True, vec![]);
                return Ok(());
            }
            Literal::Boolean(false) => {
                self.emit(Opcode::False, vec![]);
                return Ok(());
            }
            Literal::Null => {
                self.emit(Opcode::Null, vec![]);
                return Ok(());
            }
        };
        let index = self.add_constant(constant)?;
        self.emit(Opcode::Constant, vec![index]);
        Ok(())
    }

    fn compile_infix(&mut self, left: &Expression, operator: Operator, right: &Expression) -> Result<()> {
        let opcode = match operator {
            Operator::Add => Opcode::Add,
            Operator::Subtract => Opcode::Sub,
            Operator::Multiply => Opcode::Mul,
            Operator::Divide => Opcode::Div,
            Operator::Equal => Opcode::Equal,
            Operator::NotEqual => Opcode::NotEqual,
            Operator::LessThan => Opcode::LessThan,
            Operator::GreaterThan => Opcode::GreaterThan,
            Operator::Not | Operator::Negate | Operator::Assign => {
                return Err(CompileError::UnsupportedOperator(operator))
            }
        };
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        self.emit(opcode, vec![]);
        Ok(())
    }

    fn compile_assign(&mut self, assignment: &Assignment) -> Result<()> {
        self.compile_expression(&assignment.value)?;
        let symbol = self.define_for_write(&assignment.target)?;
        self.store_symbol(&symbol);
        self.load_symbol(&symbol);
        Ok(())
    }

    fn compile_function(&mut self, function: &Function) -> Result<()> {
        if function.parameters.len() > MAX_NARROW_OPERAND {
            return Err(CompileError::TooManyArguments);
        }
        self.enter_scope();
        if let Some(name) = &function.name {
            self.symbol_table.define_function_name(name);
        }

        let mut seen = HashSet::new();
        for parameter in function.parameters.iter() {
            if !seen.insert(parameter.name.as_str()) {
                return Err(CompileError::at(parameter.position, |line, column| {
                    CompileError::DuplicateParameter {
                        name: parameter.name.clone(),
                        line,
                        column,
                    }
                }));
            }
            self.symbol_table.define(&parameter.name);
        }

        self.compile_block(&function.body)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, vec![]);
        }

        let (instructions, table) = self.leave_scope();
        if table.num_definitions > MAX_NARROW_OPERAND + 1 {
            return Err(CompileError::TooManyLocals);
        }
        if table.free_symbols.len() > MAX_NARROW_OPERAND {
            return Err(CompileError::TooManyFreeVariables);
        }
        for free in table.free_symbols.iter() {
            self.load_symbol(free);
        }

        let compiled = CompiledFunction {
            instructions: Instructions(instructions),
            num_locals: table.num_definitions,
            num_parameters: function.parameters.len(),
            name: function.name.clone(),
        };
        trace!(
            name = compiled.name.as_deref().unwrap_or("<anonymous>"),
            locals = compiled.num_locals,
            free = table.free_symbols.len(),
            "compiled function"
        );
        let index = self.add_constant(Constant::Function(Arc::new(compiled)))?;
        self.emit(Opcode::Closure, vec![index, table.free_symbols.len()]);
        Ok(())
    }

    fn compile_foreach(&mut self, foreach: &Foreach) -> Result<()> {
        let id = self.hidden_symbols;
        self.hidden_symbols += 1;
        let position = foreach.item.position;
        let iterable = self.define_hidden(&format!("@foreach_iter_{}", id), position)?;
        let counter = self.define_hidden(&format!("@foreach_index_{}", id), position)?;

        self.compile_expression(&foreach.iterable)?;
        self.store_symbol(&iterable);
        let zero = self.add_constant(Constant::Integer(0))?;
        self.emit(Opcode::Constant, vec![zero]);
        self.store_symbol(&counter);

        let start = self.jump_target()?;
        self.load_symbol(&counter);
        self.load_symbol(&iterable);
        self.emit(Opcode::Len, vec![]);
        self.emit(Opcode::LessThan, vec![]);
        let exit = self.emit_jump(Opcode::JumpNotTruthy);

        self.load_symbol(&iterable);
        self.load_symbol(&counter);
        self.emit(Opcode::Index, vec![]);
        let item = self.define_for_write(&foreach.item)?;
        self.store_symbol(&item);
        if let Some(index) = &foreach.index {
            self.load_symbol(&counter);
            let index = self.define_for_write(index)?;
            self.store_symbol(&index);
        }

        self.compile_block(&foreach.body)?;

        self.load_symbol(&counter);
        let one = self.add_constant(Constant::Integer(1))?;
        self.emit(Opcode::Constant, vec![one]);
        self.emit(Opcode::Add, vec![]);
        self.store_symbol(&counter);
        self.emit_jump_back(start)?;
        self.patch_jump(exit)?;
        self.emit(Opcode::Null, vec![]);
        Ok(())
    }

    fn define_hidden(&mut self, name: &str, position: Position) -> Result<Symbol> {
        self.define_for_write(&Identifier::new(name, position))
    }

    fn resolve(&mut self, identifier: &Identifier) -> Result<Symbol> {
        self.symbol_table.resolve(&identifier.name).ok_or_else(|| {
            CompileError::at(identifier.position, |line, column| {
                CompileError::UnresolvedIdentifier {
                    name: identifier.name.clone(),
                    line,
                    column,
                }
            })
        })
    }

    fn define_for_write(&mut self, identifier: &Identifier) -> Result<Symbol> {
        let symbol = self.symbol_table.resolve_or_define(&identifier.name);
        match symbol.scope {
            SymbolScope::Global if symbol.index > MAX_WIDE_OPERAND => Err(CompileError::TooManyGlobals),
            SymbolScope::Local if symbol.index > MAX_NARROW_OPERAND => Err(CompileError::TooManyLocals),
            _ => Ok(symbol),
        }
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, vec![symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, vec![symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, vec![symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, vec![]),
        };
    }

    fn store_symbol(&mut self, symbol: &Symbol) {
        let opcode = match symbol.scope {
            SymbolScope::Global => Opcode::SetGlobal,
            _ => Opcode::SetLocal,
        };
        self.emit(opcode, vec![symbol.index]);
    }
}
