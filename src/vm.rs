use crate::{
    code::{read_operands, Opcode},
    compiler::Bytecode,
    value::{Closure, CompiledFunction, Constant, Value},
};
use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
    sync::Arc,
};
use tracing::{debug, trace};

pub const GLOBALS_SIZE: usize = 65536;
pub const DEFAULT_MAX_STEPS: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub stack_size: usize,
    pub max_frames: usize,
    /// Upper bound on executed instructions. `None` runs until completion.
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: 2048,
            max_frames: 1024,
            max_steps: Some(DEFAULT_MAX_STEPS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    StackOverflow,
    StackUnderflow,
    CallDepthExceeded(usize),
    StepLimitExceeded(u64),
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },
    UnsupportedOperand {
        operator: &'static str,
        operand: &'static str,
    },
    DivisionByZero,
    IntegerOverflow(&'static str),
    NotCallable(&'static str),
    WrongArgumentCount { expected: usize, got: usize },
    IndexNotSupported {
        collection: &'static str,
        index: &'static str,
    },
    NotIterable(&'static str),
    InvalidOpcode(u8),
    InvalidConstant(usize),
    InvalidFreeVariable(usize),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::CallDepthExceeded(limit) => write!(f, "call depth exceeded (max {} frames)", limit),
            Self::StepLimitExceeded(limit) => write!(f, "step limit of {} instructions exceeded", limit),
            Self::TypeMismatch { operator, left, right } => {
                write!(f, "type mismatch: {} {} {}", left, operator, right)
            }
            Self::UnsupportedOperand { operator, operand } => {
                write!(f, "unsupported operand for {}: {}", operator, operand)
            }
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::IntegerOverflow(operator) => write!(f, "integer overflow in {}", operator),
            Self::NotCallable(kind) => write!(f, "calling non-function: {}", kind),
            Self::WrongArgumentCount { expected, got } => {
                write!(f, "wrong number of arguments: want={}, got={}", expected, got)
            }
            Self::IndexNotSupported { collection, index } => {
                write!(f, "index operator not supported: {}[{}]", collection, index)
            }
            Self::NotIterable(kind) => write!(f, "length not supported for {}", kind),
            Self::InvalidOpcode(byte) => write!(f, "invalid opcode {}", byte),
            Self::InvalidConstant(index) => write!(f, "invalid constant reference {}", index),
            Self::InvalidFreeVariable(index) => write!(f, "invalid free variable reference {}", index),
        }
    }
}

impl std::error::Error for RuntimeError {}

type Result<T, E = RuntimeError> = std::result::Result<T, E>;

#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }
}

pub struct VirtualMachine {
    constants: Arc<[Constant]>,
    stack: Vec<Value>,
    stack_pointer: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    config: VmConfig,
    steps: u64,
    pub exports: Vec<(String, Value)>,
}

impl VirtualMachine {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_config(bytecode, VmConfig::default())
    }

    pub fn with_config(bytecode: Bytecode, config: VmConfig) -> Self {
        Self::new_with_globals(bytecode, vec![Value::Null; GLOBALS_SIZE], config)
    }

    /// Starts a VM on globals left behind by an earlier one.
    pub fn new_with_globals(bytecode: Bytecode, mut globals: Vec<Value>, config: VmConfig) -> Self {
        globals.resize(GLOBALS_SIZE, Value::Null);
        let main = Closure {
            function: Arc::new(CompiledFunction {
                instructions: bytecode.instructions,
                ..Default::default()
            }),
            free: Vec::new(),
        };
        Self {
            constants: bytecode.constants,
            stack: vec![Value::Null; config.stack_size],
            stack_pointer: 0,
            globals,
            frames: vec![Frame::new(Rc::new(main), 0)],
            config,
            steps: 0,
            exports: Vec::new(),
        }
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The value most recently popped off the stack. After a run this is the
    /// value of the last expression statement.
    pub fn last_popped(&self) -> Value {
        self.stack.get(self.stack_pointer).cloned().unwrap_or_default()
    }

    pub fn run(&mut self) -> Result<Value> {
        debug!(
            bytes = self.frames.first().map_or(0, |frame| frame.closure.function.instructions.len()),
            constants = self.constants.len(),
            "vm started"
        );
        while let Some((opcode, operands)) = self.fetch()? {
            self.steps += 1;
            if let Some(limit) = self.config.max_steps {
                if self.steps > limit {
                    return Err(RuntimeError::StepLimitExceeded(limit));
                }
            }
            if let Some(value) = self.execute(opcode, &operands)? {
                debug!(steps = self.steps, "vm returned from top level");
                return Ok(value);
            }
        }
        debug!(steps = self.steps, "vm finished");
        Ok(self.last_popped())
    }

    /// Decodes the next instruction of the current frame and advances past it.
    fn fetch(&mut self) -> Result<Option<(Opcode, Vec<usize>)>> {
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let instructions = &frame.closure.function.instructions;
        if frame.ip >= instructions.len() {
            return Ok(None);
        }
        let byte = instructions[frame.ip];
        let opcode = Opcode::try_from(byte).map_err(RuntimeError::InvalidOpcode)?;
        if frame.ip + opcode.width() > instructions.len() {
            return Err(RuntimeError::InvalidOpcode(byte));
        }
        let (operands, read) = read_operands(opcode, &instructions[frame.ip + 1..]);
        frame.ip += 1 + read;
        Ok(Some((opcode, operands)))
    }

    /// Runs one instruction. Returns a value only when the program returns
    /// from its top level.
    fn execute(&mut self, opcode: Opcode, operands: &[usize]) -> Result<Option<Value>> {
        match opcode {
            Opcode::Constant => {
                let value = self.constant(operands[0])?.to_value();
                self.push(value)?;
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                self.execute_binary_operation(opcode)?;
            }
            Opcode::True => self.push(Value::Boolean(true))?,
            Opcode::False => self.push(Value::Boolean(false))?,
            Opcode::Null => self.push(Value::Null)?,
            Opcode::Equal | Opcode::NotEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                let equal = left == right;
                self.push(Value::Boolean(if opcode == Opcode::Equal { equal } else { !equal }))?;
            }
            Opcode::GreaterThan | Opcode::LessThan => self.execute_comparison(opcode)?,
            Opcode::Minus => {
                let operand = self.pop()?;
                let value = match operand {
                    Value::Integer(value) => value
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or(RuntimeError::IntegerOverflow("-"))?,
                    Value::Float(value) => Value::Float(-value),
                    other => {
                        return Err(RuntimeError::UnsupportedOperand {
                            operator: "-",
                            operand: other.type_name(),
                        })
                    }
                };
                self.push(value)?;
            }
            Opcode::Bang => {
                let operand = self.pop()?;
                self.push(Value::Boolean(!operand.is_truthy()))?;
            }
            Opcode::JumpNotTruthy => {
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.jump(operands[0]);
                }
            }
            Opcode::Jump => self.jump(operands[0]),
            Opcode::GetGlobal => {
                let value = self.globals[operands[0]].clone();
                self.push(value)?;
            }
            Opcode::SetGlobal => {
                self.globals[operands[0]] = self.pop()?;
            }
            Opcode::GetLocal => {
                let slot = self.current_frame()?.base_pointer + operands[0];
                let value = self.stack[slot].clone();
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let slot = self.current_frame()?.base_pointer + operands[0];
                self.stack[slot] = self.pop()?;
            }
            Opcode::GetFree => {
                let value = self
                    .current_frame()?
                    .closure
                    .free
                    .get(operands[0])
                    .cloned()
                    .ok_or(RuntimeError::InvalidFreeVariable(operands[0]))?;
                self.push(value)?;
            }
            Opcode::Array => {
                let elements = self.take(operands[0])?;
                self.push(Value::from(elements))?;
            }
            Opcode::Index => {
                let index = self.pop()?;
                let collection = self.pop()?;
                self.push(index_value(&collection, &index)?)?;
            }
            Opcode::Len => {
                let value = match self.pop()? {
                    Value::Array(elements) => elements.len(),
                    Value::String(string) => string.chars().count(),
                    other => return Err(RuntimeError::NotIterable(other.type_name())),
                };
                self.push(Value::Integer(value as i64))?;
            }
            Opcode::Call => self.execute_call(operands[0])?,
            Opcode::ReturnValue => {
                let value = self.pop()?;
                return self.return_from_frame(value);
            }
            Opcode::Return => return self.return_from_frame(Value::Null),
            Opcode::Closure => {
                let function = match self.constant(operands[0])? {
                    Constant::Function(function) => function.clone(),
                    _ => return Err(RuntimeError::InvalidConstant(operands[0])),
                };
                let free = self.take(operands[1])?;
                self.push(Value::Closure(Rc::new(Closure { function, free })))?;
            }
            Opcode::CurrentClosure => {
                let closure = self.current_frame()?.closure.clone();
                self.push(Value::Closure(closure))?;
            }
            Opcode::Export => {
                let destination = match self.constant(operands[0])? {
                    Constant::String(destination) => destination.to_string(),
                    _ => return Err(RuntimeError::InvalidConstant(operands[0])),
                };
                let value = self.pop()?;
                debug!(%destination, value = %value, "exported value");
                self.exports.push((destination, value));
            }
        }
        Ok(None)
    }

    fn constant(&self, index: usize) -> Result<&Constant> {
        self.constants.get(index).ok_or(RuntimeError::InvalidConstant(index))
    }

    fn current_frame(&self) -> Result<&Frame> {
        self.frames.last().ok_or(RuntimeError::StackUnderflow)
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = target;
        }
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack_pointer >= self.stack.len() {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.stack_pointer] = value;
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if self.stack_pointer == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer].clone())
    }

    /// Removes the top `count` values, oldest first.
    fn take(&mut self, count: usize) -> Result<Vec<Value>> {
        let start = self
            .stack_pointer
            .checked_sub(count)
            .ok_or(RuntimeError::StackUnderflow)?;
        let values = self.stack[start..self.stack_pointer].to_vec();
        self.stack_pointer = start;
        Ok(values)
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let operator = operator_symbol(opcode);
        let result = match (&left, &right) {
            (Value::Integer(left), Value::Integer(right)) => {
                let (left, right) = (*left, *right);
                let result = match opcode {
                    Opcode::Add => left.checked_add(right),
                    Opcode::Sub => left.checked_sub(right),
                    Opcode::Mul => left.checked_mul(right),
                    _ if right == 0 => return Err(RuntimeError::DivisionByZero),
                    _ => left.checked_div(right),
                };
                Value::Integer(result.ok_or(RuntimeError::IntegerOverflow(operator))?)
            }
            (Value::Float(left), Value::Float(right)) => Value::Float(match opcode {
                Opcode::Add => left + right,
                Opcode::Sub => left - right,
                Opcode::Mul => left * right,
                _ => left / right,
            }),
            (Value::String(left), Value::String(right)) if opcode == Opcode::Add => {
                Value::String(Rc::from(format!("{}{}", left, right)))
            }
            _ => return Err(operand_error(operator, &left, &right)),
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let ordering = match (&left, &right) {
            (Value::Integer(left), Value::Integer(right)) => left.partial_cmp(right),
            (Value::Float(left), Value::Float(right)) => left.partial_cmp(right),
            _ => return Err(operand_error(operator_symbol(opcode), &left, &right)),
        };
        let result = match opcode {
            Opcode::GreaterThan => ordering == Some(std::cmp::Ordering::Greater),
            _ => ordering == Some(std::cmp::Ordering::Less),
        };
        self.push(Value::Boolean(result))
    }

    fn execute_call(&mut self, num_args: usize) -> Result<()> {
        let callee_slot = self
            .stack_pointer
            .checked_sub(num_args + 1)
            .ok_or(RuntimeError::StackUnderflow)?;
        let closure = match &self.stack[callee_slot] {
            Value::Closure(closure) => closure.clone(),
            other => return Err(RuntimeError::NotCallable(other.type_name())),
        };
        let function = &closure.function;
        if num_args != function.num_parameters {
            return Err(RuntimeError::WrongArgumentCount {
                expected: function.num_parameters,
                got: num_args,
            });
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::CallDepthExceeded(self.config.max_frames));
        }

        let base_pointer = self.stack_pointer - num_args;
        let stack_pointer = base_pointer + function.num_locals;
        if stack_pointer > self.stack.len() {
            return Err(RuntimeError::StackOverflow);
        }
        for slot in self.stack_pointer..stack_pointer {
            self.stack[slot] = Value::Null;
        }
        self.stack_pointer = stack_pointer;
        self.frames.push(Frame::new(closure, base_pointer));
        trace!(depth = self.frames.len(), base_pointer, "pushed frame");
        Ok(())
    }

    fn return_from_frame(&mut self, value: Value) -> Result<Option<Value>> {
        let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        if self.frames.is_empty() {
            return Ok(Some(value));
        }
        trace!(depth = self.frames.len(), "popped frame");
        self.stack_pointer = frame.base_pointer - 1;
        self.push(value)?;
        Ok(None)
    }
}

fn operator_symbol(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::GreaterThan => ">",
        Opcode::LessThan => "<",
        _ => "?",
    }
}

fn operand_error(operator: &'static str, left: &Value, right: &Value) -> RuntimeError {
    if left.type_name() == right.type_name() {
        RuntimeError::UnsupportedOperand {
            operator,
            operand: left.type_name(),
        }
    } else {
        RuntimeError::TypeMismatch {
            operator,
            left: left.type_name(),
            right: right.type_name(),
        }
    }
}

fn index_value(collection: &Value, index: &Value) -> Result<Value> {
    match (collection, index) {
        (Value::Array(elements), Value::Integer(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|index| elements.get(index))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(string), Value::Integer(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|index| string.chars().nth(index))
            .map(|character| Value::String(Rc::from(character.to_string())))
            .unwrap_or(Value::Null)),
        _ => Err(RuntimeError::IndexNotSupported {
            collection: collection.type_name(),
            index: index.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{Instruction, Instructions},
        Compiler, Parser,
    };
    use anyhow::{bail, Result};

    fn compile(input: &str) -> Result<Bytecode> {
        let mut parser = Parser::from_source(input);
        let program = parser.parse_program();
        if !parser.errors().is_empty() {
            bail!("parse errors for {:?}: {:?}", input, parser.errors());
        }
        Ok(Compiler::new().compile(&program)?)
    }

    fn run_with(input: &str, config: VmConfig) -> Result<std::result::Result<Value, RuntimeError>> {
        let bytecode = compile(input)?;
        Ok(VirtualMachine::with_config(bytecode, config).run())
    }

    fn run_vm_test(tests: &[(&str, Value)]) -> Result<()> {
        for (input, expected) in tests {
            let result = run_with(input, VmConfig::default())?;
            assert_eq!(result.as_ref(), Ok(expected), "Failed for input: {}", input);
        }
        Ok(())
    }

    fn array(values: &[i64]) -> Value {
        Value::from(values.iter().copied().map(Value::Integer).collect::<Vec<_>>())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        run_vm_test(&[
            ("1", Value::Integer(1)),
            ("1 + 2 * 3", Value::Integer(7)),
            ("(1 + 2) * 3", Value::Integer(9)),
            ("50 / 2 * 2 + 10 - 5", Value::Integer(55)),
            ("-5 + 10", Value::Integer(5)),
            ("7 / 2", Value::Integer(3)),
            ("1.5 + 2.25", Value::Float(3.75)),
            ("-0.5 * 4.0", Value::Float(-2.0)),
            ("\"wa\" + \"vy\"", Value::from("wavy")),
        ])
    }

    #[test]
    fn test_boolean_expressions() -> Result<()> {
        run_vm_test(&[
            ("1 < 2", Value::Boolean(true)),
            ("1 > 2", Value::Boolean(false)),
            ("1.5 < 2.5", Value::Boolean(true)),
            ("1 == 1", Value::Boolean(true)),
            ("1 != 1", Value::Boolean(false)),
            ("1 == 1.0", Value::Boolean(false)),
            ("\"a\" == \"a\"", Value::Boolean(true)),
            ("[1, 2] == [1, 2]", Value::Boolean(true)),
            ("null == false", Value::Boolean(false)),
            ("(1 < 2) == true", Value::Boolean(true)),
            ("!true", Value::Boolean(false)),
            ("!5", Value::Boolean(false)),
            ("!null", Value::Boolean(true)),
            ("!!0", Value::Boolean(true)),
        ])
    }

    #[test]
    fn test_conditionals() -> Result<()> {
        run_vm_test(&[
            ("if (1 < 2) { 10 } else { 20 }", Value::Integer(10)),
            ("if (1 > 2) { 10 } else { 20 }", Value::Integer(20)),
            ("if (1 > 2) { 10 }", Value::Null),
            ("if (null) { 10 } else { 20 }", Value::Integer(20)),
            ("if (0) { 10 }", Value::Integer(10)),
            ("if (if (false) { 10 }) { 10 } else { 20 }", Value::Integer(20)),
            ("if (true) { }", Value::Null),
            ("if (true) { x = 1 }", Value::Null),
        ])
    }

    #[test]
    fn test_globals_and_assignment() -> Result<()> {
        run_vm_test(&[
            ("one = 1; one", Value::Integer(1)),
            ("one = 1; two = one + one; one + two", Value::Integer(3)),
            ("a = b = 4; a + b", Value::Integer(8)),
            ("x = 1; x = x + 1; x", Value::Integer(2)),
            ("(y = 3) * 2", Value::Integer(6)),
        ])
    }

    #[test]
    fn test_arrays_and_indexing() -> Result<()> {
        run_vm_test(&[
            ("[]", array(&[])),
            ("[1, 2 * 2, 3 + 3]", array(&[1, 4, 6])),
            ("[1, 2, 3][1]", Value::Integer(2)),
            ("[[1, 1, 1]][0][0]", Value::Integer(1)),
            ("[1, 2, 3][3]", Value::Null),
            ("[1, 2, 3][-1]", Value::Null),
            ("[][0]", Value::Null),
            ("\"wavy\"[1]", Value::from("a")),
            ("\"wavy\"[9]", Value::Null),
        ])
    }

    #[test]
    fn test_functions() -> Result<()> {
        run_vm_test(&[
            ("f = function() { 5 + 10 }; f()", Value::Integer(15)),
            ("f = function() { return 1; 2 }; f()", Value::Integer(1)),
            ("f = function() { }; f()", Value::Null),
            ("f = function() { return }; f()", Value::Null),
            ("f = function(a, b) { a + b }; f(1, 2)", Value::Integer(3)),
            (
                "sum = function(a, b) { c = a + b; c }; outer = function() { sum(1, 2) + sum(3, 4) }; outer()",
                Value::Integer(10),
            ),
            ("function(x) { x * 2 }(21)", Value::Integer(42)),
            ("f = function(x) { x = x + 1; x }; f(1)", Value::Integer(2)),
        ])
    }

    #[test]
    fn test_closures() -> Result<()> {
        run_vm_test(&[
            (
                "adder = function(a) { function(b) { a + b } }; add2 = adder(2); add2(3)",
                Value::Integer(5),
            ),
            (
                "make = function() { secret = 42; function() { secret } }; reveal = make(); reveal()",
                Value::Integer(42),
            ),
            (
                "f = function(a) { function(b) { function(c) { a + b + c } } }; f(1)(2)(3)",
                Value::Integer(6),
            ),
        ])
    }

    #[test]
    fn test_recursion() -> Result<()> {
        run_vm_test(&[
            (
                "fib = function(n) { if (n < 2) { return n }; fib(n - 1) + fib(n - 2) }; fib(15)",
                Value::Integer(610),
            ),
            (
                "wrapper = function() { countdown = function(x) { if (x == 0) { return 0 } else { countdown(x - 1) } }; countdown(3) }; wrapper()",
                Value::Integer(0),
            ),
        ])
    }

    #[test]
    fn assignments_inside_functions_stay_local() -> Result<()> {
        run_vm_test(&[
            ("x = 1; f = function() { x = 2; x }; f() + x", Value::Integer(3)),
            ("x = 1; f = function() { x = 2 }; f(); x", Value::Integer(1)),
        ])
    }

    #[test]
    fn test_loops() -> Result<()> {
        run_vm_test(&[
            ("i = 0; for (i < 5) { i = i + 1 }; i", Value::Integer(5)),
            ("for (false) { 1 }", Value::Null),
            ("sum = 0; for (x in [1, 2, 3]) { sum = sum + x }; sum", Value::Integer(6)),
            ("sum = 0; for (i, x in [10, 20]) { sum = sum + i * x }; sum", Value::Integer(20)),
            ("n = 0; for (c in \"wavy\") { n = n + 1 }; n", Value::Integer(4)),
            (
                "count = function(xs) { n = 0; for (x in xs) { n = n + 1 }; n }; count([1, 2, 3])",
                Value::Integer(3),
            ),
            (
                "s = 0; for (a in [1, 2]) { for (b in [10, 20]) { s = s + a * b } }; s",
                Value::Integer(90),
            ),
        ])
    }

    #[test]
    fn top_level_return_stops_the_program() -> Result<()> {
        run_vm_test(&[("1; return 2; 3", Value::Integer(2)), ("return", Value::Null)])
    }

    #[test]
    fn test_runtime_errors() -> Result<()> {
        let tests = [
            (
                "1 + true",
                RuntimeError::TypeMismatch {
                    operator: "+",
                    left: "INTEGER",
                    right: "BOOLEAN",
                },
            ),
            (
                "1 + 2.0",
                RuntimeError::TypeMismatch {
                    operator: "+",
                    left: "INTEGER",
                    right: "FLOAT",
                },
            ),
            (
                "\"a\" - \"b\"",
                RuntimeError::UnsupportedOperand {
                    operator: "-",
                    operand: "STRING",
                },
            ),
            (
                "-true",
                RuntimeError::UnsupportedOperand {
                    operator: "-",
                    operand: "BOOLEAN",
                },
            ),
            ("1 / 0", RuntimeError::DivisionByZero),
            ("9223372036854775807 + 1", RuntimeError::IntegerOverflow("+")),
            ("1()", RuntimeError::NotCallable("INTEGER")),
            (
                "f = function(a) { a }; f()",
                RuntimeError::WrongArgumentCount { expected: 1, got: 0 },
            ),
            (
                "1[0]",
                RuntimeError::IndexNotSupported {
                    collection: "INTEGER",
                    index: "INTEGER",
                },
            ),
            ("for (x in 5) { x }", RuntimeError::NotIterable("INTEGER")),
        ];

        for (input, expected) in tests {
            let result = run_with(input, VmConfig::default())?;
            assert_eq!(result, Err(expected), "Failed for input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_resource_limits() -> Result<()> {
        let config = VmConfig {
            max_steps: Some(1000),
            ..VmConfig::default()
        };
        let result = run_with("for (true) { }", config)?;
        assert_eq!(result, Err(RuntimeError::StepLimitExceeded(1000)));

        let result = run_with("for (true) { }", VmConfig::default())?;
        assert_eq!(result, Err(RuntimeError::StepLimitExceeded(DEFAULT_MAX_STEPS)));

        let config = VmConfig {
            max_steps: None,
            ..VmConfig::default()
        };
        let result = run_with("i = 0; for (i < 100) { i = i + 1 }; i", config)?;
        assert_eq!(result, Ok(Value::Integer(100)));

        let result = run_with("f = function() { f() }; f()", VmConfig::default())?;
        assert_eq!(result, Err(RuntimeError::CallDepthExceeded(1024)));

        let config = VmConfig {
            stack_size: 16,
            ..VmConfig::default()
        };
        let result = run_with("f = function(n) { 1 + f(n) }; f(1)", config)?;
        assert_eq!(result, Err(RuntimeError::StackOverflow));
        Ok(())
    }

    #[test]
    fn missing_free_variable_is_reported() -> Result<()> {
        let bytecode = Bytecode {
            instructions: Instructions::from(vec![Instruction::new(Opcode::GetFree, vec![3])]),
            ..Bytecode::default()
        };
        let result = VirtualMachine::new(bytecode).run();
        assert_eq!(result, Err(RuntimeError::InvalidFreeVariable(3)));
        assert_eq!(
            RuntimeError::InvalidFreeVariable(3).to_string(),
            "invalid free variable reference 3"
        );
        Ok(())
    }

    #[test]
    fn test_exports() -> Result<()> {
        let mut vm = VirtualMachine::new(compile("x = [1]; export(x, \"result\"); 5")?);
        assert_eq!(vm.run(), Ok(Value::Integer(5)));
        assert_eq!(vm.exports, vec![("result".to_string(), array(&[1]))]);
        Ok(())
    }

    #[test]
    fn globals_carry_over_between_machines() -> Result<()> {
        let mut compiler = Compiler::new();
        let first = compiler.compile(&Parser::from_source("a = 40").parse_program())?;
        let mut vm = VirtualMachine::new(first);
        vm.run()?;
        let globals = vm.into_globals();

        let (symbols, constants) = compiler.into_state();
        let mut compiler = Compiler::new_with_state(symbols, constants);
        let second = compiler.compile(&Parser::from_source("a + 2").parse_program())?;
        let mut vm = VirtualMachine::new_with_globals(second, globals, VmConfig::default());
        assert_eq!(vm.run(), Ok(Value::Integer(42)));
        Ok(())
    }

    #[test]
    fn bytecode_runs_on_several_threads() -> Result<()> {
        let bytecode = compile("f = function(n) { if (n < 2) { n } else { f(n - 1) + f(n - 2) } }; f(10)")?;
        let handles = (0..4)
            .map(|_| {
                let bytecode = bytecode.clone();
                std::thread::spawn(move || VirtualMachine::new(bytecode).run().map(|value| value.to_string()))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => bail!("vm thread panicked"),
            };
            assert_eq!(result, Ok("55".to_string()));
        }
        Ok(())
    }
}
