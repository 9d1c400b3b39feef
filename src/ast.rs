use crate::flatten;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", flatten(&self.statements, "; "))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    Assignment(Assignment),
    Return(Option<Expression>),
    Expression(Expression),
    Load(String, Position),
    Export(Identifier, String),
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Assignment(assignment) => write!(f, "{}", assignment),
            Self::Return(Some(value)) => write!(f, "return {}", value),
            Self::Return(None) => write!(f, "return"),
            Self::Expression(expression) => write!(f, "{}", expression),
            Self::Load(path, _) => write!(f, "load({})", quote(path)),
            Self::Export(name, destination) => {
                write!(f, "export({}, {})", name, quote(destination))
            }
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Block(pub Vec<Statement>);

impl Display for Block {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{ {} }}", flatten(&self.0, "; "))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Identifier(Identifier),
    Literal(Literal),
    Array(Vec<Expression>),
    Function(Function),
    Prefix(Operator, Box<Expression>),
    Infix(Box<Expression>, Operator, Box<Expression>),
    Index(Box<Expression>, Box<Expression>),
    Call(Box<Expression>, Vec<Expression>),
    If(Box<Expression>, Block, Option<Block>),
    For(Box<Expression>, Block),
    Foreach(Foreach),
    Assign(Assignment),
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Identifier(identifier) => write!(f, "{}", identifier),
            Self::Literal(literal) => write!(f, "{}", literal),
            Self::Array(elements) => write!(f, "[{}]", flatten(elements, ", ")),
            Self::Function(function) => write!(f, "{}", function),
            Self::Prefix(operator, operand) => write!(f, "({}{})", operator, operand),
            Self::Infix(left, operator, right) => {
                write!(f, "({} {} {})", left, operator, right)
            }
            Self::Index(collection, index) => write!(f, "({}[{}])", collection, index),
            Self::Call(callee, arguments) => {
                write!(f, "{}({})", callee, flatten(arguments, ", "))
            }
            Self::If(condition, consequence, alternative) => {
                write!(f, "if ({}) {}", condition, consequence)?;
                if let Some(alternative) = alternative {
                    write!(f, " else {}", alternative)?;
                }
                Ok(())
            }
            Self::For(condition, body) => write!(f, "for ({}) {}", condition, body),
            Self::Foreach(foreach) => write!(f, "{}", foreach),
            Self::Assign(assignment) => write!(f, "({})", assignment),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Identifier {
    pub name: String,
    pub position: Position,
}

impl Identifier {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", float_literal(*value)),
            Self::String(value) => write!(f, "{}", quote(value)),
            Self::Boolean(value) => write!(f, "{}", value),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A function literal. `name` is filled in by the parser when the literal is
/// the value of an assignment, so the body can refer to itself.
#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub parameters: Vec<Identifier>,
    pub body: Block,
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "function({}) {}", flatten(&self.parameters, ", "), self.body)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Foreach {
    pub index: Option<Identifier>,
    pub item: Identifier,
    pub iterable: Box<Expression>,
    pub body: Block,
}

impl Display for Foreach {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "for (")?;
        if let Some(index) = &self.index {
            write!(f, "{}, ", index)?;
        }
        write!(f, "{} in {}) {}", self.item, self.iterable, self.body)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Assignment {
    pub target: Identifier,
    pub operator: Operator,
    pub value: Box<Expression>,
}

impl Display for Assignment {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{} {} {}", self.target, self.operator, self.value)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    Not,
    Negate,
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    Assign,
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let operator = match self {
            Self::Not => "!",
            Self::Negate | Self::Subtract => "-",
            Self::Add => "+",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Assign => "=",
        };
        write!(f, "{}", operator)
    }
}

/// Positional notation with at least one fractional digit, the only float
/// form the lexer reads.
fn float_literal(value: f64) -> String {
    let rendered = value.to_string();
    if rendered.contains('.') {
        rendered
    } else {
        format!("{}.0", rendered)
    }
}

fn quote(value: &str) -> String {
    if value.contains('"') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}
