use crate::{code::Instructions, flatten};
use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
    sync::Arc,
};

/// A function body produced by the compiler. Immutable once built, so it is
/// shared between threads through the constant pool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub name: Option<String>,
}

/// Entries of the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Function(Arc<CompiledFunction>),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Integer(value) => Value::Integer(*value),
            Constant::Float(value) => Value::Float(*value),
            Constant::String(value) => Value::String(Rc::from(&**value)),
            Constant::Function(function) => Value::Closure(Rc::new(Closure {
                function: function.clone(),
                free: Vec::new(),
            })),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Constant::Integer(value) => write!(f, "{}", value),
            Constant::Float(value) => write!(f, "{:?}", value),
            Constant::String(value) => write!(f, "{:?}", value),
            Constant::Function(function) => {
                write!(
                    f,
                    "function {} (locals: {}, parameters: {})",
                    function.name.as_deref().unwrap_or("<anonymous>"),
                    function.num_locals,
                    function.num_parameters
                )
            }
        }
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: Arc<CompiledFunction>,
    pub free: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Boolean(bool),
    #[default]
    Null,
    Array(Rc<[Value]>),
    Closure(Rc<Closure>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Closure(_) => "CLOSURE",
        }
    }

    pub fn inspect(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(left), Value::Integer(right)) => left == right,
            (Value::Float(left), Value::Float(right)) => left == right,
            (Value::String(left), Value::String(right)) => left == right,
            (Value::Boolean(left), Value::Boolean(right)) => left == right,
            (Value::Null, Value::Null) => true,
            (Value::Array(left), Value::Array(right)) => left == right,
            (Value::Closure(left), Value::Closure(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{:?}", value),
            Value::String(value) => write!(f, "{}", value),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Null => write!(f, "null"),
            Value::Array(elements) => write!(f, "[{}]", flatten(elements, ", ")),
            Value::Closure(closure) => match &closure.function.name {
                Some(name) => write!(f, "closure[{}]", name),
                None => write!(f, "closure[{:p}]", Rc::as_ptr(closure)),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(Rc::from(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_truthiness() -> Result<()> {
        let tests = [
            (Value::Null, false),
            (Value::Boolean(false), false),
            (Value::Boolean(true), true),
            (Value::Integer(0), true),
            (Value::from(""), true),
            (Value::from(Vec::new()), true),
        ];

        for (value, expected) in tests {
            assert_eq!(value.is_truthy(), expected, "Failed for value: {:?}", value);
        }
        Ok(())
    }

    #[test]
    fn test_inspect() -> Result<()> {
        let array = Value::from(vec![
            Value::Integer(1),
            Value::Float(2.5),
            Value::from("three"),
            Value::Null,
            Value::from(vec![Value::Boolean(true)]),
        ]);
        assert_eq!(array.inspect(), "[1, 2.5, three, null, [true]]");
        assert_eq!(Value::Float(3.0).inspect(), "3.0");
        Ok(())
    }

    #[test]
    fn mismatched_types_are_unequal() -> Result<()> {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Boolean(false));
        assert_eq!(Value::from("a"), Value::from("a"));
        Ok(())
    }

    #[test]
    fn closures_compare_by_identity() -> Result<()> {
        let function = Arc::new(CompiledFunction::default());
        let closure = Constant::Function(function).to_value();
        let other = closure.clone();
        assert_eq!(closure, other);

        let fresh = Constant::Function(Arc::new(CompiledFunction::default())).to_value();
        assert_ne!(closure, fresh);
        Ok(())
    }
}
