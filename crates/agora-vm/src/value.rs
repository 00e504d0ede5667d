//! Dynamically-typed runtime values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::Func;
use crate::object::Object;
use crate::Result;

/// A runtime value.
///
/// Strings are immutable and cheaply cloned behind `Rc`; objects and
/// functions are reference-shared, so cloning a `Value` never copies their
/// contents and identity comparisons (object keys, `status` checks) follow
/// the shared pointer.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(Rc<Object>),
    Func(Rc<Func>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn object() -> Value {
        Value::Object(Rc::new(Object::new()))
    }

    /// The language-level type name, as reported by the `type` built-in.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Func(_) => "func",
        }
    }

    /// Call the value as a function; a type error for anything else.
    /// `this` is Nil for plain calls; method dispatch binds the receiver.
    pub fn call(&self, ktx: &Ktx, this: Value, args: &[Value]) -> Result<Value> {
        match self {
            Value::Func(f) => Func::call(f, ktx, this, args),
            other => Err(RuntimeError::conversion(other.type_name(), "func")),
        }
    }

    /// Coroutine status of a function value; a type error for anything
    /// else.
    pub fn status(&self, ktx: &Ktx) -> Result<&'static str> {
        match self {
            Value::Func(f) => Ok(Func::status(f, ktx)),
            other => Err(RuntimeError::conversion(other.type_name(), "status")),
        }
    }

    /// Drop a function value's suspended coroutine state; a type error for
    /// anything else.
    pub fn reset(&self) -> Result<()> {
        match self {
            Value::Func(f) => {
                f.reset();
                Ok(())
            }
            other => Err(RuntimeError::conversion(other.type_name(), "reset")),
        }
    }

    /// Integer conversion; Numbers truncate toward zero.
    pub fn as_int(&self, ktx: &Ktx) -> Result<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Number(n) => Ok(n.trunc() as i64),
            Value::Str(s) => s
                .parse::<i64>()
                .map_err(|_| RuntimeError::conversion("string", "int")),
            Value::Object(o) => Object::to_int(o, ktx),
            _ => Err(RuntimeError::conversion(self.type_name(), "int")),
        }
    }

    pub fn as_float(&self, ktx: &Ktx) -> Result<f64> {
        match self {
            Value::Bool(b) => Ok(*b as i64 as f64),
            Value::Number(n) => Ok(*n),
            Value::Str(s) => s
                .parse::<f64>()
                .map_err(|_| RuntimeError::conversion("string", "float")),
            Value::Object(o) => Object::to_float(o, ktx),
            _ => Err(RuntimeError::conversion(self.type_name(), "float")),
        }
    }

    /// String conversion. Objects may override it with `__string`.
    pub fn as_string(&self, ktx: &Ktx) -> Result<String> {
        match self {
            Value::Nil => Ok("nil".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(format_number(*n)),
            Value::Str(s) => Ok(s.to_string()),
            Value::Object(o) => Object::to_display(o, ktx),
            Value::Func(f) => Ok(format!("<func {}>", f.name())),
        }
    }

    pub fn as_bool(&self, ktx: &Ktx) -> Result<bool> {
        match self {
            Value::Nil => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::Object(o) => Object::to_bool(o, ktx),
            Value::Func(_) => Ok(true),
        }
    }

    /// Host-facing representation: the value itself, except objects, which
    /// may substitute one through `__native`.
    pub fn native(&self, ktx: &Ktx) -> Result<Value> {
        match self {
            Value::Object(o) => Object::to_native(o, ktx),
            other => Ok(other.clone()),
        }
    }

    /// Debugging form, context-free: no meta-methods run.
    pub fn dump(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => format!("{} (Bool)", b),
            Value::Number(n) => format!("{} (Number)", format_number(*n)),
            Value::Str(s) => format!("\"{}\" (String)", s),
            Value::Object(o) => format!("{} (Object)", o.raw_display()),
            Value::Func(f) => format!("{} (Func)", f.name()),
        }
    }
}

/// Shortest decimal form without an exponent; integral values print with no
/// fractional part.
pub(crate) fn format_number(n: f64) -> String {
    format!("{}", n)
}

impl fmt::Display for Value {
    /// Context-free rendering: identical to `as_string` except that object
    /// meta-methods are not consulted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Object(o) => f.write_str(&o.raw_display()),
            Value::Func(func) => write!(f, "<func {}>", func.name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // Bit-pattern comparison keeps Eq reflexive for NaN keys.
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Nil => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Value::Number(n) => {
                state.write_u8(2);
                n.to_bits().hash(state);
            }
            Value::Str(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Value::Object(o) => {
                state.write_u8(4);
                (Rc::as_ptr(o) as usize).hash(state);
            }
            Value::Func(f) => {
                state.write_u8(5);
                (Rc::as_ptr(f) as usize).hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Ktx;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Number(1.0).type_name(), "number");
        assert_eq!(Value::str("x").type_name(), "string");
        assert_eq!(Value::object().type_name(), "object");
    }

    #[test]
    fn test_int_conversion_truncates_toward_zero() {
        let ktx = Ktx::default();
        assert_eq!(Value::Number(2.9).as_int(&ktx).unwrap(), 2);
        assert_eq!(Value::Number(-2.9).as_int(&ktx).unwrap(), -2);
        assert_eq!(Value::Bool(true).as_int(&ktx).unwrap(), 1);
        assert_eq!(Value::str("42").as_int(&ktx).unwrap(), 42);
        assert!(Value::Nil.as_int(&ktx).is_err());
    }

    #[test]
    fn test_func_conversions_raise_type_errors() {
        let ktx = Ktx::default();
        let f = Value::Func(Func::native("f", |_, _| Ok(Value::Nil)));
        assert!(matches!(
            f.as_int(&ktx),
            Err(RuntimeError::Conversion {
                from: "func",
                to: "int"
            })
        ));
        assert!(f.as_float(&ktx).is_err());
        assert!(f.as_bool(&ktx).unwrap());
    }

    #[test]
    fn test_string_conversions() {
        let ktx = Ktx::default();
        assert_eq!(Value::Nil.as_string(&ktx).unwrap(), "nil");
        assert_eq!(Value::Bool(false).as_string(&ktx).unwrap(), "false");
        assert_eq!(Value::Number(14.0).as_string(&ktx).unwrap(), "14");
        assert_eq!(Value::Number(2.5).as_string(&ktx).unwrap(), "2.5");
        assert_eq!(Value::str("hi").as_string(&ktx).unwrap(), "hi");
    }

    #[test]
    fn test_bool_conversions() {
        let ktx = Ktx::default();
        assert!(!Value::Nil.as_bool(&ktx).unwrap());
        assert!(!Value::Number(0.0).as_bool(&ktx).unwrap());
        assert!(Value::Number(-1.0).as_bool(&ktx).unwrap());
        assert!(!Value::str("").as_bool(&ktx).unwrap());
        assert!(Value::str("x").as_bool(&ktx).unwrap());
    }

    #[test]
    fn test_number_keys_compare_by_value() {
        assert_eq!(Value::Number(14.0), Value::Number(14.0));
        assert_ne!(Value::Number(14.0), Value::Number(14.5));
        // NaN stays reflexive so it cannot wedge a map.
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_objects_compare_by_identity() {
        let a = Value::object();
        let b = Value::object();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_dump_forms() {
        assert_eq!(Value::Nil.dump(), "nil");
        assert_eq!(Value::Bool(true).dump(), "true (Bool)");
        assert_eq!(Value::Number(3.0).dump(), "3 (Number)");
        assert_eq!(Value::str("s").dump(), "\"s\" (String)");
    }
}
