//! The built-in functions, exposed as an object that variable lookup falls
//! back to after locals and enclosing environments.

use std::rc::Rc;

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::Func;
use crate::object::Object;
use crate::value::Value;
use crate::Result;

/// Build the built-ins object. Constructed once per context.
pub(crate) fn install() -> Rc<Object> {
    let ob = Object::new();
    ob.insert(Value::str("import"), Value::Func(Func::native("import", import)));
    ob.insert(Value::str("panic"), Value::Func(Func::native("panic", panic)));
    ob.insert(
        Value::str("recover"),
        Value::Func(Func::native("recover", recover)),
    );
    ob.insert(Value::str("len"), Value::Func(Func::native("len", len)));
    ob.insert(Value::str("keys"), Value::Func(Func::native("keys", keys)));
    ob.insert(
        Value::str("number"),
        Value::Func(Func::native("number", number)),
    );
    ob.insert(
        Value::str("string"),
        Value::Func(Func::native("string", string)),
    );
    ob.insert(Value::str("bool"), Value::Func(Func::native("bool", bool_)));
    ob.insert(Value::str("type"), Value::Func(Func::native("type", type_)));
    ob.insert(
        Value::str("status"),
        Value::Func(Func::native("status", status)),
    );
    ob.insert(Value::str("reset"), Value::Func(Func::native("reset", reset)));
    Rc::new(ob)
}

/// Minimum-arity guard for native implementations.
pub(crate) fn expect_at_least(n: usize, args: &[Value]) -> Result<()> {
    if args.len() < n {
        return Err(RuntimeError::Host(format!(
            "expected at least {} argument(s), got {}",
            n,
            args.len()
        )));
    }
    Ok(())
}

/// `import(id)`: load the module and run it, returning its (memoized)
/// value.
fn import(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    let id = args[0].as_string(ktx)?;
    let m = ktx.load(&id)?;
    m.run(ktx, &[])
}

/// `panic(v)`: raise `v` as a language error when truthy, else no-op.
fn panic(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    if args[0].as_bool(ktx)? {
        return Err(RuntimeError::Raised(args[0].clone()));
    }
    Ok(Value::Nil)
}

/// `recover(fn, args…)`: call `fn` under a catch. A raised language value
/// comes back as-is, any other runtime error as its message string, and a
/// clean call yields Nil. `this` is not preserved; callers that need it
/// must bind through a closure. Cancellation is not recoverable.
fn recover(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    let f = match &args[0] {
        Value::Func(f) => f.clone(),
        other => return Err(RuntimeError::conversion(other.type_name(), "recover")),
    };
    match Func::call(&f, ktx, Value::Nil, &args[1..]) {
        Ok(_) => Ok(Value::Nil),
        Err(RuntimeError::Raised(v)) => Ok(v),
        Err(RuntimeError::Cancelled) => Err(RuntimeError::Cancelled),
        Err(e) => Ok(Value::str(e.to_string())),
    }
}

/// `len(v)`: an object's length, 0 for nil, the string-form length
/// otherwise.
fn len(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    match &args[0] {
        Value::Object(o) => Object::len(o, ktx),
        Value::Nil => Ok(Value::Number(0.0)),
        other => Ok(Value::Number(other.as_string(ktx)?.len() as f64)),
    }
}

/// `keys(obj)`: the object's key enumeration.
fn keys(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    match &args[0] {
        Value::Object(o) => Object::keys(o, ktx),
        other => Err(RuntimeError::conversion(other.type_name(), "object")),
    }
}

fn number(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    Ok(Value::Number(args[0].as_float(ktx)?))
}

fn string(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    Ok(Value::str(args[0].as_string(ktx)?))
}

fn bool_(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    Ok(Value::Bool(args[0].as_bool(ktx)?))
}

fn type_(_ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    Ok(Value::str(args[0].type_name()))
}

/// `status(fn)`: `"running"`, `"suspended"` or empty. Only funcs have a
/// status.
fn status(ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    match &args[0] {
        Value::Func(f) => Ok(Value::str(Func::status(f, ktx))),
        other => Err(RuntimeError::conversion(other.type_name(), "status")),
    }
}

/// `reset(fn)`: drop a coroutine's suspended state.
fn reset(_ktx: &Ktx, args: &[Value]) -> Result<Value> {
    expect_at_least(1, args)?;
    match &args[0] {
        Value::Func(f) => {
            f.reset();
            Ok(Value::Nil)
        }
        other => Err(RuntimeError::conversion(other.type_name(), "reset")),
    }
}
