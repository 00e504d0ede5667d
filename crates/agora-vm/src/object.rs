//! Objects: associative value containers with meta-method dispatch.
//!
//! Operations that can invoke a meta-method need the object's shared handle
//! to bind `this`, so they are associated functions over `&Rc<Object>`;
//! plain map access works through `&self`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::Func;
use crate::value::Value;
use crate::Result;

/// Meta-methods the runtime recognizes by name. Keeping them in a fixed
/// enum means dispatch sites name the hook they want instead of spelling
/// the underscored string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetaMethod {
    Int,
    Float,
    Str,
    Bool,
    Native,
    Len,
    Keys,
    NoSuchMethod,
}

impl MetaMethod {
    fn name(self) -> &'static str {
        match self {
            MetaMethod::Int => "__int",
            MetaMethod::Float => "__float",
            MetaMethod::Str => "__string",
            MetaMethod::Bool => "__bool",
            MetaMethod::Native => "__native",
            MetaMethod::Len => "__len",
            MetaMethod::Keys => "__keys",
            MetaMethod::NoSuchMethod => "__noSuchMethod",
        }
    }
}

/// An associative array mapping values to values.
///
/// Mutation goes through interior mutability so objects can be shared
/// freely; the single-threaded context rule keeps borrows disjoint.
#[derive(Debug, Default)]
pub struct Object {
    map: RefCell<HashMap<Value, Value>>,
}

impl Object {
    pub fn new() -> Object {
        Object::default()
    }

    /// The stored value for `key`, or Nil when absent.
    pub fn get(&self, key: &Value) -> Value {
        self.map.borrow().get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Store `v` under `key`. A Nil value removes the key instead; a Nil key
    /// is a type error.
    pub fn set(&self, key: Value, v: Value) -> Result<()> {
        if matches!(v, Value::Nil) {
            self.map.borrow_mut().remove(&key);
            Ok(())
        } else if matches!(key, Value::Nil) {
            Err(RuntimeError::conversion("nil", "key"))
        } else {
            self.map.borrow_mut().insert(key, v);
            Ok(())
        }
    }

    /// Raw insert for runtime-built objects where the key is known non-Nil
    /// and the value non-removing (built-ins, key snapshots).
    pub(crate) fn insert(&self, key: Value, v: Value) {
        self.map.borrow_mut().insert(key, v);
    }

    /// Number of present keys, unless `__len` overrides it.
    pub fn len(o: &Rc<Object>, ktx: &Ktx) -> Result<Value> {
        if let Some(v) = Object::call_meta(o, ktx, MetaMethod::Len, &[])? {
            return Ok(v);
        }
        Ok(Value::Number(o.map.borrow().len() as f64))
    }

    /// A new object mapping 0..N-1 to this object's keys, unless `__keys`
    /// overrides it. Key order is unspecified.
    pub fn keys(o: &Rc<Object>, ktx: &Ktx) -> Result<Value> {
        if let Some(v) = Object::call_meta(o, ktx, MetaMethod::Keys, &[])? {
            return Ok(v);
        }
        let out = Object::new();
        for (i, k) in o.map.borrow().keys().enumerate() {
            out.insert(Value::Number(i as f64), k.clone());
        }
        Ok(Value::Object(Rc::new(out)))
    }

    /// Invoke the method stored under `name` with `this` bound to the
    /// object. A missing slot falls back to `__noSuchMethod` (with the name
    /// prepended to the arguments) when defined; a slot holding a
    /// non-function is the same `no such method` error.
    pub fn call_method(o: &Rc<Object>, ktx: &Ktx, name: &Value, args: &[Value]) -> Result<Value> {
        match o.get(name) {
            Value::Func(f) => Func::call(&f, ktx, Value::Object(o.clone()), args),
            Value::Nil => {
                let mut fwd = Vec::with_capacity(args.len() + 1);
                fwd.push(name.clone());
                fwd.extend_from_slice(args);
                if let Some(v) = Object::call_meta(o, ktx, MetaMethod::NoSuchMethod, &fwd)? {
                    Ok(v)
                } else {
                    Err(RuntimeError::NoSuchMethod(name.as_string(ktx)?))
                }
            }
            _ => Err(RuntimeError::NoSuchMethod(name.as_string(ktx)?)),
        }
    }

    /// Call the named meta-method if it exists and is callable; `None`
    /// means the default behaviour applies.
    pub(crate) fn call_meta(
        o: &Rc<Object>,
        ktx: &Ktx,
        meta: MetaMethod,
        args: &[Value],
    ) -> Result<Option<Value>> {
        match o.get(&Value::str(meta.name())) {
            Value::Func(f) => Func::call(&f, ktx, Value::Object(o.clone()), args).map(Some),
            _ => Ok(None),
        }
    }

    pub(crate) fn to_int(o: &Rc<Object>, ktx: &Ktx) -> Result<i64> {
        match Object::call_meta(o, ktx, MetaMethod::Int, &[])? {
            Some(v) => v.as_int(ktx),
            None => Err(RuntimeError::conversion("object", "int")),
        }
    }

    pub(crate) fn to_float(o: &Rc<Object>, ktx: &Ktx) -> Result<f64> {
        match Object::call_meta(o, ktx, MetaMethod::Float, &[])? {
            Some(v) => v.as_float(ktx),
            None => Err(RuntimeError::conversion("object", "float")),
        }
    }

    pub(crate) fn to_bool(o: &Rc<Object>, ktx: &Ktx) -> Result<bool> {
        match Object::call_meta(o, ktx, MetaMethod::Bool, &[])? {
            Some(v) => v.as_bool(ktx),
            // An object is not nil, so it defaults to true.
            None => Ok(true),
        }
    }

    pub(crate) fn to_native(o: &Rc<Object>, ktx: &Ktx) -> Result<Value> {
        match Object::call_meta(o, ktx, MetaMethod::Native, &[])? {
            Some(v) => v.native(ktx),
            None => Ok(Value::Object(o.clone())),
        }
    }

    /// String form: `__string` when defined, otherwise `{k:v,…}` over
    /// `keys()`. The key snapshot keeps one render internally consistent
    /// even though overall order is unspecified.
    pub(crate) fn to_display(o: &Rc<Object>, ktx: &Ktx) -> Result<String> {
        if let Some(v) = Object::call_meta(o, ktx, MetaMethod::Str, &[])? {
            return v.as_string(ktx);
        }
        let keys = match Object::keys(o, ktx)? {
            Value::Object(k) => k,
            other => return Err(RuntimeError::conversion(other.type_name(), "object")),
        };
        let n = Object::len(&keys, ktx)?.as_int(ktx)?;
        let mut out = String::from("{");
        for i in 0..n {
            if i > 0 {
                out.push(',');
            }
            let k = keys.get(&Value::Number(i as f64));
            out.push_str(&k.as_string(ktx)?);
            out.push(':');
            out.push_str(&o.get(&k).as_string(ktx)?);
        }
        out.push('}');
        Ok(out)
    }

    /// Context-free `{k:v,…}` render used by `Display` and `dump`; never
    /// runs meta-methods.
    pub(crate) fn raw_display(&self) -> String {
        let map = self.map.borrow();
        let mut out = String::from("{");
        for (i, (k, v)) in map.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&k.to_string());
            out.push(':');
            out.push_str(&v.to_string());
        }
        out.push('}');
        out
    }
}
