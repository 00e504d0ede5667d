//! Modules: decoded bytecode ready to run, native modules, and the
//! resolver/compiler seams they plug into.

use std::cell::RefCell;
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use agora_bytecode::{File, K};

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::{Func, FuncDef};
use crate::value::Value;
use crate::Result;

/// A loaded module: an identifier and a `run` that yields its value.
pub trait Module: std::fmt::Debug {
    fn id(&self) -> &str;
    fn run(&self, ktx: &Ktx, args: &[Value]) -> Result<Value>;
}

/// A host-provided module. `run` is invoked once on first import and its
/// value cached; `set_ktx` fires at registration time.
pub trait NativeModule: Module {
    fn set_ktx(&self, _ktx: &Ktx) {}
}

/// Matches a module identifier to its source or bytecode payload.
pub trait ModuleResolver {
    fn resolve(&self, id: &str) -> Result<Box<dyn Read>>;
}

/// Compiles a non-bytecode payload into a bytecode file. Plugged into the
/// context by hosts that ship a compiler; the VM itself only consumes
/// bytecode.
pub trait Compiler {
    fn compile(&self, id: &str, src: &[u8]) -> Result<File>;
}

/// A module instantiated from a decoded bytecode file. The entry point is
/// function 0; the module's return value is memoized so a re-import
/// reuses it without running again.
#[derive(Debug)]
pub struct AgoraModule {
    id: String,
    fns: Rc<Vec<Rc<FuncDef>>>,
    value: RefCell<Option<Value>>,
}

impl AgoraModule {
    /// Build the immutable function table. Constants decode to values here,
    /// once; locals must name string constants.
    pub fn new(file: File) -> Result<AgoraModule> {
        let mut fns = Vec::with_capacity(file.fns.len());
        for f in &file.fns {
            let k_table: Vec<Value> = f.ks.iter().map(k_to_value).collect();
            let mut l_table = Vec::with_capacity(f.ls.len());
            for &l in &f.ls {
                match usize::try_from(l).ok().and_then(|ix| k_table.get(ix)) {
                    Some(Value::Str(s)) => l_table.push(s.to_string()),
                    _ => {
                        return Err(RuntimeError::InvalidModule(format!(
                            "local {} of function {} is not a string constant",
                            l, f.header.name
                        )))
                    }
                }
            }
            fns.push(Rc::new(FuncDef {
                name: f.header.name.clone(),
                stack_sz: f.header.stack_sz,
                exp_args: f.header.exp_args,
                k_table,
                l_table,
                code: f.is.clone(),
            }));
        }
        Ok(AgoraModule {
            id: file.name,
            fns: Rc::new(fns),
            value: RefCell::new(None),
        })
    }
}

fn k_to_value(k: &K) -> Value {
    match k {
        K::Bool(b) => Value::Bool(*b),
        K::Int(n) => Value::Number(*n as f64),
        K::Float(n) => Value::Number(*n),
        K::Str(s) => Value::str(s),
    }
}

impl Module for AgoraModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, ktx: &Ktx, args: &[Value]) -> Result<Value> {
        if self.fns.is_empty() {
            return Err(RuntimeError::EmptyModule(self.id.clone()));
        }
        if let Some(v) = self.value.borrow().clone() {
            return Ok(v);
        }
        ktx.push_module(&self.id)?;
        let entry = Func::agora(self.fns[0].clone(), self.fns.clone(), None);
        let res = Func::call(&entry, ktx, Value::Nil, args);
        ktx.pop_module(&self.id);
        let v = res?;
        *self.value.borrow_mut() = Some(v.clone());
        Ok(v)
    }
}

/// Extensions tried, in order, when an identifier has none: compiled
/// bytecode, assembly source, source.
const EXTENSIONS: [&str; 3] = [".agorac", ".agoraa", ".agora"];

/// Resolves module identifiers to files. Relative identifiers are joined to
/// the current directory; absolute ones are used as-is.
#[derive(Debug, Default)]
pub struct FileResolver;

impl ModuleResolver for FileResolver {
    fn resolve(&self, id: &str) -> Result<Box<dyn Read>> {
        let mut path = if Path::new(id).is_absolute() {
            PathBuf::from(id)
        } else {
            env::current_dir()?.join(id)
        };
        if path.extension().is_none() {
            for ext in EXTENSIONS {
                let candidate = PathBuf::from(format!("{}{}", path.display(), ext));
                if candidate.exists() {
                    path = candidate;
                    break;
                }
            }
        }
        Ok(Box::new(fs::File::open(path)?))
    }
}
