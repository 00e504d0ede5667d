//! Module loading: resolver and compiler seams, the bytecode sniff, the
//! version gate, caching, memoized module values, cyclic imports, and the
//! native module contract.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::rc::Rc;

use agora_bytecode::{encode, File, Flag, Fn as BcFn, Header, Instr, K, Opcode};
use agora_vm::{
    Compiler, Ktx, Module, ModuleResolver, NativeModule, Object, Result, RuntimeError, Value,
};

fn func(name: &str, ks: Vec<K>, ls: Vec<i64>, is: Vec<Instr>) -> BcFn {
    BcFn {
        header: Header {
            name: name.into(),
            stack_sz: 8,
            exp_args: 0,
            parent_fn_ix: 0,
            line_start: 0,
            line_end: 0,
        },
        ks,
        ls,
        is,
    }
}

fn i(op: Opcode, flg: Flag, ix: u64) -> Instr {
    Instr::new(op, flg, ix)
}

fn file(name: &str, fns: Vec<BcFn>) -> File {
    let mut f = File::new(name);
    f.fns = fns;
    f
}

fn to_bytes(f: &File) -> Vec<u8> {
    let mut buf = Vec::new();
    encode(f, &mut buf).expect("encoding a test file");
    buf
}

/// Serves byte payloads from a map, like a filesystem resolver would from
/// disk.
#[derive(Default)]
struct MapResolver {
    payloads: HashMap<String, Vec<u8>>,
}

impl MapResolver {
    fn with(mut self, id: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(id.to_string(), payload);
        self
    }
}

impl ModuleResolver for MapResolver {
    fn resolve(&self, id: &str) -> Result<Box<dyn Read>> {
        match self.payloads.get(id) {
            Some(p) => Ok(Box::new(Cursor::new(p.clone()))),
            None => Err(RuntimeError::ModuleNotFound(id.to_string())),
        }
    }
}

/// `return 42`
fn const_module(name: &str, n: i64) -> File {
    file(
        name,
        vec![func(
            name,
            vec![K::Int(n)],
            vec![],
            vec![i(Opcode::Push, Flag::K, 0), i(Opcode::Ret, Flag::None, 0)],
        )],
    )
}

#[test]
fn load_decodes_a_bytecode_payload() {
    let resolver = MapResolver::default().with("m", to_bytes(&const_module("m", 42)));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("m").unwrap();
    assert_eq!(m.id(), "m");
    assert_eq!(m.run(&ktx, &[]).unwrap(), Value::Number(42.0));
}

#[test]
fn load_caches_modules_by_id() {
    let resolver = MapResolver::default().with("m", to_bytes(&const_module("m", 1)));
    let ktx = Ktx::new(Box::new(resolver), None);
    let a = ktx.load("m").unwrap();
    let b = ktx.load("m").unwrap();
    assert!(Rc::ptr_eq(&a, &b));
}

#[test]
fn load_rejects_a_version_mismatch() {
    let mut payload = to_bytes(&const_module("m", 1));
    // Corrupt the packed version byte right after the signature.
    payload[4] = (9 << 4) | 9;
    let resolver = MapResolver::default().with("m", payload);
    let ktx = Ktx::new(Box::new(resolver), None);
    let err = ktx.load("m").unwrap_err();
    assert_eq!(err.to_string(), "version mismatch");
}

#[test]
fn module_value_is_memoized_across_runs() {
    // The module returns a freshly built object; a second run must hand
    // back the same object rather than re-executing.
    let f = file(
        "m",
        vec![func(
            "m",
            vec![],
            vec![],
            vec![i(Opcode::New, Flag::None, 0), i(Opcode::Ret, Flag::None, 0)],
        )],
    );
    let resolver = MapResolver::default().with("m", to_bytes(&f));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("m").unwrap();
    let first = m.run(&ktx, &[]).unwrap();
    let second = m.run(&ktx, &[]).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_module_fails_to_run() {
    let resolver = MapResolver::default().with("void", to_bytes(&file("void", vec![])));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("void").unwrap();
    assert_eq!(
        m.run(&ktx, &[]).unwrap_err().to_string(),
        "empty module: void"
    );
}

#[test]
fn self_import_is_a_cyclic_dependency() {
    // `return import("a")` inside module "a".
    let f = file(
        "a",
        vec![func(
            "a",
            vec![K::Str("a".into()), K::Str("import".into())],
            vec![],
            vec![
                i(Opcode::Push, Flag::K, 0),
                i(Opcode::Push, Flag::V, 1),
                i(Opcode::Call, Flag::An, 1),
                i(Opcode::Ret, Flag::None, 0),
            ],
        )],
    );
    let resolver = MapResolver::default().with("a", to_bytes(&f));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("a").unwrap();
    let err = m.run(&ktx, &[]).unwrap_err();
    assert_eq!(err.to_string(), "cyclic dependency: a already being loaded");
}

#[test]
fn import_of_a_missing_module_propagates() {
    let f = file(
        "a",
        vec![func(
            "a",
            vec![K::Str("ghost".into()), K::Str("import".into())],
            vec![],
            vec![
                i(Opcode::Push, Flag::K, 0),
                i(Opcode::Push, Flag::V, 1),
                i(Opcode::Call, Flag::An, 1),
                i(Opcode::Ret, Flag::None, 0),
            ],
        )],
    );
    let resolver = MapResolver::default().with("a", to_bytes(&f));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("a").unwrap();
    let err = m.run(&ktx, &[]).unwrap_err();
    assert_eq!(err.to_string(), "module not found: ghost");
}

/// A native module exposing `{ add: func(x, y) }`, with its value cached on
/// first run.
#[derive(Debug)]
struct ArithMod {
    value: RefCell<Option<Value>>,
}

impl ArithMod {
    fn new() -> Rc<ArithMod> {
        Rc::new(ArithMod {
            value: RefCell::new(None),
        })
    }
}

impl Module for ArithMod {
    fn id(&self) -> &str {
        "arith"
    }

    fn run(&self, _ktx: &Ktx, _args: &[Value]) -> Result<Value> {
        if let Some(v) = self.value.borrow().clone() {
            return Ok(v);
        }
        let ob = Object::new();
        ob.set(
            Value::str("add"),
            Value::Func(agora_vm::Func::native("add", |ktx, args| {
                let x = args.first().cloned().unwrap_or(Value::Nil).as_float(ktx)?;
                let y = args.get(1).cloned().unwrap_or(Value::Nil).as_float(ktx)?;
                Ok(Value::Number(x + y))
            })),
        )?;
        let v = Value::Object(Rc::new(ob));
        *self.value.borrow_mut() = Some(v.clone());
        Ok(v)
    }
}

impl NativeModule for ArithMod {}

#[test]
fn native_module_methods_are_callable_from_bytecode() {
    // v := import("arith"); return v.add(2, 3)
    let f = file(
        "user",
        vec![func(
            "user",
            vec![
                K::Str("v".into()),      // 0
                K::Str("arith".into()),  // 1
                K::Str("import".into()), // 2
                K::Str("add".into()),    // 3
                K::Int(2),               // 4
                K::Int(3),               // 5
            ],
            vec![0],
            vec![
                i(Opcode::Push, Flag::K, 1),
                i(Opcode::Push, Flag::V, 2),
                i(Opcode::Call, Flag::An, 1),
                i(Opcode::Pop, Flag::V, 0),
                i(Opcode::Push, Flag::K, 4),
                i(Opcode::Push, Flag::K, 5),
                i(Opcode::Push, Flag::K, 3),
                i(Opcode::Push, Flag::V, 0),
                i(Opcode::Cfld, Flag::An, 2),
                i(Opcode::Ret, Flag::None, 0),
            ],
        )],
    );
    let resolver = MapResolver::default().with("user", to_bytes(&f));
    let ktx = Ktx::new(Box::new(resolver), None);
    ktx.register_native_module(ArithMod::new());
    let m = ktx.load("user").unwrap();
    assert_eq!(m.run(&ktx, &[]).unwrap(), Value::Number(5.0));
}

#[test]
fn registering_a_native_module_overrides_a_cached_one() {
    let resolver = MapResolver::default().with("arith", to_bytes(&const_module("arith", 0)));
    let ktx = Ktx::new(Box::new(resolver), None);
    ktx.load("arith").unwrap();
    ktx.register_native_module(ArithMod::new());
    let m = ktx.load("arith").unwrap();
    // The native module won: its value is an object, not the constant.
    assert!(matches!(m.run(&ktx, &[]).unwrap(), Value::Object(_)));
}

/// A compiler that recognizes exactly one source text.
struct OneLinerCompiler;

impl Compiler for OneLinerCompiler {
    fn compile(&self, id: &str, src: &[u8]) -> Result<File> {
        if src == b"return 7" {
            Ok(const_module(id, 7))
        } else {
            Err(RuntimeError::Host("syntax error".to_string()))
        }
    }
}

#[test]
fn non_bytecode_payloads_go_through_the_compiler() {
    let resolver = MapResolver::default().with("src", b"return 7".to_vec());
    let ktx = Ktx::new(Box::new(resolver), Some(Box::new(OneLinerCompiler)));
    let m = ktx.load("src").unwrap();
    assert_eq!(m.run(&ktx, &[]).unwrap(), Value::Number(7.0));
}

#[test]
fn compile_errors_propagate() {
    let resolver = MapResolver::default().with("bad", b"return ???".to_vec());
    let ktx = Ktx::new(Box::new(resolver), Some(Box::new(OneLinerCompiler)));
    assert_eq!(ktx.load("bad").unwrap_err().to_string(), "syntax error");
}

#[test]
fn module_arguments_reach_the_entry_function() {
    // func m(greeting) { return greeting + " world" }
    let f = file(
        "m",
        vec![BcFn {
            header: Header {
                name: "m".into(),
                stack_sz: 2,
                exp_args: 1,
                parent_fn_ix: 0,
                line_start: 0,
                line_end: 0,
            },
            ks: vec![K::Str("greeting".into()), K::Str(" world".into())],
            ls: vec![0],
            is: vec![
                i(Opcode::Push, Flag::V, 0),
                i(Opcode::Push, Flag::K, 1),
                i(Opcode::Add, Flag::None, 0),
                i(Opcode::Ret, Flag::None, 0),
            ],
        }],
    );
    let resolver = MapResolver::default().with("m", to_bytes(&f));
    let ktx = Ktx::new(Box::new(resolver), None);
    let m = ktx.load("m").unwrap();
    assert_eq!(
        m.run(&ktx, &[Value::str("hello")]).unwrap(),
        Value::str("hello world")
    );
}
