//! The execution context: module cache, frame stack, built-ins, policies.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agora_bytecode::{decode, SIGNATURE};

use crate::builtins;
use crate::error::RuntimeError;
use crate::func::Func;
use crate::module::{AgoraModule, Compiler, FileResolver, Module, ModuleResolver, NativeModule};
use crate::object::Object;
use crate::ops::{Arithmetic, Comparer, DefaultArithmetic, DefaultComparer};
use crate::value::Value;
use crate::vm::FuncVm;
use crate::Result;

/// Clonable cancellation flag threaded through the runtime. The VM checks
/// it at every dispatch step, native calls at entry; the host flips it from
/// any thread to stop a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An execution context. Self-contained and share-nothing: a context is not
/// thread-safe, but distinct contexts may run concurrently as long as their
/// collaborators (resolver, compiler, policies) do not share mutable state.
///
/// The policy fields are public so a host can swap them between runs; the
/// interior-mutable state (frames, module cache) is managed through `&self`
/// because the VM re-enters the context during nested calls.
pub struct Ktx {
    pub arithmetic: Box<dyn Arithmetic>,
    pub comparer: Box<dyn Comparer>,
    pub resolver: Box<dyn ModuleResolver>,
    pub compiler: Option<Box<dyn Compiler>>,
    /// Debug mode routes DUMP output and diagnostics to the stdout sink.
    pub debug: bool,
    cancel: CancelToken,
    stdout: RefCell<Box<dyn Write>>,

    frames: RefCell<Vec<Rc<Func>>>,
    loading: RefCell<HashSet<String>>,
    modules: RefCell<HashMap<String, Rc<dyn Module>>>,
    builtins: Rc<Object>,
}

impl Default for Ktx {
    fn default() -> Ktx {
        Ktx::new(Box::new(FileResolver), None)
    }
}

impl Ktx {
    pub fn new(resolver: Box<dyn ModuleResolver>, compiler: Option<Box<dyn Compiler>>) -> Ktx {
        Ktx {
            arithmetic: Box::new(DefaultArithmetic),
            comparer: Box::new(DefaultComparer),
            resolver,
            compiler,
            debug: false,
            cancel: CancelToken::new(),
            stdout: RefCell::new(Box::new(io::stdout())),
            frames: RefCell::new(Vec::new()),
            loading: RefCell::new(HashSet::new()),
            modules: RefCell::new(HashMap::new()),
            builtins: builtins::install(),
        }
    }

    /// Replace the stdout sink (used by DUMP and debug diagnostics).
    pub fn set_stdout(&mut self, w: Box<dyn Write>) {
        self.stdout = RefCell::new(w);
    }

    /// The context's cancellation token; clone it to cancel from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve and load the module identified by `id`, returning the cached
    /// instance on repeated loads. The payload is sniffed for the bytecode
    /// signature; anything else goes through the pluggable compiler.
    /// Loading never executes the module.
    pub fn load(&self, id: &str) -> Result<Rc<dyn Module>> {
        self.check_cancelled()?;
        if id.is_empty() {
            return Err(RuntimeError::ModuleNotFound(id.to_string()));
        }
        if let Some(m) = self.modules.borrow().get(id) {
            return Ok(m.clone());
        }
        let mut r = self.resolver.resolve(id)?;
        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;
        let file = if payload.starts_with(&SIGNATURE) {
            decode(&mut &payload[..])?
        } else {
            match &self.compiler {
                Some(c) => c.compile(id, &payload)?,
                None => {
                    return Err(RuntimeError::Host(format!(
                        "module {} is not bytecode and no compiler is configured",
                        id
                    )))
                }
            }
        };
        let module: Rc<dyn Module> = Rc::new(AgoraModule::new(file)?);
        self.modules
            .borrow_mut()
            .insert(id.to_string(), module.clone());
        Ok(module)
    }

    /// Register a native module under its ID, replacing any cached module
    /// with the same ID.
    pub fn register_native_module<M: NativeModule + 'static>(&self, m: Rc<M>) {
        m.set_ktx(self);
        let id = m.id().to_string();
        self.modules.borrow_mut().insert(id, m as Rc<dyn Module>);
    }

    /// Mark a module as executing; a second mark before the first completes
    /// is a cyclic dependency.
    pub(crate) fn push_module(&self, id: &str) -> Result<()> {
        if !self.loading.borrow_mut().insert(id.to_string()) {
            return Err(RuntimeError::CyclicDependency(id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn pop_module(&self, id: &str) {
        self.loading.borrow_mut().remove(id);
    }

    pub(crate) fn push_frame(&self, f: Rc<Func>) {
        self.frames.borrow_mut().push(f);
    }

    pub(crate) fn pop_frame(&self) {
        self.frames.borrow_mut().pop();
    }

    /// True when `f` occupies any frame on the call stack.
    pub(crate) fn is_running(&self, f: &Rc<Func>) -> bool {
        self.frames.borrow().iter().any(|frame| Rc::ptr_eq(frame, f))
    }

    /// Look up `name` through the VM's locals, then the closure's
    /// environment chain, then the built-ins.
    pub(crate) fn get_var(&self, name: &str, vm: &FuncVm) -> Option<Value> {
        if let Some(v) = vm.vars.borrow().get(name) {
            return Some(v.clone());
        }
        let mut env = vm.env();
        while let Some(e) = env {
            if let Some(v) = e.upvals.borrow().get(name) {
                return Some(v.clone());
            }
            env = e.parent.clone();
        }
        let b = self.builtins.get(&Value::str(name));
        if matches!(b, Value::Nil) {
            None
        } else {
            Some(b)
        }
    }

    /// Assign to the first scope that already defines `name`: the VM's
    /// locals, then the environment chain. Built-ins are read-only; a miss
    /// everywhere reports failure for the caller to raise.
    pub(crate) fn set_var(&self, name: &str, v: Value, vm: &FuncVm) -> bool {
        if vm.vars.borrow().contains_key(name) {
            vm.vars.borrow_mut().insert(name.to_string(), v);
            return true;
        }
        let mut env = vm.env();
        while let Some(e) = env {
            if e.upvals.borrow().contains_key(name) {
                e.upvals.borrow_mut().insert(name.to_string(), v);
                return true;
            }
            env = e.parent.clone();
        }
        false
    }

    pub(crate) fn debug_write(&self, s: &str) {
        let _ = self.stdout.borrow_mut().write_all(s.as_bytes());
    }

    /// Print the names of up to `n` frames, innermost first.
    pub(crate) fn dump_frames(&self, n: usize) {
        let frames = self.frames.borrow();
        for (i, f) in frames.iter().enumerate().rev().take(n) {
            self.debug_write(&format!("\n[Frame {:3}] {}\n", i, f.name()));
        }
    }
}
