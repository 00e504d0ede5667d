//! Function prototypes, closures and coroutine state.
//!
//! Calling and status inspection need the function's shared handle (for
//! frame identity and closure capture), so they are associated functions
//! over `&Rc<Func>`; `Value::call` and `Value::status` wrap them for
//! callers holding plain values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use agora_bytecode::Instr;

use crate::ctx::Ktx;
use crate::value::Value;
use crate::vm::{FuncVm, Outcome};
use crate::Result;

/// An immutable function prototype, built once when its module is
/// instantiated from a decoded bytecode file.
#[derive(Debug)]
pub struct FuncDef {
    pub name: String,
    pub stack_sz: i64,
    pub exp_args: i64,
    /// Decoded constant table. The first `exp_args` entries are the
    /// parameter names.
    pub k_table: Vec<Value>,
    /// Names of the declared locals.
    pub l_table: Vec<String>,
    pub code: Vec<Instr>,
}

/// One link of a closure's environment chain. `upvals` is the defining
/// call's live locals map, shared rather than copied, so assignments
/// through either side stay visible to both.
#[derive(Debug)]
pub struct Env {
    pub(crate) upvals: Rc<RefCell<HashMap<String, Value>>>,
    pub(crate) parent: Option<Rc<Env>>,
}

pub(crate) type NativeImpl = Box<dyn Fn(&Ktx, &[Value]) -> Result<Value>>;

/// A host function exposed to the language.
pub struct NativeFn {
    name: String,
    f: NativeImpl,
}

/// An agora closure: a prototype bound to its captured environment, plus
/// the coroutine state left behind by a yield.
pub struct AgoraFn {
    pub(crate) proto: Rc<FuncDef>,
    /// The owning module's function table, used when PUSH F instantiates a
    /// nested closure.
    pub(crate) fns: Rc<Vec<Rc<FuncDef>>>,
    pub(crate) env: Option<Rc<Env>>,
    /// Live coroutine state. Taken out for the duration of a call, so a
    /// suspended function can never be entered twice concurrently.
    pub(crate) coro: RefCell<Option<Box<FuncVm>>>,
}

/// A callable value: either a host native or an agora closure.
pub enum Func {
    Native(NativeFn),
    Agora(AgoraFn),
}

impl Func {
    pub fn native(
        name: impl Into<String>,
        f: impl Fn(&Ktx, &[Value]) -> Result<Value> + 'static,
    ) -> Rc<Func> {
        Rc::new(Func::Native(NativeFn {
            name: name.into(),
            f: Box::new(f),
        }))
    }

    pub(crate) fn agora(
        proto: Rc<FuncDef>,
        fns: Rc<Vec<Rc<FuncDef>>>,
        env: Option<Rc<Env>>,
    ) -> Rc<Func> {
        Rc::new(Func::Agora(AgoraFn {
            proto,
            fns,
            env,
            coro: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            Func::Native(n) => &n.name,
            Func::Agora(a) => &a.proto.name,
        }
    }

    /// Invoke `f`. Natives ignore `this`; agora functions bind it anew on
    /// every call since the same value may have been attached to an object
    /// in the meantime. A call on a suspended agora function resumes its
    /// saved VM instead of starting a fresh one.
    pub fn call(f: &Rc<Func>, ktx: &Ktx, this: Value, args: &[Value]) -> Result<Value> {
        ktx.check_cancelled()?;
        match &**f {
            Func::Native(n) => {
                ktx.push_frame(f.clone());
                let res = (n.f)(ktx, args);
                ktx.pop_frame();
                res
            }
            Func::Agora(a) => {
                let mut vm = match a.coro.borrow_mut().take() {
                    Some(vm) => vm,
                    None => Box::new(FuncVm::new(f.clone(), a)),
                };
                vm.this = this;
                ktx.push_frame(f.clone());
                let out = vm.run(ktx, args);
                ktx.pop_frame();
                match out {
                    Ok(Outcome::Return(v)) => Ok(v),
                    Ok(Outcome::Yield(v)) => {
                        // Park the VM (including its live range stack) for
                        // the next resume.
                        *a.coro.borrow_mut() = Some(vm);
                        Ok(v)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Coroutine status: `"running"` while a call frame holds this value,
    /// `"suspended"` when it carries parked state, empty otherwise.
    /// Natives report the empty status.
    pub fn status(f: &Rc<Func>, ktx: &Ktx) -> &'static str {
        if ktx.is_running(f) {
            return "running";
        }
        match &**f {
            Func::Agora(a) if a.coro.borrow().is_some() => "suspended",
            _ => "",
        }
    }

    /// Drop any parked coroutine state, cancelling range coroutines it
    /// still owns. A no-op on natives and fresh functions.
    pub fn reset(&self) {
        if let Func::Agora(a) = self {
            if let Some(mut vm) = a.coro.borrow_mut().take() {
                vm.cancel_ranges();
            }
        }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Func::Native(n) => write!(f, "<native func {}>", n.name),
            Func::Agora(a) => write!(f, "<func {}>", a.proto.name),
        }
    }
}
