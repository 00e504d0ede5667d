//! The per-call stack VM: one `FuncVm` per active call or resumption.

mod ranges;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use agora_bytecode::{Flag, Instr, Opcode};

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::{AgoraFn, Env, Func, FuncDef};
use crate::object::Object;
use crate::value::Value;
use crate::Result;

pub(crate) use ranges::RangeCoro;

/// How a run ended: a return clears coroutine state, a yield parks it.
pub(crate) enum Outcome {
    Return(Value),
    Yield(Value),
}

/// A runnable instance of a function value: program counter, value stack,
/// range-coroutine stack, and the call's locals, `this` and `args`.
pub(crate) struct FuncVm {
    val: Rc<Func>,
    proto: Rc<FuncDef>,
    pc: usize,
    stack: Vec<Value>,
    rstack: Vec<RangeCoro>,
    /// Live locals map; shared with any closure captured in this call.
    pub(crate) vars: Rc<RefCell<HashMap<String, Value>>>,
    pub(crate) this: Value,
    args: Value,
}

impl FuncVm {
    pub(crate) fn new(val: Rc<Func>, agora: &AgoraFn) -> FuncVm {
        let proto = agora.proto.clone();
        let stack = Vec::with_capacity(proto.stack_sz.max(0) as usize);
        FuncVm {
            val,
            proto,
            pc: 0,
            stack,
            rstack: Vec::new(),
            vars: Rc::new(RefCell::new(HashMap::new())),
            this: Value::Nil,
            args: Value::Nil,
        }
    }

    pub(crate) fn env(&self) -> Option<Rc<Env>> {
        match &*self.val {
            Func::Agora(a) => a.env.clone(),
            Func::Native(_) => None,
        }
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    /// Popping moves the value out, releasing the slot's reference.
    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("value stack underflow"))
    }

    /// Pop `n` call arguments pushed in source order.
    fn pop_args(&mut self, n: usize) -> Result<Vec<Value>> {
        let mut args = vec![Value::Nil; n];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(args)
    }

    fn k(&self, ix: usize) -> Result<&Value> {
        self.proto
            .k_table
            .get(ix)
            .ok_or_else(|| RuntimeError::internal(format!("constant index {} out of range", ix)))
    }

    fn k_name(&self, ktx: &Ktx, ix: usize) -> Result<String> {
        self.k(ix)?.as_string(ktx)
    }

    /// Source a value for PUSH, depending on the instruction flag.
    fn get_val(&self, ktx: &Ktx, flg: Option<Flag>, ix: usize) -> Result<Value> {
        match flg {
            Some(Flag::K) => Ok(self.k(ix)?.clone()),
            Some(Flag::V) => {
                let name = self.k_name(ktx, ix)?;
                ktx.get_var(&name, self)
                    .ok_or(RuntimeError::UnknownVariable(name))
            }
            Some(Flag::N) => Ok(Value::Nil),
            Some(Flag::T) => Ok(self.this.clone()),
            Some(Flag::F) => {
                let (fns, proto) = match &*self.val {
                    Func::Agora(a) => (
                        a.fns.clone(),
                        a.fns.get(ix).cloned().ok_or_else(|| {
                            RuntimeError::internal(format!("function index {} out of range", ix))
                        })?,
                    ),
                    Func::Native(_) => {
                        return Err(RuntimeError::internal("closure pushed outside agora code"))
                    }
                };
                // Lexical capture at definition time: the new closure links
                // this call's live locals in front of its own environment.
                let env = Rc::new(Env {
                    upvals: self.vars.clone(),
                    parent: self.env(),
                });
                Ok(Value::Func(Func::agora(proto, fns, Some(env))))
            }
            Some(Flag::A) => Ok(self.args.clone()),
            _ => Err(RuntimeError::internal("invalid flag on PUSH")),
        }
    }

    /// The reserved `args` identifier: an object indexed 0..N-1, or Nil for
    /// a zero-argument call.
    fn create_args(args: &[Value]) -> Result<Value> {
        if args.is_empty() {
            return Ok(Value::Nil);
        }
        let o = Object::new();
        for (i, v) in args.iter().enumerate() {
            o.set(Value::Number(i as f64), v.clone())?;
        }
        Ok(Value::Object(Rc::new(o)))
    }

    fn push_range(&mut self, ktx: &Ktx, args: &[Value]) -> Result<()> {
        let coro = RangeCoro::new(ktx, args)?;
        self.rstack.push(coro);
        Ok(())
    }

    fn pop_range(&mut self) -> Result<()> {
        let mut coro = self
            .rstack
            .pop()
            .ok_or_else(|| RuntimeError::internal("range stack underflow"))?;
        coro.cancel();
        Ok(())
    }

    pub(crate) fn cancel_ranges(&mut self) {
        while let Some(mut coro) = self.rstack.pop() {
            coro.cancel();
        }
    }

    /// Execute until the next return or yield. Range coroutines survive a
    /// yield (the resume must find them again) but not a return or an error.
    pub(crate) fn run(&mut self, ktx: &Ktx, args: &[Value]) -> Result<Outcome> {
        let out = self.run_loop(ktx, args);
        if !matches!(out, Ok(Outcome::Yield(_))) {
            self.cancel_ranges();
        }
        out
    }

    fn run_loop(&mut self, ktx: &Ktx, args: &[Value]) -> Result<Outcome> {
        if self.pc == 0 {
            // Initial entry: locals to Nil, parameters bound by name from
            // the first ExpArgs constants, then the args object.
            for name in &self.proto.l_table {
                self.vars.borrow_mut().insert(name.clone(), Value::Nil);
            }
            for j in 0..self.proto.exp_args.max(0) as usize {
                let name = self.k_name(ktx, j)?;
                let v = args.get(j).cloned().unwrap_or(Value::Nil);
                self.vars.borrow_mut().insert(name, v);
            }
            self.args = Self::create_args(args)?;
        } else {
            // Coroutine resume: the resumed-with value lands on the stack.
            self.push(args.first().cloned().unwrap_or(Value::Nil));
        }

        loop {
            ktx.check_cancelled()?;
            let i = *self
                .proto
                .code
                .get(self.pc)
                .ok_or_else(|| RuntimeError::internal("program counter out of range"))?;
            let op = i
                .opcode()
                .ok_or_else(|| RuntimeError::internal("unknown opcode"))?;
            let (flg, ix) = (i.flag(), i.index() as usize);
            // A jump that needs a different delta sets the pc itself.
            self.pc += 1;

            match op {
                Opcode::Ret => {
                    return Ok(Outcome::Return(self.pop()?));
                }

                Opcode::Yld => {
                    return Ok(Outcome::Yield(self.pop()?));
                }

                Opcode::Push => {
                    let v = self.get_val(ktx, flg, ix)?;
                    self.push(v);
                }

                Opcode::Pop => {
                    let name = self.k_name(ktx, ix)?;
                    let v = self.pop()?;
                    if !ktx.set_var(&name, v, self) {
                        return Err(RuntimeError::UnknownVariable(name));
                    }
                }

                Opcode::Add => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let v = ktx.arithmetic.add(ktx, &x, &y)?;
                    self.push(v);
                }

                Opcode::Sub => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let v = ktx.arithmetic.sub(ktx, &x, &y)?;
                    self.push(v);
                }

                Opcode::Mul => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let v = ktx.arithmetic.mul(ktx, &x, &y)?;
                    self.push(v);
                }

                Opcode::Div => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let v = ktx.arithmetic.div(ktx, &x, &y)?;
                    self.push(v);
                }

                Opcode::Mod => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let v = ktx.arithmetic.modulo(ktx, &x, &y)?;
                    self.push(v);
                }

                Opcode::Not => {
                    let x = self.pop()?;
                    let b = x.as_bool(ktx)?;
                    self.push(Value::Bool(!b));
                }

                Opcode::Unm => {
                    let x = self.pop()?;
                    let v = ktx.arithmetic.unm(ktx, &x)?;
                    self.push(v);
                }

                Opcode::Eq | Opcode::Neq | Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                    let y = self.pop()?;
                    let x = self.pop()?;
                    let ord = ktx.comparer.cmp(ktx, &x, &y)?;
                    let b = match op {
                        Opcode::Eq => ord.is_eq(),
                        Opcode::Neq => ord.is_ne(),
                        Opcode::Lt => ord.is_lt(),
                        Opcode::Lte => ord.is_le(),
                        Opcode::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    };
                    self.push(Value::Bool(b));
                }

                Opcode::Test => {
                    let v = self.pop()?;
                    if !v.as_bool(ktx)? {
                        self.pc += ix;
                    }
                }

                Opcode::Jmp => match flg {
                    Some(Flag::Jf) => self.pc += ix,
                    Some(Flag::Jb) => {
                        // The pc already moved to the next instruction.
                        self.pc = self
                            .pc
                            .checked_sub(ix + 1)
                            .ok_or_else(|| RuntimeError::internal("jump out of range"))?;
                    }
                    _ => return Err(RuntimeError::internal("invalid flag on JMP")),
                },

                Opcode::New => {
                    let o = Object::new();
                    for _ in 0..ix {
                        let key = self.pop()?;
                        let val = self.pop()?;
                        o.set(key, val)?;
                    }
                    self.push(Value::Object(Rc::new(o)));
                }

                Opcode::Sfld => {
                    let target = self.pop()?;
                    let key = self.pop()?;
                    let val = self.pop()?;
                    match target {
                        Value::Object(o) => o.set(key, val)?,
                        other => {
                            return Err(RuntimeError::conversion(other.type_name(), "object"))
                        }
                    }
                }

                Opcode::Gfld => {
                    let target = self.pop()?;
                    let key = self.pop()?;
                    match target {
                        Value::Object(o) => {
                            let v = o.get(&key);
                            self.push(v);
                        }
                        other => {
                            return Err(RuntimeError::conversion(other.type_name(), "object"))
                        }
                    }
                }

                Opcode::Cfld => {
                    let target = self.pop()?;
                    let key = self.pop()?;
                    let call_args = self.pop_args(ix)?;
                    match target {
                        Value::Object(o) => {
                            let v = Object::call_method(&o, ktx, &key, &call_args)?;
                            self.push(v);
                        }
                        other => {
                            return Err(RuntimeError::conversion(other.type_name(), "object"))
                        }
                    }
                }

                Opcode::Call => {
                    let callee = self.pop()?;
                    let call_args = self.pop_args(ix)?;
                    match callee {
                        Value::Func(f) => {
                            let v = Func::call(&f, ktx, Value::Nil, &call_args)?;
                            self.push(v);
                        }
                        other => return Err(RuntimeError::conversion(other.type_name(), "func")),
                    }
                }

                Opcode::Rngs => {
                    let range_args = self.pop_args(ix)?;
                    self.push_range(ktx, &range_args)?;
                }

                Opcode::Rngp => {
                    let top = self
                        .rstack
                        .len()
                        .checked_sub(1)
                        .ok_or_else(|| RuntimeError::internal("range stack underflow"))?;
                    let step = self.rstack[top].resume(ktx)?;
                    match step {
                        Some(v) => {
                            // Exactly ix yielded slots, padded with Nil,
                            // then the has-more flag.
                            if ix > 0 {
                                self.push(v);
                            }
                            for _ in 1..ix.max(1) {
                                self.push(Value::Nil);
                            }
                            self.push(Value::Bool(true));
                        }
                        None => self.push(Value::Bool(false)),
                    }
                }

                Opcode::Rnge => {
                    self.pop_range()?;
                }

                Opcode::Dump => {
                    if ktx.debug {
                        ktx.debug_write(&self.dump());
                        ktx.dump_frames(ix);
                    }
                }
            }
        }
    }

    /// Pretty-print this call's state: constants, variables, and windows of
    /// the stack and instruction stream around the current position.
    pub(crate) fn dump(&self) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf, "\n> {} (Func)", self.proto.name);
        let _ = writeln!(buf, "  Constants:");
        for (i, v) in self.proto.k_table.iter().enumerate() {
            let _ = writeln!(buf, "    [{:3}] {}", i, v.dump());
        }
        let _ = writeln!(buf, "\n  Variables:");
        if !matches!(self.this, Value::Nil) {
            let _ = writeln!(buf, "    [this] = {}", self.this.dump());
        }
        if !matches!(self.args, Value::Nil) {
            let _ = writeln!(buf, "    [args] = {}", self.args.dump());
        }
        let vars = self.vars.borrow();
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();
        for name in names {
            if let Some(v) = vars.get(name) {
                let _ = writeln!(buf, "    {} = {}", name, v.dump());
            }
        }
        let _ = writeln!(buf, "\n  Stack:");
        let sp = self.stack.len();
        for i in sp.saturating_sub(5)..=sp {
            let marker = if i == sp { "sp->" } else { "    " };
            let v = self.stack.get(i).cloned().unwrap_or(Value::Nil);
            let _ = writeln!(buf, "{}[{:3}] {}", marker, i, v.dump());
        }
        let _ = writeln!(buf, "\n  Instructions:");
        for i in self.pc.saturating_sub(10)..(self.pc + 10).min(self.proto.code.len()) {
            let marker = if i == self.pc { "pc->" } else { "    " };
            let _ = writeln!(buf, "{}[{:3}] {}", marker, i, self.annotate(self.proto.code[i]));
        }
        buf
    }

    /// One instruction plus a comment describing what its operand resolves
    /// to.
    fn annotate(&self, i: Instr) -> String {
        let base = i.to_string();
        let ix = i.index() as usize;
        match i.flag() {
            Some(Flag::K) => match self.proto.k_table.get(ix) {
                Some(v) => format!("{} ; {}", base, v.dump()),
                None => base,
            },
            Some(Flag::V) => match self.proto.k_table.get(ix) {
                Some(v) => format!("{} ; var {}", base, v),
                None => base,
            },
            Some(Flag::N) => format!("{} ; nil", base),
            Some(Flag::T) => format!("{} ; [this]", base),
            Some(Flag::A) => format!("{} ; [args]", base),
            _ => base,
        }
    }
}
