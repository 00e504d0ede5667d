//! Agora VM — stack virtual machine and runtime for the agora scripting
//! language.
//!
//! The runtime executes modules decoded by the `agora-bytecode` crate. A
//! [`Ktx`] execution context owns the module cache, the call-frame stack and
//! the built-in functions; loading a module yields a [`Module`] whose entry
//! function runs on a per-call stack VM. Values are dynamically typed
//! ([`Value`]), objects are associative arrays with meta-method dispatch
//! ([`Object`]), and functions ([`Func`]) are either host natives or agora
//! closures that can suspend as coroutines.

mod builtins;
mod ctx;
mod error;
mod func;
mod module;
mod object;
mod ops;
mod value;
mod vm;

pub use ctx::{CancelToken, Ktx};
pub use error::RuntimeError;
pub use func::{Env, Func, FuncDef};
pub use module::{AgoraModule, Compiler, FileResolver, Module, ModuleResolver, NativeModule};
pub use object::Object;
pub use ops::{Arithmetic, Comparer, DefaultArithmetic, DefaultComparer};
pub use value::Value;

/// Crate-wide result alias; every runtime operation reports [`RuntimeError`].
pub type Result<T> = std::result::Result<T, RuntimeError>;
