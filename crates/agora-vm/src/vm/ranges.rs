//! Range coroutines: the suspendable iterators behind `for … range`.
//!
//! Each source type gets an explicit resumable state machine rather than a
//! thread-backed coroutine; a machine advances one step per resume and
//! reports the end of its sequence by returning `None`.

use std::rc::Rc;

use crate::ctx::Ktx;
use crate::error::RuntimeError;
use crate::func::Func;
use crate::object::Object;
use crate::value::Value;
use crate::Result;

/// A live range coroutine on a VM's range stack.
#[derive(Debug)]
pub(crate) enum RangeCoro {
    Number(NumberRange),
    Str(StringRange),
    Object(ObjectRange),
    Func(FuncRange),
    /// Cancelled or exhausted; resuming yields nothing.
    Done,
}

/// Counts from `cur` toward `max` in steps of `inc`; descending when `inc`
/// is negative.
#[derive(Debug)]
pub(crate) struct NumberRange {
    cur: i64,
    max: i64,
    inc: i64,
}

/// Iterates a string either byte by byte or separator piece by piece, with
/// an optional maximum count (`-1` for unbounded).
#[derive(Debug)]
pub(crate) enum StringRange {
    Bytes {
        src: Vec<u8>,
        idx: usize,
        cnt: i64,
    },
    Split {
        rest: String,
        sep: String,
        emitted: i64,
        max: i64,
        done: bool,
    },
}

/// Yields `{k, v}` objects for each entry; the key snapshot is taken lazily
/// on the first resume so a `__keys` override runs with the context.
#[derive(Debug)]
pub(crate) struct ObjectRange {
    obj: Rc<Object>,
    keys: Option<Vec<Value>>,
    idx: usize,
}

/// Drives an agora function as a generator: called with the trailing range
/// arguments on the first resume, with none afterwards, yielding while the
/// function stays suspended. Its final return value is discarded.
#[derive(Debug)]
pub(crate) struct FuncRange {
    f: Rc<Func>,
    first_args: Option<Vec<Value>>,
}

impl RangeCoro {
    /// Build a coroutine for `RNGS`, dispatching on the first argument's
    /// dynamic type.
    pub(crate) fn new(ktx: &Ktx, args: &[Value]) -> Result<RangeCoro> {
        let first = args
            .first()
            .ok_or_else(|| RuntimeError::internal("range requires at least one argument"))?;
        match first {
            Value::Number(_) => {
                let mut start = 0;
                let mut max = first.as_int(ktx)?;
                let mut inc = 1;
                if args.len() > 1 {
                    start = max;
                    max = args[1].as_int(ktx)?;
                }
                if args.len() > 2 {
                    inc = args[2].as_int(ktx)?;
                }
                Ok(RangeCoro::Number(NumberRange {
                    cur: start,
                    max,
                    inc,
                }))
            }
            Value::Str(src) => {
                let mut sep = String::new();
                if args.len() > 1 && args[1].as_bool(ktx)? {
                    sep = args[1].as_string(ktx)?;
                }
                let max = if args.len() > 2 {
                    args[2].as_int(ktx)?
                } else {
                    -1
                };
                if sep.is_empty() {
                    let bytes = src.as_bytes().to_vec();
                    let cnt = if max >= 0 {
                        max.min(bytes.len() as i64)
                    } else {
                        bytes.len() as i64
                    };
                    Ok(RangeCoro::Str(StringRange::Bytes {
                        src: bytes,
                        idx: 0,
                        cnt,
                    }))
                } else {
                    Ok(RangeCoro::Str(StringRange::Split {
                        rest: src.to_string(),
                        sep,
                        emitted: 0,
                        max,
                        done: max == 0,
                    }))
                }
            }
            Value::Object(o) => Ok(RangeCoro::Object(ObjectRange {
                obj: o.clone(),
                keys: None,
                idx: 0,
            })),
            Value::Func(f) => {
                if matches!(&**f, Func::Native(_)) {
                    return Err(RuntimeError::conversion("native func", "range"));
                }
                f.reset();
                Ok(RangeCoro::Func(FuncRange {
                    f: f.clone(),
                    first_args: Some(args[1..].to_vec()),
                }))
            }
            other => Err(RuntimeError::conversion(other.type_name(), "range")),
        }
    }

    /// Advance one step. `Ok(None)` is the end-of-sequence sentinel.
    pub(crate) fn resume(&mut self, ktx: &Ktx) -> Result<Option<Value>> {
        match self {
            RangeCoro::Number(r) => {
                let more = if r.inc >= 0 { r.cur < r.max } else { r.cur > r.max };
                if !more {
                    *self = RangeCoro::Done;
                    return Ok(None);
                }
                let v = r.cur;
                r.cur += r.inc;
                Ok(Some(Value::Number(v as f64)))
            }
            RangeCoro::Str(StringRange::Bytes { src, idx, cnt }) => {
                if (*idx as i64) >= *cnt {
                    *self = RangeCoro::Done;
                    return Ok(None);
                }
                let b = src[*idx];
                *idx += 1;
                Ok(Some(Value::str(
                    String::from_utf8_lossy(&[b]).into_owned(),
                )))
            }
            RangeCoro::Str(StringRange::Split {
                rest,
                sep,
                emitted,
                max,
                done,
            }) => {
                if *done || (*max >= 0 && *emitted >= *max) {
                    *self = RangeCoro::Done;
                    return Ok(None);
                }
                let piece = match rest.split_once(sep.as_str()) {
                    Some((head, tail)) => {
                        let head = head.to_string();
                        *rest = tail.to_string();
                        head
                    }
                    None => {
                        *done = true;
                        std::mem::take(rest)
                    }
                };
                *emitted += 1;
                Ok(Some(Value::str(piece)))
            }
            RangeCoro::Object(r) => {
                if r.keys.is_none() {
                    let keys = match Object::keys(&r.obj, ktx)? {
                        Value::Object(k) => k,
                        other => {
                            return Err(RuntimeError::conversion(other.type_name(), "object"))
                        }
                    };
                    let n = Object::len(&keys, ktx)?.as_int(ktx)?;
                    let mut snapshot = Vec::with_capacity(n.max(0) as usize);
                    for i in 0..n {
                        snapshot.push(keys.get(&Value::Number(i as f64)));
                    }
                    r.keys = Some(snapshot);
                }
                let key = match r.keys.as_ref() {
                    Some(ks) if r.idx < ks.len() => ks[r.idx].clone(),
                    _ => {
                        *self = RangeCoro::Done;
                        return Ok(None);
                    }
                };
                r.idx += 1;
                let entry = Object::new();
                entry.set(Value::str("k"), key.clone())?;
                entry.set(Value::str("v"), r.obj.get(&key))?;
                Ok(Some(Value::Object(Rc::new(entry))))
            }
            RangeCoro::Func(r) => {
                let args = r.first_args.take().unwrap_or_default();
                let v = Func::call(&r.f, ktx, Value::Nil, &args)?;
                if Func::status(&r.f, ktx) == "suspended" {
                    Ok(Some(v))
                } else {
                    // The generator returned: its sequence is over and the
                    // return value is not part of it.
                    *self = RangeCoro::Done;
                    Ok(None)
                }
            }
            RangeCoro::Done => Ok(None),
        }
    }

    /// Release the coroutine. A generator function keeps its own suspended
    /// state; only this handle is discarded.
    pub(crate) fn cancel(&mut self) {
        *self = RangeCoro::Done;
    }
}

impl RangeCoro {
    #[cfg(test)]
    fn drain(&mut self, ktx: &Ktx) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Some(v)) = self.resume(ktx) {
            out.push(v);
        }
        out
    }
}
