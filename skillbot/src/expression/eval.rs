use super::parser::{Accessor, AssignOp, BinaryOp, CompareOp, Expr, Statement, Target};
use crate::errors::ExprError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Read access to named values.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

/// Write access to named values, used by assignment statements.
pub trait ScopeMut: Scope {
    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value>;
    fn bind(&mut self, name: &str, value: Value);
}

impl Scope for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl ScopeMut for Map<String, Value> {
    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.get_mut(name)
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.insert(name.to_string(), value);
    }
}

/// Python-style truthiness: `None`, `False`, zero, and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// Render a value the way `str()` does in skill expressions.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        _ => None,
    }
}

fn num_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::from(i),
        Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
    }
}

fn as_index(value: &Value) -> Result<i64, ExprError> {
    match as_num(value) {
        Some(Num::Int(i)) => Ok(i),
        _ => Err(ExprError::Type(format!(
            "indices must be integers, not {}",
            type_name(value)
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx >= 0 && idx < len {
        Some(idx as usize)
    } else {
        None
    }
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (as_num(left), as_num(right)) {
        (Some(l), Some(r)) if !matches!((left, right), (Value::Bool(_), Value::Bool(_))) => {
            l.as_f64() == r.as_f64()
        }
        _ => match (left, right) {
            (Value::Array(l), Value::Array(r)) => {
                l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
            }
            _ => left == right,
        },
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .ok_or_else(|| ExprError::Type("cannot order NaN".into()));
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (Value::Array(l), Value::Array(r)) => {
            for (a, b) in l.iter().zip(r) {
                let ord = order(a, b)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(l.len().cmp(&r.len()))
        }
        _ => Err(ExprError::Type(format!(
            "'<' not supported between {} and {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExprError> {
    match container {
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ExprError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Ok(map.contains_key(&to_display_string(item))),
        Value::Null => Ok(false),
        other => Err(ExprError::Type(format!(
            "argument of type {} is not iterable",
            type_name(other)
        ))),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, ExprError> {
    Ok(match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => !values_equal(left, right),
        CompareOp::Lt => order(left, right)? == Ordering::Less,
        CompareOp::LtE => order(left, right)? != Ordering::Greater,
        CompareOp::Gt => order(left, right)? == Ordering::Greater,
        CompareOp::GtE => order(left, right)? != Ordering::Less,
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => left == right,
        CompareOp::IsNot => left != right,
    })
}

/// `None` only for `i64::MIN // -1`.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Longest string (in bytes) or list a `*` repetition may build.
const MAX_REPEAT_LEN: usize = 1 << 24;

fn repeat_value(value: &Value, times: i64) -> Result<Option<Value>, ExprError> {
    let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
    let len = match value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.len(),
        _ => return Ok(None),
    };
    if len.checked_mul(times).map_or(true, |total| total > MAX_REPEAT_LEN) {
        return Err(ExprError::Type(format!(
            "repeating a {} of length {} by {} is too large",
            type_name(value),
            len,
            times
        )));
    }
    Ok(match value {
        Value::String(s) => Some(Value::String(s.repeat(times))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(len * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Some(Value::Array(out))
        }
        _ => None,
    })
}

pub fn binary(left: &Value, op: BinaryOp, right: &Value) -> Result<Value, ExprError> {
    let unsupported = || {
        ExprError::Type(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            type_name(left),
            type_name(right)
        ))
    };

    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        let result = match (l, r, op) {
            (Num::Int(a), Num::Int(b), BinaryOp::Add) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            (Num::Int(a), Num::Int(b), BinaryOp::Sub) => a
                .checked_sub(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 - b as f64)),
            (Num::Int(a), Num::Int(b), BinaryOp::Mul) => a
                .checked_mul(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 * b as f64)),
            (_, _, BinaryOp::Div) => {
                if r.as_f64() == 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                Num::Float(l.as_f64() / r.as_f64())
            }
            (Num::Int(a), Num::Int(b), BinaryOp::FloorDiv) => {
                if b == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                floor_div(a, b)
                    .map(Num::Int)
                    .unwrap_or(Num::Float((a as f64 / b as f64).floor()))
            }
            (Num::Int(a), Num::Int(b), BinaryOp::Mod) => {
                if b == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                Num::Int(floor_mod(a, b))
            }
            (_, _, BinaryOp::FloorDiv) => {
                if r.as_f64() == 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                Num::Float((l.as_f64() / r.as_f64()).floor())
            }
            (_, _, BinaryOp::Mod) => {
                let (a, b) = (l.as_f64(), r.as_f64());
                if b == 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                Num::Float(a - b * (a / b).floor())
            }
            (_, _, BinaryOp::Add) => Num::Float(l.as_f64() + r.as_f64()),
            (_, _, BinaryOp::Sub) => Num::Float(l.as_f64() - r.as_f64()),
            (_, _, BinaryOp::Mul) => Num::Float(l.as_f64() * r.as_f64()),
        };
        return Ok(num_value(result));
    }

    match (left, op, right) {
        (Value::String(a), BinaryOp::Add, Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), BinaryOp::Add, Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Object(a), BinaryOp::Add, Value::Object(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(out))
        }
        (seq, BinaryOp::Mul, n) | (n, BinaryOp::Mul, seq)
            if matches!(as_num(n), Some(Num::Int(_))) =>
        {
            let times = as_index(n)?;
            repeat_value(seq, times)?.ok_or_else(unsupported)
        }
        _ => Err(unsupported()),
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, ExprError> {
    match base {
        Value::Array(items) => {
            let i = as_index(index)?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| ExprError::Index(format!("list index {i} out of range")))
        }
        Value::String(s) => {
            let i = as_index(index)?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(i, chars.len())
                .map(|i| Value::String(chars[i].to_string()))
                .ok_or_else(|| ExprError::Index(format!("string index {i} out of range")))
        }
        Value::Object(map) => {
            let key = to_display_string(index);
            map.get(&key)
                .cloned()
                .ok_or_else(|| ExprError::Index(format!("key '{key}' not found")))
        }
        other => Err(ExprError::Type(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn slice_bounds(len: usize, start: Option<i64>, stop: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { len + v } else { v };
        v.clamp(0, len)
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = stop.map(clamp).unwrap_or(len);
    if e < s {
        (s as usize, s as usize)
    } else {
        (s as usize, e as usize)
    }
}

fn slice_value(base: &Value, start: Option<i64>, stop: Option<i64>) -> Result<Value, ExprError> {
    match base {
        Value::Array(items) => {
            let (s, e) = slice_bounds(items.len(), start, stop);
            Ok(Value::Array(items[s..e].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(chars.len(), start, stop);
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        other => Err(ExprError::Type(format!(
            "'{}' object cannot be sliced",
            type_name(other)
        ))),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if args.len() < min || args.len() > max {
        return Err(ExprError::Type(format!(
            "{name}() takes {min}..={max} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn to_int(value: &Value) -> Result<Value, ExprError> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| trimmed.parse::<f64>().map(|f| Value::from(f.trunc() as i64)))
                .map_err(|_| ExprError::Type(format!("invalid literal for int(): '{s}'")))
        }
        Value::Null => Err(ExprError::Type("int() argument must not be None".into())),
        other => match as_num(other) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            Some(Num::Float(f)) => Ok(Value::from(f.trunc() as i64)),
            None => Err(ExprError::Type(format!(
                "int() argument must be a string or a number, not {}",
                type_name(other)
            ))),
        },
    }
}

fn to_float(value: &Value) -> Result<Value, ExprError> {
    let f = match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExprError::Type(format!("could not convert string to float: '{s}'")))?,
        other => as_num(other)
            .map(Num::as_f64)
            .ok_or_else(|| ExprError::Type(format!("float() argument must be a number, not {}", type_name(other))))?,
    };
    Ok(num_value(Num::Float(f)))
}

fn extreme(name: &str, args: &[Value], want: Ordering) -> Result<Value, ExprError> {
    let items: Vec<Value> = match args {
        [Value::Array(items)] => items.clone(),
        _ => args.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                if order(&item, &current)? == want {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.ok_or_else(|| ExprError::Type(format!("{name}() arg is an empty sequence")))
}

fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(ExprError::Type(format!(
                    "object of type '{}' has no len()",
                    type_name(other)
                ))),
            }
        }
        "int" => {
            arity(name, &args, 1, 1)?;
            to_int(&args[0])
        }
        "float" => {
            arity(name, &args, 1, 1)?;
            to_float(&args[0])
        }
        "str" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::String(to_display_string(&args[0])))
        }
        "bool" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(is_truthy(&args[0])))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match as_num(&args[0]) {
                Some(Num::Int(i)) => Ok(i
                    .checked_abs()
                    .map(Value::from)
                    .unwrap_or_else(|| num_value(Num::Float((i as f64).abs())))),
                Some(Num::Float(f)) => Ok(num_value(Num::Float(f.abs()))),
                None => Err(ExprError::Type("bad operand type for abs()".into())),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let x = as_num(&args[0])
                .ok_or_else(|| ExprError::Type("round() needs a number".into()))?
                .as_f64();
            match args.get(1) {
                None => Ok(Value::from(x.round() as i64)),
                Some(digits) => {
                    let factor = 10f64.powi(as_index(digits)? as i32);
                    Ok(num_value(Num::Float((x * factor).round() / factor)))
                }
            }
        }
        "min" => extreme(name, &args, Ordering::Less),
        "max" => extreme(name, &args, Ordering::Greater),
        "sum" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Array(items) => items
                    .iter()
                    .try_fold(Value::from(0), |acc, v| binary(&acc, BinaryOp::Add, v)),
                other => Err(ExprError::Type(format!("'{}' object is not iterable", type_name(other)))),
            }
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Array(items) => {
                    let mut items = items.clone();
                    let mut failure = None;
                    items.sort_by(|a, b| {
                        order(a, b).unwrap_or_else(|e| {
                            failure.get_or_insert(e);
                            Ordering::Equal
                        })
                    });
                    match failure {
                        Some(e) => Err(e),
                        None => Ok(Value::Array(items)),
                    }
                }
                other => Err(ExprError::Type(format!("'{}' object is not iterable", type_name(other)))),
            }
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Array(Vec::new())),
                Some(Value::Array(items)) => Ok(Value::Array(items.clone())),
                Some(Value::Object(map)) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                Some(Value::String(s)) => Ok(Value::Array(
                    s.chars().map(|c| Value::String(c.to_string())).collect(),
                )),
                Some(other) => Err(ExprError::Type(format!("'{}' object is not iterable", type_name(other)))),
            }
        }
        "range" => {
            arity(name, &args, 1, 2)?;
            let (start, stop) = match args.as_slice() {
                [stop] => (0, as_index(stop)?),
                [start, stop, ..] => (as_index(start)?, as_index(stop)?),
                [] => (0, 0),
            };
            if stop.saturating_sub(start) > MAX_REPEAT_LEN as i64 {
                return Err(ExprError::Type(format!("range({start}, {stop}) is too large")));
            }
            Ok(Value::Array((start..stop).map(Value::from).collect()))
        }
        "contains" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(contains(&args[0], &args[1])?))
        }
        "startswith" | "startsWith" | "endswith" | "endsWith" => {
            arity(name, &args, 2, 2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(if name.starts_with("start") {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                })),
                _ => Ok(Value::Bool(false)),
            }
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

fn str_arg<'a>(method: &str, args: &'a [Value], i: usize) -> Result<&'a str, ExprError> {
    args.get(i)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExprError::Type(format!("{method}() expects a string argument")))
}

fn call_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    match (receiver, method) {
        (Value::String(s), "lower") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "upper") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "strip") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "lstrip") => Ok(Value::String(s.trim_start().to_string())),
        (Value::String(s), "rstrip") => Ok(Value::String(s.trim_end().to_string())),
        (Value::String(s), "isdigit") | (Value::String(s), "isnumeric") => {
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        (Value::String(s), "split") => {
            let parts: Vec<Value> = match args.first() {
                Some(_) => {
                    let sep = str_arg(method, &args, 0)?;
                    s.split(sep).map(|p| Value::String(p.to_string())).collect()
                }
                None => s
                    .split_whitespace()
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            };
            Ok(Value::Array(parts))
        }
        (Value::String(s), "startswith") => Ok(Value::Bool(s.starts_with(str_arg(method, &args, 0)?))),
        (Value::String(s), "endswith") => Ok(Value::Bool(s.ends_with(str_arg(method, &args, 0)?))),
        (Value::String(s), "replace") => Ok(Value::String(
            s.replace(str_arg(method, &args, 0)?, str_arg(method, &args, 1)?),
        )),
        (Value::String(s), "find") => {
            let needle = str_arg(method, &args, 0)?;
            Ok(match s.find(needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::from(-1),
            })
        }
        (Value::String(s), "count") => Ok(Value::from(s.matches(str_arg(method, &args, 0)?).count())),
        (Value::String(sep), "join") => match args.first() {
            Some(Value::Array(items)) => Ok(Value::String(
                items
                    .iter()
                    .map(to_display_string)
                    .collect::<Vec<_>>()
                    .join(sep),
            )),
            _ => Err(ExprError::Type("join() expects a list".into())),
        },
        (Value::Object(map), "get") => {
            let key = args
                .first()
                .map(to_display_string)
                .ok_or_else(|| ExprError::Type("get() expects a key".into()))?;
            Ok(map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        (Value::Object(map), "keys") => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        (Value::Object(map), "values") => Ok(Value::Array(map.values().cloned().collect())),
        (Value::Object(map), "items") => Ok(Value::Array(
            map.iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect(),
        )),
        (Value::Array(items), "index") => {
            let needle = args
                .first()
                .ok_or_else(|| ExprError::Type("index() expects a value".into()))?;
            items
                .iter()
                .position(|v| values_equal(v, needle))
                .map(Value::from)
                .ok_or_else(|| ExprError::Index("value is not in list".into()))
        }
        (Value::Array(items), "count") => {
            let needle = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::from(items.iter().filter(|v| values_equal(v, &needle)).count()))
        }
        (Value::Array(_), "copy") | (Value::Object(_), "copy") => Ok(receiver.clone()),
        _ => Err(ExprError::UnknownFunction(format!(
            "{}.{}",
            type_name(receiver),
            method
        ))),
    }
}

pub fn eval<S: Scope + ?Sized>(expr: &Expr, scope: &S) -> Result<Value, ExprError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::from(*i)),
        Expr::Float(f) => Ok(num_value(Num::Float(*f))),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Name(name) => scope
            .lookup(name)
            .cloned()
            .ok_or_else(|| ExprError::UndefinedName(name.clone())),
        Expr::List(items) => Ok(Value::Array(
            items
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Dict(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = to_display_string(&eval(k, scope)?);
                map.insert(key, eval(v, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Neg(inner) => {
            let value = eval(inner, scope)?;
            match as_num(&value) {
                Some(Num::Int(i)) => Ok(i
                    .checked_neg()
                    .map(Value::from)
                    .unwrap_or_else(|| num_value(Num::Float(-(i as f64))))),
                Some(Num::Float(f)) => Ok(num_value(Num::Float(-f))),
                None => Err(ExprError::Type(format!(
                    "bad operand type for unary -: '{}'",
                    type_name(&value)
                ))),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, scope)?))),
        // short-circuit, returning the deciding operand like Python
        Expr::And(l, r) => {
            let left = eval(l, scope)?;
            if is_truthy(&left) {
                eval(r, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Or(l, r) => {
            let left = eval(l, scope)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                eval(r, scope)
            }
        }
        Expr::Binary(l, op, r) => binary(&eval(l, scope)?, *op, &eval(r, scope)?),
        Expr::Compare(first, rest) => {
            let mut left = eval(first, scope)?;
            for (op, right_expr) in rest {
                let right = eval(right_expr, scope)?;
                if !compare(&left, *op, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Conditional { test, body, orelse } => {
            if is_truthy(&eval(test, scope)?) {
                eval(body, scope)
            } else {
                eval(orelse, scope)
            }
        }
        Expr::Index(base, index) => index_value(&eval(base, scope)?, &eval(index, scope)?),
        Expr::Slice(base, start, stop) => {
            let base = eval(base, scope)?;
            let start = match start {
                Some(e) => Some(as_index(&eval(e, scope)?)?),
                None => None,
            };
            let stop = match stop {
                Some(e) => Some(as_index(&eval(e, scope)?)?),
                None => None,
            };
            slice_value(&base, start, stop)
        }
        Expr::Attr(base, key) => match eval(base, scope)? {
            Value::Object(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| ExprError::Index(format!("key '{key}' not found"))),
            other => Err(ExprError::Type(format!(
                "'{}' object has no attribute '{key}'",
                type_name(&other)
            ))),
        },
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, args)
        }
        Expr::Method(receiver, method, args) => {
            let receiver = eval(receiver, scope)?;
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(&receiver, method, args)
        }
    }
}

enum Step {
    Pos(i64),
    Key(String),
}

fn resolve_path<S: Scope + ?Sized>(target: &Target, scope: &S) -> Result<Vec<Step>, ExprError> {
    target
        .path
        .iter()
        .map(|accessor| match accessor {
            Accessor::Key(key) => Ok(Step::Key(key.clone())),
            Accessor::Index(expr) => match eval(expr, scope)? {
                Value::String(key) => Ok(Step::Key(key)),
                other => Ok(Step::Pos(as_index(&other)?)),
            },
        })
        .collect()
}

fn descend<'a>(slot: &'a mut Value, step: &Step) -> Result<&'a mut Value, ExprError> {
    match (slot, step) {
        (Value::Array(items), Step::Pos(i)) => {
            let len = items.len();
            let idx = normalize_index(*i, len)
                .ok_or_else(|| ExprError::Index(format!("list assignment index {i} out of range")))?;
            Ok(&mut items[idx])
        }
        (Value::Object(map), Step::Key(key)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Value::Object(map), Step::Pos(i)) => Ok(map.entry(i.to_string()).or_insert(Value::Null)),
        (other, _) => Err(ExprError::Type(format!(
            "'{}' object does not support item assignment",
            type_name(other)
        ))),
    }
}

/// Assign `value` to `target`, combining with the current value for `+=`/`-=`.
pub fn assign<S: ScopeMut + ?Sized>(
    target: &Target,
    op: AssignOp,
    value: Value,
    scope: &mut S,
) -> Result<(), ExprError> {
    let path = resolve_path(target, &*scope)?;

    if path.is_empty() && op == AssignOp::Set {
        scope.bind(&target.name, value);
        return Ok(());
    }

    let mut slot = scope
        .lookup_mut(&target.name)
        .ok_or_else(|| ExprError::UndefinedName(target.name.clone()))?;
    for step in &path {
        slot = descend(slot, step)?;
    }

    *slot = match op {
        AssignOp::Set => value,
        AssignOp::Add => binary(slot, BinaryOp::Add, &value)?,
        AssignOp::Sub => binary(slot, BinaryOp::Sub, &value)?,
    };
    Ok(())
}

/// Run statements in order and return the value of the last expression statement.
pub fn execute<S: ScopeMut + ?Sized>(
    statements: &[Statement],
    scope: &mut S,
) -> Result<Value, ExprError> {
    let mut last = Value::Null;
    for statement in statements {
        match statement {
            Statement::Assign(target, op, expr) => {
                let value = eval(expr, &*scope)?;
                assign(target, *op, value, scope)?;
                last = Value::Null;
            }
            Statement::Expr(expr) => {
                last = eval(expr, &*scope)?;
            }
        }
    }
    Ok(last)
}

fn collect_names(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Name(name) => {
            names.insert(name.clone());
        }
        Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
        Expr::List(items) => items.iter().for_each(|e| collect_names(e, names)),
        Expr::Dict(entries) => entries.iter().for_each(|(k, v)| {
            collect_names(k, names);
            collect_names(v, names);
        }),
        Expr::Neg(inner) | Expr::Not(inner) | Expr::Attr(inner, _) => collect_names(inner, names),
        Expr::And(l, r) | Expr::Or(l, r) | Expr::Binary(l, _, r) | Expr::Index(l, r) => {
            collect_names(l, names);
            collect_names(r, names);
        }
        Expr::Compare(first, rest) => {
            collect_names(first, names);
            rest.iter().for_each(|(_, e)| collect_names(e, names));
        }
        Expr::Conditional { test, body, orelse } => {
            collect_names(test, names);
            collect_names(body, names);
            collect_names(orelse, names);
        }
        Expr::Slice(base, start, stop) => {
            collect_names(base, names);
            if let Some(s) = start {
                collect_names(s, names);
            }
            if let Some(s) = stop {
                collect_names(s, names);
            }
        }
        // function names are builtins, not variables
        Expr::Call(_, args) => args.iter().for_each(|e| collect_names(e, names)),
        Expr::Method(receiver, _, args) => {
            collect_names(receiver, names);
            args.iter().for_each(|e| collect_names(e, names));
        }
    }
}

/// Every variable name an expression reads, sorted and deduplicated.
pub fn free_names(expr: &Expr) -> Vec<String> {
    let mut names = BTreeSet::new();
    collect_names(expr, &mut names);
    names.into_iter().collect()
}

/// Names a snippet reads. A plain `x = ...` does not read `x`.
pub fn free_names_in(statements: &[Statement]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for statement in statements {
        match statement {
            Statement::Assign(target, op, expr) => {
                collect_names(expr, &mut names);
                if !target.path.is_empty() || *op != AssignOp::Set {
                    names.insert(target.name.clone());
                }
                for accessor in &target.path {
                    if let Accessor::Index(e) = accessor {
                        collect_names(e, &mut names);
                    }
                }
            }
            Statement::Expr(expr) => collect_names(expr, &mut names),
        }
    }
    names.into_iter().collect()
}
