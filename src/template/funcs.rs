//! Builtin template functions and value helpers

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use crate::error::ExecError;

/// Truthiness: false, 0, nil, and empty strings, lists, and maps are false
pub fn is_true(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Name of a value's kind for error messages
pub fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Text form of a value as printed by an action
pub fn format_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("map[");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push(':');
                write_value(out, item);
            }
            out.push(']');
        }
    }
}

/// Look up a field on a map: exact key first, then ignoring case and underscores
pub fn lookup<'v>(map: &'v Map<String, Value>, name: &str) -> Option<&'v Value> {
    map.get(name).or_else(|| {
        let wanted = normalize(name);
        map.iter()
            .find(|(key, _)| normalize(key) == wanted)
            .map(|(_, value)| value)
    })
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Call a builtin with already evaluated arguments. `and`/`or` are handled by
/// the executor because they short-circuit.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    match name {
        "not" => {
            let [value] = exactly::<1>(name, args)?;
            Ok(Value::Bool(!is_true(&value)))
        }
        "eq" => {
            if args.len() < 2 {
                return Err(arg_count(name, "at least 2", args.len()));
            }
            let mut args = args.into_iter();
            let first = args.next().unwrap_or(Value::Null);
            for other in args {
                if equal(name, &first, &other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "ne" => {
            let [a, b] = exactly::<2>(name, args)?;
            Ok(Value::Bool(!equal(name, &a, &b)?))
        }
        "lt" | "le" | "gt" | "ge" => {
            let [a, b] = exactly::<2>(name, args)?;
            let ordering = compare(name, &a, &b)?;
            Ok(Value::Bool(match name {
                "lt" => ordering == Ordering::Less,
                "le" => ordering != Ordering::Greater,
                "gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        "len" => {
            let [value] = exactly::<1>(name, args)?;
            let len = match &value {
                Value::String(s) => s.len(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(ExecError::call(
                        name,
                        format!("len of type {}", kind(other)),
                    ))
                }
            };
            Ok(Value::from(len))
        }
        "index" => index(args),
        "slice" => slice(args),
        "print" => Ok(Value::String(sprint(&args))),
        "println" => {
            let mut out = args.iter().map(format_value).collect::<Vec<_>>().join(" ");
            out.push('\n');
            Ok(Value::String(out))
        }
        "printf" => {
            let mut args = args.into_iter();
            let format = match args.next() {
                Some(Value::String(format)) => format,
                Some(other) => {
                    return Err(ExecError::call(
                        name,
                        format!("format must be a string, got {}", kind(&other)),
                    ))
                }
                None => return Err(arg_count(name, "at least 1", 0)),
            };
            Ok(Value::String(sprintf(&format, &args.collect::<Vec<_>>())))
        }
        "json" => {
            let [value] = exactly::<1>(name, args)?;
            Ok(Value::String(serde_json::to_string(&value)?))
        }
        "now" => {
            exactly::<0>(name, args)?;
            Ok(Value::String(
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ))
        }
        _ => Err(ExecError::UndefinedFunction {
            name: name.to_string(),
        }),
    }
}

fn arg_count(name: &str, want: &str, got: usize) -> ExecError {
    ExecError::WrongArgCount {
        name: name.to_string(),
        want: want.to_string(),
        got,
    }
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], ExecError> {
    let got = args.len();
    args.try_into()
        .map_err(|_| arg_count(name, &N.to_string(), got))
}

/// Equality over basic values; values of different kinds are unequal
fn equal(name: &str, a: &Value, b: &Value) -> Result<bool, ExecError> {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            Err(ExecError::call(
                name,
                format!("non-comparable types {} and {}", kind(a), kind(b)),
            ))
        }
        (Value::Number(x), Value::Number(y)) => Ok(number_cmp(x, y) == Ordering::Equal),
        _ => Ok(a == b),
    }
}

fn compare(name: &str, a: &Value, b: &Value) -> Result<Ordering, ExecError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(number_cmp(x, y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExecError::call(
            name,
            format!("incompatible types for comparison: {} and {}", kind(a), kind(b)),
        )),
    }
}

fn number_cmp(x: &Number, y: &Number) -> Ordering {
    match (x.as_i64(), y.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Less)
        }
    }
}

/// Integer value of an index argument
fn as_index(name: &str, value: &Value) -> Result<i64, ExecError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| ExecError::call(name, format!("cannot index with {}", n))),
        other => Err(ExecError::call(
            name,
            format!("cannot index with type {}", kind(other)),
        )),
    }
}

fn index(args: Vec<Value>) -> Result<Value, ExecError> {
    let mut args = args.into_iter();
    let mut item = args.next().ok_or_else(|| arg_count("index", "at least 1", 0))?;
    for key in args {
        item = match (&item, &key) {
            (Value::Array(items), _) => {
                let i = as_index("index", &key)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        ExecError::call("index", format!("index out of range: {}", i))
                    })?
            }
            (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Object(_), other) => {
                return Err(ExecError::call(
                    "index",
                    format!("map key must be a string, got {}", kind(other)),
                ))
            }
            (other, _) => {
                return Err(ExecError::call(
                    "index",
                    format!("can't index item of type {}", kind(other)),
                ))
            }
        };
    }
    Ok(item)
}

fn slice(args: Vec<Value>) -> Result<Value, ExecError> {
    if args.is_empty() || args.len() > 3 {
        return Err(arg_count("slice", "1 to 3", args.len()));
    }
    let bounds = args[1..]
        .iter()
        .map(|v| as_index("slice", v))
        .collect::<Result<Vec<_>, _>>()?;

    let len = match &args[0] {
        Value::Array(items) => items.len(),
        Value::String(s) => s.len(),
        other => {
            return Err(ExecError::call(
                "slice",
                format!("can't slice item of type {}", kind(other)),
            ))
        }
    };
    let start = bounds.first().copied().unwrap_or(0);
    let end = bounds.get(1).copied().unwrap_or(len as i64);
    if start < 0 || end < start || end > len as i64 {
        return Err(ExecError::call(
            "slice",
            format!("index out of range: [{}:{}] with length {}", start, end, len),
        ));
    }
    let (start, end) = (start as usize, end as usize);

    match &args[0] {
        Value::Array(items) => Ok(Value::Array(items[start..end].to_vec())),
        Value::String(s) => s
            .get(start..end)
            .map(|sub| Value::String(sub.to_string()))
            .ok_or_else(|| ExecError::call("slice", "slice splits a character")),
        _ => Ok(Value::Null),
    }
}

/// Operands are joined with a space only when neither side is a string
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !args[i - 1].is_string() && !arg.is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    out
}

/// Minimal printf supporting %s %v %d %q %t %f and %%
fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = match chars.next() {
            Some(verb) => verb,
            None => {
                out.push_str("%!(NOVERB)");
                break;
            }
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };
        match verb {
            'q' => match arg {
                Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
                other => out.push_str(&format_value(other)),
            },
            'f' => match arg.as_f64() {
                Some(f) => out.push_str(&format!("{:.6}", f)),
                None => out.push_str(&format!("%!f({})", format_value(arg))),
            },
            's' | 'v' | 'd' | 't' => out.push_str(&format_value(arg)),
            other => out.push_str(&format!("%!{}({})", other, format_value(arg))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!is_true(&falsy), "{} should be false", falsy);
        }
        for truthy in [json!(true), json!(1), json!(0.5), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(is_true(&truthy), "{} should be true", truthy);
        }
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!(null)), "");
        assert_eq!(format_value(&json!("hi")), "hi");
        assert_eq!(format_value(&json!([1, "a", true])), "[1 a true]");
        assert_eq!(format_value(&json!({"b": 2, "a": 1})), "map[a:1 b:2]");
    }

    #[test]
    fn test_lookup_normalizes_names() {
        let map = json!({"tool_calls": [1], "content": "x", "Exact": 1, "exact": 2});
        let map = map.as_object().unwrap();
        assert_eq!(lookup(map, "ToolCalls"), Some(&json!([1])));
        assert_eq!(lookup(map, "Content"), Some(&json!("x")));
        assert_eq!(lookup(map, "Exact"), Some(&json!(1)));
        assert_eq!(lookup(map, "Missing"), None);
    }

    #[test]
    fn test_eq_matches_any() {
        assert_eq!(call("eq", vec![json!("user"), json!("tool"), json!("user")]).unwrap(), json!(true));
        assert_eq!(call("eq", vec![json!(1), json!(1.0)]).unwrap(), json!(true));
        assert_eq!(call("eq", vec![json!("1"), json!(1)]).unwrap(), json!(false));
        assert!(call("eq", vec![json!([1]), json!([1])]).is_err());
        assert!(call("eq", vec![json!(1)]).is_err());
    }

    #[test]
    fn test_ordering() {
        assert_eq!(call("lt", vec![json!(1), json!(2)]).unwrap(), json!(true));
        assert_eq!(call("ge", vec![json!("b"), json!("a")]).unwrap(), json!(true));
        assert!(call("lt", vec![json!(1), json!("a")]).is_err());
    }

    #[test]
    fn test_len_index_slice() {
        let list = json!(["a", "b", "c"]);
        assert_eq!(call("len", vec![list.clone()]).unwrap(), json!(3));
        assert_eq!(call("index", vec![list.clone(), json!(1)]).unwrap(), json!("b"));
        assert!(call("index", vec![list.clone(), json!(5)]).is_err());
        assert_eq!(call("index", vec![json!({"k": "v"}), json!("k")]).unwrap(), json!("v"));
        assert_eq!(call("slice", vec![list.clone(), json!(1)]).unwrap(), json!(["b", "c"]));
        assert_eq!(call("slice", vec![json!("hello"), json!(1), json!(3)]).unwrap(), json!("el"));
        assert!(call("slice", vec![list, json!(2), json!(1)]).is_err());
        assert!(call("len", vec![json!(null)]).is_err());
    }

    #[test]
    fn test_print_family() {
        assert_eq!(call("print", vec![json!("a"), json!("b")]).unwrap(), json!("ab"));
        assert_eq!(call("print", vec![json!(1), json!(2)]).unwrap(), json!("1 2"));
        assert_eq!(call("println", vec![json!("a"), json!(1)]).unwrap(), json!("a 1\n"));
        assert_eq!(
            call("printf", vec![json!("%s=%d %q 100%%"), json!("n"), json!(3), json!("x")]).unwrap(),
            json!("n=3 \"x\" 100%")
        );
        assert_eq!(call("printf", vec![json!("%s")]).unwrap(), json!("%!s(MISSING)"));
    }

    #[test]
    fn test_json_and_now() {
        assert_eq!(
            call("json", vec![json!({"a": [1, "x"]})]).unwrap(),
            json!(r#"{"a":[1,"x"]}"#)
        );
        let now = call("now", vec![]).unwrap();
        let now = now.as_str().unwrap();
        assert_eq!(now.len(), "2024-01-01 00:00:00".len());
        assert!(chrono::NaiveDateTime::parse_from_str(now, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            call("upper", vec![]),
            Err(ExecError::UndefinedFunction { .. })
        ));
    }

    #[test]
    fn test_not() {
        assert_eq!(call("not", vec![json!("")]).unwrap(), json!(true));
        assert!(call("not", vec![]).is_err());
    }
}
