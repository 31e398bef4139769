use crate::marshal::{
    ListNode, TreeNode, build_linked_list, build_tree, flatten_linked_list, flatten_tree,
};
use rustpython_parser::{Parse, ast};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::fmt;

/// Wire tags for shapes JSON cannot carry directly. The harness uses the same names.
pub const LINKED_LIST_TAG: &str = "$linked_list";
pub const TREE_TAG: &str = "$tree";
pub const SET_TAG: &str = "$set";
pub const MAP_TAG: &str = "$map";
pub const FLOAT_TAG: &str = "$float";
pub const REPR_TAG: &str = "$repr";

/// A structured value crossing the judge boundary: call arguments, call results
/// and expected answers.
///
/// Linked lists and trees are explicit variants. They are only ever produced by a
/// `BuildSpec` conversion or by decoding a tagged harness result, never inferred
/// from the shape of a plain list.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered entries. Keys are unique.
    Map(Vec<(Value, Value)>),
    /// Elements are unique under plain equality.
    Set(Vec<Value>),
    LinkedList(Option<Box<ListNode>>),
    Tree(Option<Box<TreeNode>>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Short type name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Set(_) => "set",
            Value::LinkedList(_) => "ListNode",
            Value::Tree(_) => "TreeNode",
        }
    }

    /// Replaces a linked-list or tree value by its canonical flat array.
    /// Other values are returned unchanged.
    pub fn into_flat(self) -> Value {
        match self {
            Value::LinkedList(head) => Value::List(flatten_linked_list(head.as_deref())),
            Value::Tree(root) => Value::List(flatten_tree(root.as_deref())),
            other => other,
        }
    }

    /// Builds a value from plain JSON. Objects become string-keyed maps; no tags
    /// are interpreted.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => number_value(n),
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Map(
                map.iter()
                    .map(|(key, item)| (Value::Str(key.clone()), Value::from_json(item)))
                    .collect(),
            ),
        }
    }

    /// Decodes a harness result, honouring the wire tags.
    pub fn from_wire(json: &JsonValue) -> Value {
        match json {
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_wire).collect()),
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some((tag, payload)) = map.iter().next() {
                        if let Some(value) = decode_tagged(tag, payload) {
                            return value;
                        }
                    }
                }
                Value::Map(
                    map.iter()
                        .map(|(key, item)| (Value::Str(key.clone()), Value::from_wire(item)))
                        .collect(),
                )
            }
            other => Value::from_json(other),
        }
    }

    /// Encodes a value for the harness. Inverse of [`Value::from_wire`].
    pub fn to_wire(&self) -> JsonValue {
        match self {
            Value::None => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => match JsonNumber::from_f64(*f) {
                Some(n) => JsonValue::Number(n),
                None => tagged(FLOAT_TAG, JsonValue::String(float_token(*f).to_string())),
            },
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_wire).collect()),
            Value::Map(entries) => {
                if entries.iter().all(|(key, _)| matches!(key, Value::Str(_))) {
                    let mut map = JsonMap::new();
                    for (key, item) in entries {
                        if let Value::Str(key) = key {
                            map.insert(key.clone(), item.to_wire());
                        }
                    }
                    JsonValue::Object(map)
                } else {
                    tagged(
                        MAP_TAG,
                        JsonValue::Array(
                            entries
                                .iter()
                                .map(|(key, item)| JsonValue::Array(vec![key.to_wire(), item.to_wire()]))
                                .collect(),
                        ),
                    )
                }
            }
            Value::Set(items) => tagged(
                SET_TAG,
                JsonValue::Array(items.iter().map(Value::to_wire).collect()),
            ),
            Value::LinkedList(head) => tagged(
                LINKED_LIST_TAG,
                JsonValue::Array(
                    flatten_linked_list(head.as_deref())
                        .iter()
                        .map(Value::to_wire)
                        .collect(),
                ),
            ),
            Value::Tree(root) => tagged(
                TREE_TAG,
                JsonValue::Array(
                    flatten_tree(root.as_deref())
                        .iter()
                        .map(Value::to_wire)
                        .collect(),
                ),
            ),
        }
    }
}

fn tagged(tag: &str, payload: JsonValue) -> JsonValue {
    let mut map = JsonMap::new();
    map.insert(tag.to_string(), payload);
    JsonValue::Object(map)
}

fn float_token(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

fn number_value(n: &JsonNumber) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_tagged(tag: &str, payload: &JsonValue) -> Option<Value> {
    match (tag, payload) {
        (LINKED_LIST_TAG, JsonValue::Array(items)) => {
            let values: Vec<Value> = items.iter().map(Value::from_wire).collect();
            Some(Value::LinkedList(build_linked_list(&values)))
        }
        (TREE_TAG, JsonValue::Array(items)) => {
            let values: Vec<Value> = items.iter().map(Value::from_wire).collect();
            Some(Value::Tree(build_tree(&values)))
        }
        (SET_TAG, JsonValue::Array(items)) => {
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items.iter().map(Value::from_wire) {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Some(Value::Set(unique))
        }
        (MAP_TAG, JsonValue::Array(pairs)) => pairs
            .iter()
            .map(|pair| match pair {
                JsonValue::Array(kv) if kv.len() == 2 => {
                    Some((Value::from_wire(&kv[0]), Value::from_wire(&kv[1])))
                }
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Value::Map),
        (FLOAT_TAG, JsonValue::String(token)) => match token.as_str() {
            "nan" => Some(Value::Float(f64::NAN)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "-inf" => Some(Value::Float(f64::NEG_INFINITY)),
            _ => None,
        },
        (REPR_TAG, JsonValue::String(repr)) => Some(Value::Str(repr.clone())),
        _ => None,
    }
}

/// Parses expected-answer text: JSON first, then a Python literal, else the text itself.
pub fn parse_literal(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(json) = serde_json::from_str::<JsonValue>(trimmed) {
        return Value::from_json(&json);
    }
    ast::Expr::parse(trimmed, "<literal>")
        .ok()
        .and_then(|expr| literal_from_expr(&expr))
        .unwrap_or_else(|| Value::Str(trimmed.to_string()))
}

fn literal_from_expr(expr: &ast::Expr) -> Option<Value> {
    match expr {
        ast::Expr::Constant(constant) => literal_from_constant(&constant.value),
        ast::Expr::List(list) => literal_items(&list.elts).map(Value::List),
        ast::Expr::Tuple(tuple) => literal_items(&tuple.elts).map(Value::List),
        ast::Expr::Set(set) => literal_items(&set.elts).map(|items| {
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Value::Set(unique)
        }),
        ast::Expr::Dict(dict) => {
            let mut entries = Vec::with_capacity(dict.values.len());
            for (key, item) in dict.keys.iter().zip(&dict.values) {
                let key = literal_from_expr(key.as_ref()?)?;
                let item = literal_from_expr(item)?;
                entries.retain(|(existing, _): &(Value, Value)| *existing != key);
                entries.push((key, item));
            }
            Some(Value::Map(entries))
        }
        ast::Expr::UnaryOp(unary) => match (&unary.op, literal_from_expr(&unary.operand)?) {
            (ast::UnaryOp::USub, Value::Int(i)) => i.checked_neg().map(Value::Int),
            (ast::UnaryOp::USub, Value::Float(f)) => Some(Value::Float(-f)),
            (ast::UnaryOp::UAdd, value @ (Value::Int(_) | Value::Float(_))) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

fn literal_items(items: &[ast::Expr]) -> Option<Vec<Value>> {
    items.iter().map(literal_from_expr).collect()
}

fn literal_from_constant(constant: &ast::Constant) -> Option<Value> {
    match constant {
        ast::Constant::None => Some(Value::None),
        ast::Constant::Bool(b) => Some(Value::Bool(*b)),
        ast::Constant::Str(s) => Some(Value::Str(s.clone())),
        ast::Constant::Int(i) => {
            let digits = i.to_string();
            digits
                .parse::<i64>()
                .map(Value::Int)
                .ok()
                .or_else(|| digits.parse::<f64>().ok().map(Value::Float))
        }
        ast::Constant::Float(f) => Some(Value::Float(*f)),
        ast::Constant::Tuple(items) => items
            .iter()
            .map(literal_from_constant)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        _ => None,
    }
}

/// Python-flavoured rendering used in judge logs.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_finite() => write!(f, "{x:?}"),
            Value::Float(x) => write!(f, "{}", float_token(*x)),
            Value::Str(s) => write_quoted(f, s),
            Value::List(items) => {
                write!(f, "[")?;
                write_joined(f, items, ", ")?;
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
            Value::Set(items) if items.is_empty() => write!(f, "set()"),
            Value::Set(items) => {
                write!(f, "{{")?;
                write_joined(f, items, ", ")?;
                write!(f, "}}")
            }
            Value::LinkedList(head) => {
                write!(f, "ListNode(")?;
                write_joined(f, &flatten_linked_list(head.as_deref()), " -> ")?;
                write!(f, ")")
            }
            Value::Tree(root) => {
                write!(f, "TreeNode[")?;
                write_joined(f, &flatten_tree(root.as_deref()), ", ")?;
                write!(f, "]")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value], separator: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "'")?;
    for ch in s.chars() {
        match ch {
            '\\' => write!(f, "\\\\")?,
            '\'' => write!(f, "\\'")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            other => write!(f, "{other}")?,
        }
    }
    write!(f, "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_literal_prefers_json() {
        assert_eq!(
            parse_literal("[0, 1]"),
            Value::List(vec![Value::Int(0), Value::Int(1)])
        );
        assert_eq!(parse_literal("\"abc\""), Value::Str("abc".into()));
        assert_eq!(parse_literal("2.5"), Value::Float(2.5));
    }

    #[test]
    fn parse_literal_accepts_python_literals() {
        assert_eq!(parse_literal("'bab'"), Value::Str("bab".into()));
        assert_eq!(
            parse_literal("(1, -2, None, True)"),
            Value::List(vec![
                Value::Int(1),
                Value::Int(-2),
                Value::None,
                Value::Bool(true)
            ])
        );
        assert_eq!(
            parse_literal("{1: 'a'}"),
            Value::Map(vec![(Value::Int(1), Value::Str("a".into()))])
        );
        assert_eq!(
            parse_literal("{3, 3, 4}"),
            Value::Set(vec![Value::Int(3), Value::Int(4)])
        );
    }

    #[test]
    fn parse_literal_falls_back_to_text() {
        assert_eq!(parse_literal("hello world"), Value::Str("hello world".into()));
        assert_eq!(parse_literal(""), Value::Str(String::new()));
        assert_eq!(parse_literal("len(x)"), Value::Str("len(x)".into()));
    }

    #[test]
    fn wire_tags_decode_into_explicit_variants() {
        let decoded = Value::from_wire(&json!({"$linked_list": [1, 2, 3]}));
        assert!(matches!(decoded, Value::LinkedList(Some(_))));
        assert_eq!(
            decoded.into_flat(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );

        let tree = Value::from_wire(&json!({"$tree": [1, null, 2]}));
        assert!(matches!(tree, Value::Tree(Some(_))));

        let nan = Value::from_wire(&json!({"$float": "nan"}));
        assert!(matches!(nan, Value::Float(f) if f.is_nan()));

        let plain = Value::from_wire(&json!({"a": 1, "b": 2}));
        assert!(matches!(plain, Value::Map(ref entries) if entries.len() == 2));
    }

    #[test]
    fn non_string_keys_use_map_tag() {
        let value = Value::Map(vec![(Value::Int(1), Value::Str("x".into()))]);
        let wire = value.to_wire();
        assert_eq!(wire, json!({"$map": [[1, "x"]]}));
        assert_eq!(Value::from_wire(&wire), value);
    }

    #[test]
    fn display_is_python_like() {
        let value = Value::List(vec![
            Value::Str("it's".into()),
            Value::None,
            Value::Bool(false),
            Value::Float(1.0),
        ]);
        assert_eq!(value.to_string(), "['it\\'s', None, False, 1.0]");
        assert_eq!(Value::Set(vec![]).to_string(), "set()");
        let list = Value::LinkedList(build_linked_list(&[Value::Int(1), Value::Int(2)]));
        assert_eq!(list.to_string(), "ListNode(1 -> 2)");
    }
}
