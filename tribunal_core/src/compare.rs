//! Tolerant structural comparison of a submission's result with the expected answer.

use crate::marshal::{flatten_linked_list, flatten_tree};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Absolute tolerance applied whenever either side is a float.
    pub float_tol: f64,
    /// Match sequences as multisets. Elements inside them still compare in order.
    pub unordered: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            float_tol: DEFAULT_FLOAT_TOLERANCE,
            unordered: false,
        }
    }
}

impl CompareOptions {
    fn ordered(self) -> Self {
        Self {
            unordered: false,
            ..self
        }
    }
}

/// Returns whether `got` matches `expected`.
///
/// * Linked lists and trees compare by their canonical flat arrays; a node
///   against anything else never matches.
/// * If either side is a float the values compare numerically within
///   `float_tol`. Numeric strings are accepted on the other side.
/// * Maps need identical key sets, then every value must match.
/// * Sequences compare position by position, or as multisets when
///   `unordered` is set.
/// * Sets use plain element equality without tolerance.
/// * NaN matches NaN everywhere, so every value matches itself.
pub fn compare(got: &Value, expected: &Value, options: CompareOptions) -> bool {
    match (got, expected) {
        (Value::LinkedList(a), Value::LinkedList(b)) => {
            same_values(&flatten_linked_list(a.as_deref()), &flatten_linked_list(b.as_deref()))
        }
        (Value::Tree(a), Value::Tree(b)) => {
            same_values(&flatten_tree(a.as_deref()), &flatten_tree(b.as_deref()))
        }
        (Value::LinkedList(_) | Value::Tree(_), _) | (_, Value::LinkedList(_) | Value::Tree(_)) => {
            false
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (lenient_number(got), lenient_number(expected)) {
            (Some(a), Some(b)) => floats_match(a, b, options.float_tol),
            _ => false,
        },
        (Value::Map(a), Value::Map(b)) => maps_match(a, b, options),
        (Value::List(a), Value::List(b)) => {
            if options.unordered {
                unordered_match(a, b, options)
            } else {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| compare(x, y, options))
            }
        }
        (Value::Set(a), Value::Set(b)) => {
            a.len() == b.len()
                && a.iter().all(|x| b.iter().any(|y| plain_equal(x, y)))
                && b.iter().all(|y| a.iter().any(|x| plain_equal(x, y)))
        }
        _ => plain_equal(got, expected),
    }
}

fn floats_match(a: f64, b: f64, tolerance: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a == b || (a - b).abs() <= tolerance
}

fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn maps_match(got: &[(Value, Value)], expected: &[(Value, Value)], options: CompareOptions) -> bool {
    got.len() == expected.len()
        && got.iter().all(|(key, value)| {
            expected
                .iter()
                .find(|(other, _)| plain_equal(key, other))
                .is_some_and(|(_, other)| compare(value, other, options))
        })
}

fn same_values(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| plain_equal(x, y))
}

/// Python `==` without any tolerance, except that NaN equals NaN. Bools and
/// ints are interchangeable.
fn plain_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (integral(a), integral(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Float(x), other) | (other, Value::Float(x)) => {
            integral(other).is_some_and(|i| *x == i as f64)
        }
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| plain_equal(p, q))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .any(|(other_k, other_v)| plain_equal(k, other_k) && plain_equal(v, other_v))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().all(|p| y.iter().any(|q| plain_equal(p, q)))
        }
        (Value::LinkedList(_) | Value::Tree(_), _) => compare(a, b, CompareOptions::default()),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    None,
    Int(i64),
    Str(String),
    Seq(Vec<HashKey>),
}

impl HashKey {
    fn of(value: &Value) -> Option<HashKey> {
        match value {
            Value::None => Some(HashKey::None),
            Value::Bool(_) | Value::Int(_) => integral(value).map(HashKey::Int),
            Value::Str(s) => Some(HashKey::Str(s.clone())),
            Value::List(items) => items
                .iter()
                .map(HashKey::of)
                .collect::<Option<Vec<_>>>()
                .map(HashKey::Seq),
            _ => None,
        }
    }
}

fn unordered_match(got: &[Value], expected: &[Value], options: CompareOptions) -> bool {
    if got.len() != expected.len() {
        return false;
    }

    let keys: Option<Vec<(HashKey, isize)>> = got
        .iter()
        .map(|v| HashKey::of(v).map(|k| (k, 1)))
        .chain(expected.iter().map(|v| HashKey::of(v).map(|k| (k, -1))))
        .collect();
    if let Some(keys) = keys {
        let mut counts: HashMap<HashKey, isize> = HashMap::new();
        for (key, delta) in keys {
            *counts.entry(key).or_default() += delta;
        }
        return counts.values().all(|count| *count == 0);
    }

    // First-fit matching; nested elements compare in order.
    let inner = options.ordered();
    let mut used = vec![false; expected.len()];
    got.iter().all(|item| {
        let slot = expected
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && compare(item, candidate, inner));
        match slot {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{build_linked_list, build_tree};
    use crate::value::parse_literal;
    use proptest::prelude::*;

    fn lit(text: &str) -> Value {
        parse_literal(text)
    }

    fn unordered() -> CompareOptions {
        CompareOptions {
            unordered: true,
            ..CompareOptions::default()
        }
    }

    #[test]
    fn unordered_sequences_match_as_multisets() {
        assert!(compare(&lit("[1, 2, 3]"), &lit("[3, 1, 2]"), unordered()));
        assert!(!compare(&lit("[1, 2, 3]"), &lit("[3, 1, 2]"), CompareOptions::default()));
        assert!(!compare(&lit("[1, 1, 2]"), &lit("[1, 2, 2]"), unordered()));
        assert!(compare(
            &lit("[[1, 2], [3]]"),
            &lit("[[3], [1, 2]]"),
            unordered()
        ));
    }

    #[test]
    fn unordered_falls_back_to_greedy_matching() {
        assert!(compare(
            &lit("[{'a': 1}, {'b': 2.0}]"),
            &lit("[{'b': 2.0000001}, {'a': 1}]"),
            unordered()
        ));
        assert!(compare(&lit("[0.1, 0.2]"), &lit("[0.2000001, 0.1]"), unordered()));
    }

    #[test]
    fn floats_use_absolute_tolerance() {
        let options = CompareOptions::default();
        assert!(compare(&Value::Float(0.30000000000000004), &Value::Float(0.3), options));
        assert!(!compare(&Value::Float(0.31), &Value::Float(0.3), options));
        assert!(compare(&Value::Int(2), &Value::Float(2.0), options));
        assert!(compare(&Value::Str("2.5".into()), &Value::Float(2.5), options));
        assert!(compare(&Value::Float(f64::INFINITY), &Value::Float(f64::INFINITY), options));
    }

    #[test]
    fn bools_and_ints_are_numerically_equal() {
        let options = CompareOptions::default();
        assert!(compare(&Value::Bool(true), &Value::Int(1), options));
        assert!(!compare(&Value::Bool(true), &Value::Int(2), options));
        assert!(!compare(&Value::Str("1".into()), &Value::Int(1), options));
    }

    #[test]
    fn maps_need_identical_keys() {
        let options = CompareOptions::default();
        assert!(compare(&lit("{'a': 1, 'b': 2}"), &lit("{'b': 2, 'a': 1}"), options));
        assert!(!compare(&lit("{'a': 1}"), &lit("{'a': 1, 'b': 2}"), options));
        assert!(compare(&lit("{'a': 1.0}"), &lit("{'a': 1.0000001}"), options));
    }

    #[test]
    fn sets_have_no_tolerance() {
        let options = CompareOptions::default();
        assert!(compare(&lit("{1, 2}"), &lit("{2, 1}"), options));
        assert!(!compare(&lit("{1.0}"), &lit("{1.0000001}"), options));
    }

    #[test]
    fn nodes_compare_structurally() {
        let options = CompareOptions::default();
        let a = Value::LinkedList(build_linked_list(&[Value::Int(1), Value::Int(2)]));
        let b = Value::LinkedList(build_linked_list(&[Value::Int(1), Value::Int(2)]));
        assert!(compare(&a, &b, options));
        assert!(!compare(&a, &lit("[1, 2]"), options));

        let t = Value::Tree(build_tree(&[Value::Int(1), Value::None, Value::Int(2)]));
        let u = Value::Tree(build_tree(&[Value::Int(1), Value::None, Value::Int(2), Value::None]));
        assert!(compare(&t, &u, options));
        assert!(!compare(&t, &a, options));
    }

    #[test]
    fn nan_matches_itself_in_every_shape() {
        let nan = Value::Float(f64::NAN);
        let shapes = [
            Value::List(vec![nan.clone()]),
            Value::Set(vec![nan.clone(), Value::Int(1)]),
            Value::LinkedList(build_linked_list(&[Value::Int(1), nan.clone()])),
            Value::Tree(build_tree(&[nan.clone(), Value::None, nan.clone()])),
            Value::Map(vec![(Value::Str("a".into()), nan.clone())]),
        ];
        for shape in &shapes {
            for unordered in [false, true] {
                let options = CompareOptions { unordered, ..CompareOptions::default() };
                assert!(compare(shape, shape, options), "{shape} does not match itself");
            }
        }
        assert!(!compare(
            &Value::Set(vec![nan.clone()]),
            &Value::Set(vec![Value::Float(1.0)]),
            CompareOptions::default()
        ));
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::None),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::Str),
        ]
    }

    fn nested() -> impl Strategy<Value = Value> {
        scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::vec(("[a-z]{1,3}", inner.clone()), 0..3).prop_map(|entries| {
                    let mut unique: Vec<(Value, Value)> = Vec::new();
                    for (key, item) in entries {
                        let key = Value::Str(key);
                        if !unique.iter().any(|(k, _)| *k == key) {
                            unique.push((key, item));
                        }
                    }
                    Value::Map(unique)
                }),
                prop::collection::vec(inner, 0..4).prop_map(Value::Set),
                prop::collection::vec(scalar(), 0..6)
                    .prop_map(|values| Value::LinkedList(build_linked_list(&values))),
                prop::collection::vec(scalar(), 0..8).prop_map(|values| Value::Tree(build_tree(&values))),
            ]
        })
    }

    proptest! {
        #[test]
        fn comparison_is_reflexive(value in nested(), unordered in any::<bool>()) {
            let options = CompareOptions { unordered, ..CompareOptions::default() };
            prop_assert!(compare(&value, &value, options));
        }

        #[test]
        fn shuffled_lists_match_unordered(values in prop::collection::vec(-20i64..20, 0..16), seed in any::<u64>()) {
            use rand::seq::SliceRandom;
            use rand_chacha::ChaCha8Rng;
            use rand_core::SeedableRng;

            let original: Vec<Value> = values.iter().copied().map(Value::Int).collect();
            let mut shuffled = original.clone();
            shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
            prop_assert!(compare(&Value::List(shuffled), &Value::List(original), unordered()));
        }
    }
}
