//! Document merge, diff, and equality operations.

use serde_json::{Map, Value};

/// A structured document: string keys mapping to JSON values.
pub type Document = Map<String, Value>;

/// How `merge` treats an explicit null in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullMode {
    /// A null value is a tombstone: the key is removed from the base.
    ///
    /// This is the mode for authoritative documents, which never hold
    /// explicit nulls.
    Remove,
    /// A null value is stored as-is.
    ///
    /// This is the mode for accumulator documents, where a tombstone must
    /// survive until it is sent to the server.
    Keep,
}

/// Applies `diff` onto `base` in place.
///
/// For each key of the diff: absent keys are deep-copied into the base;
/// when both sides hold nested documents the merge recurses; any other
/// value replaces the base value wholesale. Arrays are never element-merged.
/// Null handling follows `null_mode`.
pub fn merge(base: &mut Document, diff: &Document, null_mode: NullMode) {
    for (key, v_diff) in diff {
        if !base.contains_key(key) {
            if !v_diff.is_null() || null_mode == NullMode::Keep {
                base.insert(key.clone(), v_diff.clone());
            }
            continue;
        }
        if v_diff.is_null() && null_mode == NullMode::Remove {
            base.remove(key);
            continue;
        }
        match (base.get_mut(key), v_diff) {
            (Some(Value::Object(b)), Value::Object(d)) => {
                merge(b, d, null_mode);
            }
            (Some(slot), v_diff) => {
                *slot = v_diff.clone();
            }
            (None, _) => {}
        }
    }
}

/// Computes the minimal document `d` such that `merge(from, d,
/// NullMode::Remove)` turns `from` into `to`.
///
/// Keys present in `from` but absent from `to` map to a null tombstone.
/// Keys holding nested documents on both sides recurse. Any other value
/// inequality deep-copies `to`'s value.
#[must_use]
pub fn diff(from: &Document, to: &Document) -> Document {
    let mut rtn = Document::new();

    for (key, v_from) in from {
        match to.get(key) {
            None => {
                rtn.insert(key.clone(), Value::Null);
            }
            Some(v_to) => {
                if !deep_eq(v_from, v_to) {
                    match (v_from, v_to) {
                        (Value::Object(f), Value::Object(t)) => {
                            rtn.insert(key.clone(), Value::Object(diff(f, t)));
                        }
                        _ => {
                            rtn.insert(key.clone(), v_to.clone());
                        }
                    }
                }
            }
        }
    }

    for (key, v_to) in to {
        if !from.contains_key(key) {
            rtn.insert(key.clone(), v_to.clone());
        }
    }

    rtn
}

/// Recursively removes null-valued keys from a document.
///
/// Nested documents are descended into; arrays (and anything inside them)
/// are left untouched.
pub fn strip_nulls(doc: &mut Document) {
    doc.retain(|_, value| !value.is_null());
    for value in doc.values_mut() {
        if let Value::Object(nested) = value {
            strip_nulls(nested);
        }
    }
}

/// Deep structural equality over document values.
///
/// Key order is irrelevant; array order is significant. Numbers compare by
/// value across representations: if either side is a float both compare as
/// floats, otherwise both compare as integers.
#[must_use]
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => {
            if a.is_f64() || b.is_f64() {
                match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            } else if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                a == b
            } else {
                match (a.as_u64(), b.as_u64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| deep_eq(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, va)| b.get(key).is_some_and(|vb| deep_eq(va, vb)))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn merge_inserts_absent_keys() {
        let mut base = doc(json!({"a": 1}));
        merge(&mut base, &doc(json!({"b": 2})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn merge_replaces_scalars() {
        let mut base = doc(json!({"a": 1}));
        merge(&mut base, &doc(json!({"a": "x"})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"a": "x"})));
    }

    #[test]
    fn merge_recurses_into_nested_documents() {
        let mut base = doc(json!({"a": {"b": 1, "c": 2}}));
        merge(&mut base, &doc(json!({"a": {"b": 3}})), NullMode::Remove);
        assert!(deep_eq(
            &Value::Object(base),
            &json!({"a": {"b": 3, "c": 2}})
        ));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut base = doc(json!({"a": [1, 2, 3]}));
        merge(&mut base, &doc(json!({"a": [4]})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"a": [4]})));
    }

    #[test]
    fn merge_replaces_scalar_with_document() {
        let mut base = doc(json!({"a": 1}));
        merge(&mut base, &doc(json!({"a": {"b": 2}})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"a": {"b": 2}})));
    }

    #[test]
    fn merge_null_removes_key() {
        let mut base = doc(json!({"a": 1, "b": 2}));
        merge(&mut base, &doc(json!({"a": null})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"b": 2})));
    }

    #[test]
    fn merge_null_on_absent_key_is_noop_in_remove_mode() {
        let mut base = doc(json!({"b": 2}));
        merge(&mut base, &doc(json!({"a": null})), NullMode::Remove);
        assert!(deep_eq(&Value::Object(base), &json!({"b": 2})));
    }

    #[test]
    fn merge_null_kept_in_keep_mode() {
        let mut base = doc(json!({"b": 2}));
        merge(&mut base, &doc(json!({"a": null})), NullMode::Keep);
        assert!(deep_eq(&Value::Object(base), &json!({"a": null, "b": 2})));
    }

    #[test]
    fn diff_of_equal_documents_is_empty() {
        let a = doc(json!({"a": 1, "b": {"c": [1, 2]}}));
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn diff_tombstones_removed_keys() {
        let from = doc(json!({"a": 1, "b": 2}));
        let to = doc(json!({"b": 2}));
        assert!(deep_eq(&Value::Object(diff(&from, &to)), &json!({"a": null})));
    }

    #[test]
    fn diff_recurses_into_nested_documents() {
        let from = doc(json!({"a": {"b": 1, "c": 2}}));
        let to = doc(json!({"a": {"b": 9, "c": 2}}));
        assert!(deep_eq(
            &Value::Object(diff(&from, &to)),
            &json!({"a": {"b": 9}})
        ));
    }

    #[test]
    fn diff_includes_added_keys() {
        let from = doc(json!({}));
        let to = doc(json!({"a": 1, "b": {"c": 2}}));
        assert!(deep_eq(
            &Value::Object(diff(&from, &to)),
            &json!({"a": 1, "b": {"c": 2}})
        ));
    }

    #[test]
    fn diff_replaces_changed_arrays() {
        let from = doc(json!({"a": [1, 2]}));
        let to = doc(json!({"a": [2, 1]}));
        assert!(deep_eq(
            &Value::Object(diff(&from, &to)),
            &json!({"a": [2, 1]})
        ));
    }

    #[test]
    fn strip_nulls_descends_documents_but_not_arrays() {
        let mut d = doc(json!({"a": null, "b": {"c": null, "d": 1}, "e": [null]}));
        strip_nulls(&mut d);
        assert!(deep_eq(
            &Value::Object(d),
            &json!({"b": {"d": 1}, "e": [null]})
        ));
    }

    #[test]
    fn deep_eq_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let mut m = Document::new();
        m.insert("b".into(), json!(2));
        m.insert("a".into(), json!(1));
        assert!(deep_eq(&a, &Value::Object(m)));
    }

    #[test]
    fn deep_eq_is_array_order_sensitive() {
        assert!(!deep_eq(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn deep_eq_coerces_numeric_representations() {
        assert!(deep_eq(&json!(1), &json!(1.0)));
        assert!(!deep_eq(&json!(1), &json!(1.5)));
        assert!(deep_eq(&json!(u64::MAX), &json!(u64::MAX)));
    }

    #[test]
    fn merge_diff_inverse_law_example() {
        let a = doc(json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [1, 2]}));
        let b = doc(json!({"b": {"c": 5}, "e": [2, 1], "f": "new"}));
        let d = diff(&a, &b);
        let mut merged = a.clone();
        merge(&mut merged, &d, NullMode::Remove);
        assert!(deep_eq(&Value::Object(merged), &Value::Object(b)));
    }

    #[test]
    fn merge_is_idempotent_for_object_diffs() {
        let d = doc(json!({"a": 1, "b": {"c": 2}, "x": null}));
        let mut once = doc(json!({"a": 0, "x": 9, "keep": true}));
        merge(&mut once, &d, NullMode::Remove);
        let mut twice = once.clone();
        merge(&mut twice, &d, NullMode::Remove);
        assert!(deep_eq(&Value::Object(once), &Value::Object(twice)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Null-free documents: authoritative state never holds explicit
        /// nulls, which is exactly the domain the inverse law covers.
        fn arb_value(depth: u32) -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                any::<bool>().prop_map(Value::from),
                any::<i32>().prop_map(|n| Value::from(i64::from(n))),
                "[a-z]{0,6}".prop_map(Value::from),
            ];
            leaf.prop_recursive(depth, 32, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-d]{1,2}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        fn arb_document() -> impl Strategy<Value = Document> {
            prop::collection::btree_map("[a-d]{1,2}", arb_value(3), 0..5)
                .prop_map(|m| m.into_iter().collect())
        }

        proptest! {
            #[test]
            fn merge_diff_inverse_law(a in arb_document(), b in arb_document()) {
                let d = diff(&a, &b);
                let mut merged = a.clone();
                merge(&mut merged, &d, NullMode::Remove);
                prop_assert!(deep_eq(&Value::Object(merged), &Value::Object(b)));
            }

            #[test]
            fn diff_against_self_is_empty(a in arb_document()) {
                prop_assert!(diff(&a, &a).is_empty());
            }

            #[test]
            fn merge_idempotence(a in arb_document(), b in arb_document()) {
                let d = diff(&a, &b);
                let mut once = a.clone();
                merge(&mut once, &d, NullMode::Remove);
                let mut twice = once.clone();
                merge(&mut twice, &d, NullMode::Remove);
                prop_assert!(deep_eq(&Value::Object(once), &Value::Object(twice)));
            }
        }
    }
}
