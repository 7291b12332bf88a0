use std::collections::{BTreeMap, HashMap};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing the evaluation context sent along with every flag
/// resolution.
///
/// Keys are strings naming a context attribute (e.g., a user id or an environment name).
///
/// # Examples
/// ```
/// # use flagd_web::{EvaluationContext, ContextValue};
/// let context = [
///     ("email".to_owned(), "user@example.com".into()),
///     ("beta_opt_in".to_owned(), true.into()),
/// ].into_iter().collect::<EvaluationContext>();
/// ```
pub type EvaluationContext = HashMap<String, ContextValue>;

/// Enum representing possible values of a context attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum ContextValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Serialize the context with a stable key order.
///
/// `EvaluationContext` is a `HashMap`, so its natural serialization order depends on how the map
/// was built. Fingerprinting requires that content-equal contexts serialize identically, so keys
/// are sorted first.
pub(crate) fn canonical_json(context: &EvaluationContext) -> String {
    let ordered: BTreeMap<&String, &ContextValue> = context.iter().collect();
    // Serialization of a map with string keys and scalar values cannot fail.
    serde_json::to_string(&ordered).expect("context serialization should not fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_sorted() {
        let context = [
            ("zebra".to_owned(), ContextValue::from(1.0)),
            ("alpha".to_owned(), ContextValue::from("a")),
        ]
        .into_iter()
        .collect::<EvaluationContext>();

        assert_eq!(canonical_json(&context), r#"{"alpha":"a","zebra":1.0}"#);
    }

    #[test]
    fn canonical_json_ignores_construction_order() {
        let forward = [
            ("a".to_owned(), ContextValue::from(true)),
            ("b".to_owned(), ContextValue::Null),
        ]
        .into_iter()
        .collect::<EvaluationContext>();
        let backward = [
            ("b".to_owned(), ContextValue::Null),
            ("a".to_owned(), ContextValue::from(true)),
        ]
        .into_iter()
        .collect::<EvaluationContext>();

        assert_eq!(canonical_json(&forward), canonical_json(&backward));
    }
}
