use serde_json::{Map, Value};

use crate::operation::Variables;

/// Stable identity of a cached result.
///
/// Rendered as `name` or `name({...})` where the object holds the selecting
/// arguments with keys sorted at every depth, so argument order never changes
/// the key. For example the district list for province 79 is
/// `getDistricts({"provinceId":"79"})`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for `operation` called with `variables`.
    ///
    /// `key_args` selects which variables identify the entry; `None` uses all
    /// of them. Selected names absent from `variables` are skipped.
    pub fn for_operation(operation: &str, variables: &Variables, key_args: Option<&[String]>) -> Self {
        let selected: Map<String, Value> = match key_args {
            Some(args) => args
                .iter()
                .filter_map(|a| variables.get(a).map(|v| (a.clone(), v.clone())))
                .collect(),
            None => variables.clone(),
        };

        if selected.is_empty() {
            return Self(operation.to_string());
        }
        Self(format!("{operation}({})", render_sorted(&selected)))
    }

    /// Operation name part of the key.
    pub fn operation(&self) -> &str {
        self.0.split_once('(').map_or(self.0.as_str(), |(name, _)| name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize with object keys sorted regardless of map ordering features.
fn render_sorted(map: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{}:{}", Value::String(k.clone()), render(&map[k])))
        .collect();
    format!("{{{}}}", parts.join(","))
}

fn render(value: &Value) -> String {
    match value {
        Value::Object(map) => render_sorted(map),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_no_args_is_bare_name() {
        let key = CacheKey::for_operation("getProvinces", &Variables::new(), None);
        assert_eq!(key.as_str(), "getProvinces");
        assert_eq!(key.operation(), "getProvinces");
    }

    #[test]
    fn test_district_keys() {
        let a = CacheKey::for_operation("getDistricts", &vars(json!({"provinceId": "79"})), None);
        let b = CacheKey::for_operation("getDistricts", &vars(json!({"provinceId": "01"})), None);
        assert_eq!(a.as_str(), r#"getDistricts({"provinceId":"79"})"#);
        assert_ne!(a, b);
        assert_eq!(a.operation(), "getDistricts");
    }

    #[test]
    fn test_selected_args_only() {
        let select = vec!["categoryId".to_string()];
        let p1 = CacheKey::for_operation(
            "getProducts",
            &vars(json!({"categoryId": "c1", "page": 1})),
            Some(&select),
        );
        let p2 = CacheKey::for_operation(
            "getProducts",
            &vars(json!({"categoryId": "c1", "page": 2})),
            Some(&select),
        );
        assert_eq!(p1, p2);
        assert_eq!(p1.as_str(), r#"getProducts({"categoryId":"c1"})"#);
    }

    #[test]
    fn test_missing_selected_arg_is_skipped() {
        let select = vec!["categoryId".to_string()];
        let key = CacheKey::for_operation("getProducts", &vars(json!({"page": 3})), Some(&select));
        assert_eq!(key.as_str(), "getProducts");
    }

    #[test]
    fn test_nested_objects_sorted() {
        let a = CacheKey::for_operation(
            "search",
            &vars(json!({"filter": {"b": 1, "a": [{"y": 2, "x": 1}]}})),
            None,
        );
        assert_eq!(a.as_str(), r#"search({"filter":{"a":[{"x":1,"y":2}],"b":1}})"#);
    }

    proptest! {
        #[test]
        fn prop_argument_order_never_matters(
            entries in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 1..6)
        ) {
            let forward: Variables = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let reverse: Variables = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            prop_assert_eq!(
                CacheKey::for_operation("op", &forward, None),
                CacheKey::for_operation("op", &reverse, None)
            );
        }

        #[test]
        fn prop_distinct_selecting_args_never_collide(a in "[ -~]{0,12}", b in "[ -~]{0,12}") {
            prop_assume!(a != b);
            let ka = CacheKey::for_operation("getDistricts", &vars(json!({"provinceId": a})), None);
            let kb = CacheKey::for_operation("getDistricts", &vars(json!({"provinceId": b})), None);
            prop_assert_ne!(ka, kb);
        }
    }
}
