//! Declared parameter and return types for exposed methods.
//!
//! A [`TypeSpec`] is what a service declares for each positional parameter
//! and for its return value. Binding checks a raw wire value against the
//! declaration and yields the value the target will receive.

use serde_json::Value;

/// Closed set of types a method may declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    /// No value; only meaningful as a return type.
    Void,
    /// JSON boolean.
    Bool,
    /// Signed 32-bit integer.
    Int,
    /// Signed 64-bit integer.
    Long,
    /// Any JSON number.
    Double,
    /// UTF-8 string; nullable.
    String,
    /// Homogeneous list; nullable.
    List(Box<TypeSpec>),
    /// String-keyed map with homogeneous values; nullable.
    Map(Box<TypeSpec>),
    /// Named structured object (JSON object); nullable.
    Object(String),
    /// Accepts any value unchanged.
    Any,
}

/// Failure to bind a raw value to a declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: String, found: &'static str },
    #[error("value {value} out of range for {expected}")]
    OutOfRange { expected: String, value: String },
    #[error("at {path}: {source}")]
    Nested {
        path: String,
        #[source]
        source: Box<BindError>,
    },
}

impl TypeSpec {
    /// Convenience constructor for [`TypeSpec::List`].
    #[must_use]
    pub fn list(inner: TypeSpec) -> Self {
        Self::List(Box::new(inner))
    }

    /// Convenience constructor for [`TypeSpec::Map`].
    #[must_use]
    pub fn map(inner: TypeSpec) -> Self {
        Self::Map(Box::new(inner))
    }

    /// Convenience constructor for [`TypeSpec::Object`].
    #[must_use]
    pub fn object(name: impl Into<String>) -> Self {
        Self::Object(name.into())
    }

    /// Type name echoed as `returnType` on the wire.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Bool => "boolean".to_string(),
            Self::Int => "int".to_string(),
            Self::Long => "long".to_string(),
            Self::Double => "double".to_string(),
            Self::String => "String".to_string(),
            Self::List(inner) => format!("List<{}>", inner.name()),
            Self::Map(inner) => format!("Map<String,{}>", inner.name()),
            Self::Object(name) => name.clone(),
            Self::Any => "Object".to_string(),
        }
    }

    /// Checks `raw` against this declaration and returns the bound value.
    ///
    /// Primitives are not nullable; strings, lists, maps and objects accept
    /// `null`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] on the first mismatch, with the path of the
    /// offending element for nested shapes.
    pub fn bind(&self, raw: &Value) -> Result<Value, BindError> {
        match (self, raw) {
            (Self::Any, v) => Ok(v.clone()),
            (Self::Void, Value::Null) | (Self::Bool, Value::Bool(_)) => Ok(raw.clone()),
            (Self::Int, Value::Number(n)) => {
                let v = n.as_i64().ok_or_else(|| self.mismatch(raw))?;
                if i32::try_from(v).is_err() {
                    return Err(BindError::OutOfRange {
                        expected: self.name(),
                        value: n.to_string(),
                    });
                }
                Ok(raw.clone())
            }
            (Self::Long, Value::Number(n)) => {
                if n.as_i64().is_some() {
                    Ok(raw.clone())
                } else if n.is_u64() {
                    Err(BindError::OutOfRange {
                        expected: self.name(),
                        value: n.to_string(),
                    })
                } else {
                    Err(self.mismatch(raw))
                }
            }
            (Self::Double, Value::Number(_))
            | (Self::String, Value::String(_))
            | (Self::String | Self::List(_) | Self::Map(_) | Self::Object(_), Value::Null)
            | (Self::Object(_), Value::Object(_)) => Ok(raw.clone()),
            (Self::List(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| inner.bind(item).map_err(|e| e.at(format!("[{i}]"))))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Self::Map(inner), Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| {
                    inner
                        .bind(v)
                        .map(|bound| (k.clone(), bound))
                        .map_err(|e| e.at(format!(".{k}")))
                })
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            _ => Err(self.mismatch(raw)),
        }
    }

    fn mismatch(&self, raw: &Value) -> BindError {
        BindError::Mismatch {
            expected: self.name(),
            found: json_kind(raw),
        }
    }
}

impl BindError {
    /// Prefixes this error with the location of the element that failed.
    #[must_use]
    pub fn at(self, segment: String) -> Self {
        match self {
            Self::Nested { path, source } => Self::Nested {
                path: format!("{segment}{path}"),
                source,
            },
            other => Self::Nested {
                path: segment,
                source: Box::new(other),
            },
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn names_follow_declared_shapes() {
        assert_eq!(TypeSpec::Long.name(), "long");
        assert_eq!(TypeSpec::object("User").name(), "User");
        assert_eq!(TypeSpec::list(TypeSpec::String).name(), "List<String>");
        assert_eq!(
            TypeSpec::map(TypeSpec::list(TypeSpec::Int)).name(),
            "Map<String,List<int>>"
        );
    }

    #[test]
    fn long_accepts_integers_only() {
        assert_eq!(TypeSpec::Long.bind(&json!(42)).unwrap(), json!(42));
        assert!(matches!(
            TypeSpec::Long.bind(&json!("42")),
            Err(BindError::Mismatch { found: "string", .. })
        ));
        assert!(matches!(
            TypeSpec::Long.bind(&json!(1.5)),
            Err(BindError::Mismatch { found: "double", .. })
        ));
        assert!(matches!(
            TypeSpec::Long.bind(&json!(u64::MAX)),
            Err(BindError::OutOfRange { .. })
        ));
    }

    #[test]
    fn int_rejects_values_beyond_i32() {
        assert!(TypeSpec::Int.bind(&json!(i64::from(i32::MAX))).is_ok());
        assert!(matches!(
            TypeSpec::Int.bind(&json!(i64::from(i32::MAX) + 1)),
            Err(BindError::OutOfRange { .. })
        ));
    }

    #[test]
    fn primitives_are_not_nullable() {
        assert!(TypeSpec::Bool.bind(&Value::Null).is_err());
        assert!(TypeSpec::Long.bind(&Value::Null).is_err());
        assert_eq!(TypeSpec::String.bind(&Value::Null).unwrap(), Value::Null);
        assert_eq!(TypeSpec::object("User").bind(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn nested_mismatch_reports_path() {
        let spec = TypeSpec::map(TypeSpec::list(TypeSpec::Long));
        let err = spec.bind(&json!({"ids": [1, 2, "x"]})).unwrap_err();
        match err {
            BindError::Nested { path, source } => {
                assert_eq!(path, ".ids[2]");
                assert!(matches!(*source, BindError::Mismatch { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn object_binds_nested_structure_unchanged() {
        let raw = json!({"id": 7, "name": "ada", "tags": ["a", "b"], "addr": {"city": "x"}});
        assert_eq!(TypeSpec::object("User").bind(&raw).unwrap(), raw);
    }
}
