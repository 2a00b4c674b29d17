//! Argument expansion plans.
//!
//! Arguments are compiled once into [`Resolvable`]s and resolved against the
//! current variable bindings every time the statement runs.

use crate::env::Variables;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved variable: {name}")]
pub struct UnresolvedVariable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolvable {
    Constant(String),
    Variable(String),
    VariableOrFallback { name: String, fallback: String },
    /// Concatenation, used for quoted strings with embedded expansions.
    Composite(Vec<Resolvable>),
}

impl Resolvable {
    pub fn resolve(&self, variables: &Variables) -> Result<String, UnresolvedVariable> {
        match self {
            Resolvable::Constant(value) => Ok(value.clone()),
            Resolvable::Variable(name) => {
                variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| UnresolvedVariable { name: name.clone() })
            }
            Resolvable::VariableOrFallback { name, fallback } => Ok(variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| fallback.clone())),
            Resolvable::Composite(parts) => {
                let mut result = String::new();
                for part in parts {
                    result.push_str(&part.resolve(variables)?);
                }
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variables(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_composite_concatenates_in_order() {
        let composite = Resolvable::Composite(vec![
            Resolvable::Constant("x".to_string()),
            Resolvable::Variable("V".to_string()),
        ]);
        assert_eq!(composite.resolve(&variables(&[("V", "y")])).unwrap(), "xy");
        assert_eq!(
            composite.resolve(&variables(&[])).unwrap_err(),
            UnresolvedVariable {
                name: "V".to_string()
            }
        );
    }

    #[test]
    fn test_fallback_only_applies_when_absent() {
        let plan = Resolvable::VariableOrFallback {
            name: "HOME".to_string(),
            fallback: "/".to_string(),
        };
        assert_eq!(plan.resolve(&variables(&[])).unwrap(), "/");
        assert_eq!(
            plan.resolve(&variables(&[("HOME", "/home/me")])).unwrap(),
            "/home/me"
        );
    }

    #[test]
    fn test_empty_value_is_not_absent() {
        let plan = Resolvable::Variable("EMPTY".to_string());
        assert_eq!(plan.resolve(&variables(&[("EMPTY", "")])).unwrap(), "");
    }
}
