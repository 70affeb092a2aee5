//! Structured query builder for the tracking server's query grammar.
//!
//! Supports equality, boolean AND, `IN` comparison, and nested field
//! dereference. Text values are escaped so user-controlled names cannot
//! break out of the grammar.

/// One composed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    expr: String,
}

/// Field selected for comparison; terminal methods produce a [`Query`].
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
}

impl Query {
    pub fn field(name: &str) -> Field {
        Field {
            name: name.to_string(),
        }
    }

    /// Boolean AND of two expressions.
    pub fn and(self, other: Query) -> Query {
        Query {
            expr: format!("{};{}", self.expr, other.expr),
        }
    }

    /// Final quoted form, ready for a `query=` request parameter.
    pub fn build(&self) -> String {
        format!("\"{}\"", self.expr)
    }

    fn raw(&self) -> &str {
        &self.expr
    }
}

impl Field {
    pub fn equals(self, value: &str) -> Query {
        Query {
            expr: format!("({} EQ '{}')", self.name, escape_query_value(value)),
        }
    }

    /// Nested field dereference, e.g. `ci_server EQ {id EQ '1001'}`.
    pub fn equals_query(self, inner: Query) -> Query {
        Query {
            expr: format!("({} EQ {{{}}})", self.name, inner.raw()),
        }
    }

    pub fn in_values(self, values: &[&str]) -> Query {
        let list = values
            .iter()
            .map(|value| format!("'{}'", escape_query_value(value)))
            .collect::<Vec<_>>()
            .join(",");
        Query {
            expr: format!("({} IN {})", self.name, list),
        }
    }
}

/// Escape backslashes and parentheses, the metacharacters of the grammar.
pub fn escape_query_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        let query = Query::field("name").equals("CI");
        assert_eq!(query.build(), "\"(name EQ 'CI')\"");
    }

    #[test]
    fn test_and_composition() {
        let query = Query::field("name")
            .equals("CI")
            .and(Query::field("instance_id").equals("GHA-acme"));
        assert_eq!(
            query.build(),
            "\"(name EQ 'CI');(instance_id EQ 'GHA-acme')\""
        );
    }

    #[test]
    fn test_nested_dereference() {
        let query = Query::field("ci_server").equals_query(Query::field("id").equals("1001"));
        assert_eq!(query.build(), "\"(ci_server EQ {(id EQ '1001')})\"");
    }

    #[test]
    fn test_in_comparison() {
        let query = Query::field("status").in_values(&["queued", "running"]);
        assert_eq!(query.build(), "\"(status IN 'queued','running')\"");
    }

    #[test]
    fn test_values_are_escaped() {
        let query = Query::field("name").equals("build (nightly) C:\\ci");
        assert_eq!(
            query.build(),
            "\"(name EQ 'build \\(nightly\\) C:\\\\ci')\""
        );
    }

    #[test]
    fn test_escape_is_referentially_stable() {
        assert_eq!(
            escape_query_value("a(b)c"),
            escape_query_value("a(b)c")
        );
    }
}
