//! Steady-state condition expressions
//!
//! A condition such as `${response.status.phase == "Ready"}` is a string with
//! `${...}` placeholders. Each placeholder is evaluated as a MiniJinja
//! expression against a context whose `response` is the parsed JSON of the
//! resource, and replaced by the result. The resource is steady when the
//! substituted string is `true`.
//!
//! Placeholders may contain braces (map literals) and quoted strings; the
//! closing `}` is the one that balances the opening `${`.

use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::{EngineError, Result};

/// Byte ranges of the `${...}` placeholders in `template`
///
/// An unterminated placeholder and everything after it is left as text.
fn placeholders(template: &str) -> Vec<(usize, usize)> {
    let bytes = template.as_bytes();
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(offset) = template[from..].find("${") {
        let start = from + offset;
        let mut depth = 0usize;
        let mut quote = None;
        let mut end = None;
        let mut i = start + 2;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(_) if b == b'\\' => i += 1,
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'{' => depth += 1,
                    b'}' if depth == 0 => {
                        end = Some(i);
                        break;
                    }
                    b'}' => depth -= 1,
                    _ => {}
                },
            }
            i += 1;
        }

        let Some(end) = end else { break };
        found.push((start, end + 1));
        from = end + 1;
    }
    found
}

/// Evaluates `${...}` expressions; one instance per task
pub struct ExpressionEvaluator {
    env: Environment<'static>,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        Self { env }
    }

    fn eval(&self, expression: &str, context: &Value) -> Result<Value> {
        let compiled = self
            .env
            .compile_expression(expression)
            .map_err(|e| EngineError::Expression {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        compiled.eval(context).map_err(|e| EngineError::Expression {
            expression: expression.to_string(),
            message: e.to_string(),
        })
    }

    /// Replace every placeholder in `template` with its value in `context`
    pub fn substitute(&self, template: &str, context: &Value) -> Result<String> {
        let mut substituted = String::with_capacity(template.len());
        let mut last = 0;
        for (start, end) in placeholders(template) {
            substituted.push_str(&template[last..start]);
            let value = self.eval(template[start + 2..end - 1].trim(), context)?;
            if !(value.is_undefined() || value.is_none()) {
                substituted.push_str(&value.to_string());
            }
            last = end;
        }
        substituted.push_str(&template[last..]);
        Ok(substituted)
    }

    /// Evaluate a steady-state condition against raw `kubectl get -o json` output
    ///
    /// Output that is not JSON is exposed to the expression as a plain string.
    pub fn evaluate_condition(&self, condition: &str, response: &str) -> Result<bool> {
        let response = match serde_json::from_str::<serde_json::Value>(response) {
            Ok(json) => Value::from_serialize(&json),
            Err(_) => Value::from(response),
        };
        let context = minijinja::context! { response => response };

        let result = self.substitute(condition, &context)?;
        Ok(result.trim().eq_ignore_ascii_case("true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: &str = r#"{"kind":"Foo","status":{"ready":true,"phase":"Running","replicas":3}}"#;
    const NOT_READY: &str = r#"{"kind":"Foo","status":{"ready":false}}"#;

    #[test]
    fn test_evaluate_simple_path() {
        let evaluator = ExpressionEvaluator::new();
        assert!(evaluator.evaluate_condition("${response.status.ready}", READY).unwrap());
        assert!(!evaluator.evaluate_condition("${response.status.ready}", NOT_READY).unwrap());
    }

    #[test]
    fn test_evaluate_comparison() {
        let evaluator = ExpressionEvaluator::new();
        let condition = r#"${response.status.phase == "Running" and response.status.replicas >= 3}"#;
        assert!(evaluator.evaluate_condition(condition, READY).unwrap());
    }

    #[test]
    fn test_missing_field_is_not_steady() {
        let evaluator = ExpressionEvaluator::new();
        assert!(!evaluator
            .evaluate_condition("${response.status.missing.deep}", NOT_READY)
            .unwrap());
    }

    #[test]
    fn test_substitute_mixed_text() {
        let evaluator = ExpressionEvaluator::new();
        let context = minijinja::context! { name => "web", replicas => 2 };
        assert_eq!(
            evaluator
                .substitute("${name} has ${replicas} replicas", &context)
                .unwrap(),
            "web has 2 replicas"
        );
    }

    #[test]
    fn test_braces_inside_placeholder() {
        let evaluator = ExpressionEvaluator::new();
        let map_literal = r#"${ {"Running": true, "Failed": false}[response.status.phase] }"#;
        assert!(evaluator.evaluate_condition(map_literal, READY).unwrap());

        let quoted = r#"${ response.kind ~ "}" == "Foo}" }"#;
        assert!(evaluator.evaluate_condition(quoted, READY).unwrap());
    }

    #[test]
    fn test_unterminated_placeholder_is_text() {
        let evaluator = ExpressionEvaluator::new();
        let context = minijinja::context! { name => "web" };
        assert_eq!(
            evaluator.substitute("${name}-${name", &context).unwrap(),
            "web-${name"
        );
    }

    #[test]
    fn test_invalid_expression() {
        let evaluator = ExpressionEvaluator::new();
        let err = evaluator
            .evaluate_condition("${response.status ==}", READY)
            .unwrap_err();
        assert!(matches!(err, EngineError::Expression { .. }));
    }

    #[test]
    fn test_plain_true_without_placeholders() {
        let evaluator = ExpressionEvaluator::new();
        assert!(evaluator.evaluate_condition("TRUE", "not json").unwrap());
    }
}
