//! CLI command implementations.

pub mod eval;
pub mod run;

use anyhow::Result;
use ferry::{HostFunction, Interpreter, InterpreterConfig, Value};

/// Creates an interpreter with the CLI's host globals installed.
pub fn interpreter(config: InterpreterConfig) -> Result<Interpreter> {
    let interp = Interpreter::with_config(config)?;
    interp.set_global("print", &Value::from(print()))?;
    Ok(interp)
}

/// `print(...args)`: writes its arguments to stdout separated by spaces.
fn print() -> HostFunction {
    HostFunction::new(|args| {
        let line = args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}", line);
        Ok(Value::None)
    })
}

/// Renders a result as pretty JSON, or with `Display` when it has no JSON form.
pub fn render(value: &Value) -> String {
    value
        .to_json()
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_json() {
        let value = Value::from(json!({"a": [1, "x"]}));
        assert_eq!(render(&value), "{\n  \"a\": [\n    1.0,\n    \"x\"\n  ]\n}");
    }

    #[test]
    fn test_render_function_falls_back_to_display() {
        let value = Value::from(HostFunction::new(|_| Ok(Value::None)));
        assert_eq!(render(&value), "<function>");
    }

    #[test]
    fn test_print_is_installed() {
        let interp = interpreter(InterpreterConfig::default()).unwrap();
        assert_eq!(
            interp.evaluate("typeof print").unwrap(),
            Value::from("function")
        );
        assert_eq!(interp.evaluate("print('hi', 1)").unwrap(), Value::None);
    }
}
