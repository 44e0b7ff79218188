use serde_json::{Map, Value};

/// Substitute `{key}` placeholders from `params`, then from `extra`.
/// Lists are joined with commas; `null` resolves to an empty string.
pub fn render_template(template: &str, params: &Map<String, Value>, extra: &[(&str, &str)]) -> String {
    let mut cmd = template.to_string();

    for (key, value) in params {
        let placeholder = format!("{{{}}}", key);
        if cmd.contains(&placeholder) {
            cmd = cmd.replace(&placeholder, &value_to_arg(value));
        }
    }

    for (key, value) in extra {
        cmd = cmd.replace(&format!("{{{}}}", key), value);
    }

    cmd
}

fn value_to_arg(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_to_arg).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Returns true if the command still has unresolved {placeholders}
pub fn has_unresolved(command: &str) -> bool {
    regex::Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}")
        .map(|re| re.is_match(command))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_render_scalars() {
        let p = params(json!({"exposure": 120.5, "count": 10, "filter": "Ha"}));
        let cmd = render_template("capture --exp {exposure} -n {count} -f {filter}", &p, &[]);
        assert_eq!(cmd, "capture --exp 120.5 -n 10 -f Ha");
    }

    #[test]
    fn test_render_list_and_extra() {
        let p = params(json!({"steps": ["calibrate", "stack"]}));
        let cmd = render_template("process {steps} --run {run_id}", &p, &[("run_id", "r-1")]);
        assert_eq!(cmd, "process calibrate,stack --run r-1");
    }

    #[test]
    fn test_camel_case_placeholders() {
        let p = params(json!({"stepSize": 50}));
        assert_eq!(render_template("focus --step {stepSize}", &p, &[]), "focus --step 50");
    }

    #[test]
    fn test_has_unresolved() {
        assert!(has_unresolved("solve {image}"));
        assert!(has_unresolved("focus --step {stepSize}"));
        assert!(!has_unresolved("solve /tmp/frame.fits"));
        assert!(!has_unresolved("echo '{}'"));
    }
}
