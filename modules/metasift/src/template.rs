use std::collections::HashMap;

use anyhow::{bail, Result};

/// Replace `{{var}}` placeholders found in `vars`. Unknown placeholders are
/// left intact so a template can be filled in several passes.
pub fn resolve_vars(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => {
                        // Unclosed; emit what we have.
                        result.push_str("{{");
                        result.push_str(&var_name);
                        return result;
                    }
                }
            }

            let name = var_name.trim();
            match vars.get(name) {
                Some(value) => result.push_str(value),
                None => {
                    result.push_str("{{");
                    result.push_str(&var_name);
                    result.push_str("}}");
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Check that every `{{var}}` in `template` is one of `allowed`.
pub fn validate_template(template: &str, allowed: &[&str]) -> Result<()> {
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            bail!("Unclosed template variable near: {}", &rest[open..]);
        };
        let name = after[..close].trim();
        if !allowed.contains(&name) {
            bail!("Unknown template variable: {{{{{name}}}}}. Allowed: {allowed:?}");
        }
        rest = &after[close + 2..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vars_are_replaced_and_unknown_kept() {
        let vars = HashMap::from([("field", "hydrology")]);
        assert_eq!(
            resolve_vars("expert in {{field}} reading {{ kind }}s", &vars),
            "expert in hydrology reading {{ kind }}s"
        );
    }

    #[test]
    fn values_are_not_rescanned() {
        let vars = HashMap::from([("topic", "{{kind}}"), ("kind", "table")]);
        assert_eq!(resolve_vars("{{topic}}", &vars), "{{kind}}");
    }

    #[test]
    fn unclosed_placeholder_is_emitted_verbatim() {
        assert_eq!(resolve_vars("a {{b", &HashMap::new()), "a {{b");
    }

    #[test]
    fn validation_rejects_unknown_names() {
        assert!(validate_template("{{field}} {{kind}}", &["field", "kind"]).is_ok());
        assert!(validate_template("{{feild}}", &["field"]).is_err());
        assert!(validate_template("{{field", &["field"]).is_err());
    }
}
