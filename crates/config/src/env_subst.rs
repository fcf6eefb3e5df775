/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${NAME}` placeholders using `lookup`. Unknown names, empty names
/// and unterminated placeholders are copied through literally.
pub fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let placeholder = &rest[start..start + end + 3];
                match lookup(&after[..end]) {
                    Some(value) => result.push_str(&value),
                    None => result.push_str(placeholder),
                }
                rest = &after[end + 1..];
            },
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "BOLTLINE_TEST_VAR" => Some("hello".to_string()),
            _ => None,
        };
        assert_eq!(
            substitute_env_with("key=${BOLTLINE_TEST_VAR}", lookup),
            "key=hello"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("${BOLTLINE_NONEXISTENT_XYZ}", lookup),
            "${BOLTLINE_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("root = \"${HOME", lookup), "root = \"${HOME");
    }

    #[test]
    fn substitutes_inside_toml_value() {
        let lookup = |name: &str| (name == "WORKSPACE").then(|| "/tmp/ws".to_string());
        assert_eq!(
            substitute_env_with("root = \"${WORKSPACE}/app\"", lookup),
            "root = \"/tmp/ws/app\""
        );
    }

    #[test]
    fn empty_name_is_literal() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("a${}b", lookup), "a${}b");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
