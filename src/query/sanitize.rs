/// Strips control characters, quotes and backslashes from a filter value.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '\'' | '"' | '`' | '\\'))
        .collect()
}

pub fn sanitize_all(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| sanitize(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_controls_are_removed() {
        assert_eq!(sanitize("%o'brien\"%"), "%obrien%");
        assert_eq!(sanitize("a\u{0}b\nc\\d"), "abcd");
        assert_eq!(sanitize_all(&["x'", "y"]), vec!["x", "y"]);
    }
}
