/// Wraps a name in quotes for error messages.
pub fn quote(text: &str) -> String {
    format!("{:?}", text)
}

/// Convert a `snake_case` or `kebab-case` name to lowerCamelCase, the way
/// descriptor JSON spells field names.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (i, c) in name.chars().enumerate() {
        if c == '_' || c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else if i == 0 {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
