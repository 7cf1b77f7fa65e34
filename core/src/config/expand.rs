//! Path expansion for user-entered server fields such as key locations.

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// `~user` forms are left alone, as is everything when no home directory
/// can be determined.
pub fn expand_tilde(input: &str) -> String {
    let Some(rest) = input.strip_prefix('~') else {
        return input.to_string();
    };
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')) {
        return input.to_string();
    }
    match dirs::home_dir() {
        Some(home) => format!("{}{rest}", home.to_string_lossy()),
        None => input.to_string(),
    }
}

/// Replace `${env:NAME}` placeholders with environment values. Unset
/// variables and unterminated placeholders are kept verbatim.
pub fn expand_env_placeholders(input: &str) -> String {
    const OPEN: &str = "${env:";
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        result.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        match std::env::var(&after[..end]) {
            Ok(value) => result.push_str(&value),
            Err(_) => result.push_str(&rest[start..start + OPEN.len() + end + 1]),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}

/// Placeholders first, then the tilde.
pub fn expand_path(input: &str) -> String {
    expand_tilde(&expand_env_placeholders(input))
}
