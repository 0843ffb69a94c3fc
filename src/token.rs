//! Token expansion: the one small utility shared by the identity expander
//! and the tag composer (spec.md §9 "two call sites, two policies").
//!
//! Recognizes both `${VAR}` and bare `$VAR` forms. A lookup closure supplies
//! values; what happens to a token the closure can't resolve is controlled
//! by [`MissingPolicy`].

/// What to do with a `${x}` / `$x` token the lookup function didn't resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Leave the token exactly as written — used for id expansion, where an
    /// unresolved token is the signal that the id still needs label-splitting.
    PreserveLiteral,
    /// Replace the token with the empty string — used for tag expansion.
    Empty,
}

/// Expand all `${name}` and `$name` occurrences in `input`, calling
/// `lookup(name)` for each. `name` may contain letters, digits, `_`, `:`,
/// and `.` (enough for both OS-env-style names and the synthetic
/// `METRIC:name` keys injected by the tag composer).
pub fn expand(input: &str, policy: MissingPolicy, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            output.push(bytes[i] as char);
            i += 1;
            continue;
        }

        // Find the char boundary correctly by operating on the str slice
        // rather than raw bytes once we've spotted a candidate '$'.
        let rest = &input[i..];
        if let Some(braced) = rest.strip_prefix("${") {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                match lookup(name) {
                    Some(value) => output.push_str(&value),
                    None => match policy {
                        MissingPolicy::PreserveLiteral => {
                            output.push_str("${");
                            output.push_str(name);
                            output.push('}');
                        }
                        MissingPolicy::Empty => {}
                    },
                }
                i += 2 + name.len() + 1;
                continue;
            }
        }

        let name_len = rest[1..]
            .char_indices()
            .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == ':' || *c == '.')
            .count();
        if name_len > 0 {
            let name = &rest[1..1 + name_len];
            match lookup(name) {
                Some(value) => output.push_str(&value),
                None => match policy {
                    MissingPolicy::PreserveLiteral => {
                        output.push('$');
                        output.push_str(name);
                    }
                    MissingPolicy::Empty => {}
                },
            }
            i += 1 + name_len;
        } else {
            output.push('$');
            i += 1;
        }
    }

    output
}

/// Every `${name}` token still present in `input`, in order of appearance.
/// Used by the identity expander to detect a "templated id" (spec.md §4.2
/// step 1) and to drive per-datapoint label splitting (step 3).
pub fn unresolved_tokens(input: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            tokens.push(&after[..end]);
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    tokens
}
