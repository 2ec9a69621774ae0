//! Parse-time target extraction from `deps_query` expressions.
//!
//! Only literals are extracted; the query itself is evaluated later by the
//! build. A literal is a word (or quoted string) that starts with `:` or
//! contains `//`. Placeholders such as `$declared_deps` are skipped.

/// Target literals of `query` in order of appearance, duplicates removed.
pub fn parse_time_targets(query: &str) -> Result<Vec<&str>, String> {
    let mut targets = Vec::new();
    let mut rest = query;
    while let Some(start) = rest.find(|c: char| !is_separator(c)) {
        rest = &rest[start..];
        let (token, after) = next_token(rest)?;
        if is_target_literal(token) && !targets.contains(&token) {
            targets.push(token);
        }
        rest = after;
    }
    Ok(targets)
}

fn next_token(input: &str) -> Result<(&str, &str), String> {
    let mut chars = input.char_indices();
    let Some((_, first)) = chars.next() else {
        return Ok(("", input));
    };
    if first == '\'' || first == '"' {
        let body = &input[1..];
        let end = body
            .find(first)
            .ok_or_else(|| format!("unterminated string starting at `{}`", input))?;
        return Ok((&body[..end], &body[end + 1..]));
    }
    if !is_word_char(first) {
        // Operators and punctuation are single-character tokens.
        let len = first.len_utf8();
        return Ok((&input[..len], &input[len..]));
    }
    let end = input
        .find(|c: char| !is_word_char(c))
        .unwrap_or(input.len());
    Ok((&input[..end], &input[end..]))
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ',' || c == '(' || c == ')'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '/' | '@' | '.' | '-' | '_' | ':' | '$' | '~' | '#' | '*' | '=')
}

fn is_target_literal(token: &str) -> bool {
    !token.starts_with('$') && (token.starts_with(':') || token.contains("//"))
}
