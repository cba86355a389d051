//! Placeholder substitution over file content.
use std::str::Utf8Error;

use bytes::Bytes;
use thiserror::Error;

use crate::env::EnvSnapshot;

/// Failure to transform raw content.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The raw bytes are not text; substitution only applies to text.
    #[error("content is not valid utf-8: {0}")]
    Encoding(#[from] Utf8Error),
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Substitute `${NAME}` and `$NAME` placeholders with snapshot values.
///
/// Names follow shell convention: a leading ASCII letter or underscore, then
/// letters, digits, and underscores. An unset name substitutes as the empty
/// string, matching shell expansion. Tokens that do not form a reference (an
/// unterminated `${`, a `$` before a character that cannot start a name) are
/// left verbatim.
pub fn substitute(raw: &[u8], env: &EnvSnapshot) -> Result<Bytes, TransformError> {
    let text = std::str::from_utf8(raw)?;
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // Braced form: ${NAME}
        if i + 1 < chars.len() && chars[i + 1] == '{' {
            let name_start = i + 2;
            let mut j = name_start;
            while j < chars.len() && is_name_char(chars[j]) {
                j += 1;
            }
            let well_formed = j > name_start
                && j < chars.len()
                && chars[j] == '}'
                && is_name_start(chars[name_start]);
            if well_formed {
                let name: String = chars[name_start..j].iter().collect();
                out.push_str(&env.get(&name).unwrap_or_default());
                i = j + 1;
                continue;
            }
            // Not a reference; emit the dollar and rescan from the brace.
            out.push('$');
            i += 1;
            continue;
        }

        // Bare form: $NAME
        if i + 1 < chars.len() && is_name_start(chars[i + 1]) {
            let name_start = i + 1;
            let mut j = name_start + 1;
            while j < chars.len() && is_name_char(chars[j]) {
                j += 1;
            }
            let name: String = chars[name_start..j].iter().collect();
            out.push_str(&env.get(&name).unwrap_or_default());
            i = j;
            continue;
        }

        out.push('$');
        i += 1;
    }

    Ok(Bytes::from(out.into_bytes()))
}
