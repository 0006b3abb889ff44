/// Escaping Module
///
/// String literal, identifier and LIKE-pattern escaping for MySQL-flavoured
/// SQL. These are pure functions; the Connection wraps them with its
/// configured escape characters and table prefix.

use crate::core::value::Value;
use std::fmt::Write;

/// Escapes the body of a string literal (without surrounding quotes).
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out
}

/// Renders a value as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", escape_string(s)),
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                let _ = write!(hex, "{:02X}", b);
            }
            hex.push('\'');
            hex
        }
    }
}

/// Escapes a value for use inside a LIKE pattern where no `ESCAPE` clause
/// can be given: the literal is escaped first, then `%`, `_` and the
/// configured LIKE escape character are each prefixed with a backslash.
pub trait EscapeLike {
    type Output;

    fn escape_like(&self, like_escape_char: char) -> Self::Output;
}

impl EscapeLike for str {
    type Output = String;

    fn escape_like(&self, like_escape_char: char) -> String {
        let body = escape_string(self);
        let mut out = String::with_capacity(body.len() + 4);
        for c in body.chars() {
            if c == like_escape_char || c == '%' || c == '_' {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

impl EscapeLike for String {
    type Output = String;

    fn escape_like(&self, like_escape_char: char) -> String {
        self.as_str().escape_like(like_escape_char)
    }
}

impl<T: EscapeLike + ?Sized> EscapeLike for &T {
    type Output = T::Output;

    fn escape_like(&self, like_escape_char: char) -> Self::Output {
        (**self).escape_like(like_escape_char)
    }
}

impl<T: EscapeLike> EscapeLike for [T] {
    type Output = Vec<T::Output>;

    fn escape_like(&self, like_escape_char: char) -> Self::Output {
        self.iter().map(|v| v.escape_like(like_escape_char)).collect()
    }
}

impl<T: EscapeLike> EscapeLike for Vec<T> {
    type Output = Vec<T::Output>;

    fn escape_like(&self, like_escape_char: char) -> Self::Output {
        self.as_slice().escape_like(like_escape_char)
    }
}

/// Quotes a possibly dotted identifier (`db.table`), segment by segment.
pub fn escape_identifiers(item: &str, escape_char: char) -> String {
    item.split('.')
        .map(|segment| {
            let wrapped = segment.len() >= 2
                && segment.starts_with(escape_char)
                && segment.ends_with(escape_char);
            if segment == "*" || wrapped {
                segment.to_string()
            } else {
                let doubled = segment.replace(escape_char, &format!("{0}{0}", escape_char));
                format!("{0}{1}{0}", escape_char, doubled)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Applies the table prefix to the last segment of a table reference
/// (unless already present) and quotes the result.
pub fn protect_table(table: &str, prefix: &str, escape_char: char) -> String {
    let (schema, name) = match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    };
    let name = if !prefix.is_empty() && !name.starts_with(prefix) {
        format!("{}{}", prefix, name)
    } else {
        name.to_string()
    };
    let full = match schema {
        Some(schema) => format!("{}.{}", schema, name),
        None => name,
    };
    escape_identifiers(&full, escape_char)
}
