//! Bounded variable representations for prompts.
//!
//! A giant data structure should cost a handful of tokens, not thousands.
//! `max_len` is a guide rather than a hard cap: results may overshoot by
//! the width of the ellipsis markers.

use crate::frame::{Namespace, VarValue};

/// Repr of `value`, shortened to roughly `max_len` characters.
///
/// Values whose repr already fits are returned unchanged. Longer values are
/// cut at structural boundaries (whole dict entries, a prefix of a
/// sequence) and always carry a `...` marker. A dict value too long for the
/// budget left is itself truncated.
pub fn truncated_repr(value: &VarValue, max_len: usize) -> String {
    let repr = value.repr();
    let repr_len = repr.chars().count();
    if repr_len < max_len {
        return repr;
    }

    match value {
        VarValue::Dict(items) => {
            let mut length = 5;
            let mut body = String::new();
            for (k, v) in items {
                if length >= max_len.saturating_sub(2) {
                    break;
                }
                let key = k.repr();
                let left = max_len.saturating_sub(length + key.chars().count() + 2);
                let mut value = v.repr();
                if value.chars().count() > left + 4 {
                    value = truncated_repr(v, left);
                }
                let entry = format!("{key}: {value}, ");
                length += entry.chars().count();
                body.push_str(&entry);
            }
            format!("{{{}...}}", body.trim_end())
        }
        VarValue::Str(_) => {
            let head: String = repr.chars().take(max_len.saturating_sub(4)).collect();
            format!("{head}...'")
        }
        VarValue::List(items) | VarValue::Tuple(items) | VarValue::Set(items) => {
            truncate_sequence(value, items, repr_len, max_len)
        }
        VarValue::Class { name } => format!("<class {name}>"),
        VarValue::Int(i) => format!("{:.3e}", *i as f64),
        VarValue::Float(f) => format!("{f:.3e}"),
        _ => qualname(value),
    }
}

/// Re-render a proportional prefix of the sequence and mark the cut.
///
/// The prefix length is estimated from the ratio of budget to full repr
/// length rather than searched for, so the result can land a little under
/// or over the budget.
fn truncate_sequence(value: &VarValue, items: &[VarValue], repr_len: usize, max_len: usize) -> String {
    let n = (max_len as f64 / repr_len as f64 * items.len() as f64) as usize;
    if n >= items.len() {
        // Even dropping items can't shrink it; treat it as an opaque object.
        return qualname(value);
    }

    let prefix = items[..n].to_vec();
    let slice = match value {
        VarValue::Tuple(_) => VarValue::Tuple(prefix),
        VarValue::Set(_) => VarValue::Set(prefix),
        _ => VarValue::List(prefix),
    };
    let repr = truncated_repr(&slice, max_len);
    if repr.starts_with('<') {
        return repr;
    }
    let chars: Vec<char> = repr.chars().collect();

    let mut idx = chars.len() - 1;
    while idx > 0 && matches!(chars[idx], ']' | ')' | '}') {
        idx -= 1;
    }

    if idx == 0 || (idx == 3 && repr.starts_with("set")) {
        // Empty prefix such as "[]" or "set()"
        let open: String = chars[..chars.len() - 1].iter().collect();
        return format!("{open}...{}", chars[chars.len() - 1]);
    }
    let head: String = chars[..=idx].iter().collect();
    let tail: String = chars[idx + 1..].iter().collect();
    if chars[idx] == ',' {
        return format!("{head}...{tail}");
    }
    format!("{head},...{tail}")
}

fn qualname(value: &VarValue) -> String {
    format!("<{}>", value.type_name())
}

/// Render a namespace one entry per line with an inline type comment:
///
/// ```text
/// {
///     'nums': [3, 1, 9],   # type: list
///     'i': 2,   # type: int
/// }
/// ```
pub fn type_annotated_dict_str<F>(namespace: &Namespace, repr_func: F) -> String
where
    F: Fn(&VarValue) -> String,
{
    if namespace.is_empty() {
        return "{}".to_string();
    }
    let body: String = namespace
        .iter()
        .map(|(name, value)| {
            format!(
                "\n    {}: {},   # type: {}",
                repr_func(&VarValue::str(name.as_str())),
                repr_func(value),
                value.type_name()
            )
        })
        .collect();
    format!("{{{body}\n}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn int_list(n: i64) -> VarValue {
        VarValue::List((0..n).map(VarValue::Int).collect())
    }

    #[test]
    fn test_short_inputs_unchanged() {
        let alphabet = VarValue::Dict(
            "abcdef"
                .chars()
                .enumerate()
                .map(|(i, c)| (VarValue::str(c.to_string()), VarValue::Int(i as i64)))
                .collect(),
        );
        for value in [
            int_list(10),
            alphabet,
            VarValue::Bool(true),
            VarValue::Int(7),
            VarValue::str("a"),
        ] {
            assert_eq!(truncated_repr(&value, 79), value.repr());
        }
    }

    #[test]
    fn test_long_list() {
        assert_eq!(
            truncated_repr(&int_list(1000), 50),
            "[0, 1, 2, 3, 4, 5, 6, 7, 8, 9,...]"
        );
    }

    #[test]
    fn test_long_string() {
        assert_eq!(
            truncated_repr(&VarValue::str("abcdefghijklmnopqrstuvwxyz"), 20),
            "'abcdefghijklmno...'"
        );
    }

    #[test]
    fn test_long_dict() {
        let value = VarValue::Dict(
            "abcdefghijklmnop"
                .chars()
                .enumerate()
                .map(|(i, c)| (VarValue::Int(i as i64), VarValue::str(c.to_string())))
                .collect(),
        );
        assert_eq!(
            truncated_repr(&value, 50),
            "{0: 'a', 1: 'b', 2: 'c', 3: 'd', 4: 'e', 5: 'f',...}"
        );
    }

    #[test]
    fn test_dict_with_huge_value() {
        let value = VarValue::Dict(vec![(VarValue::str("a"), VarValue::str("x".repeat(5000)))]);
        assert_eq!(
            truncated_repr(&value, 79),
            format!("{{'a': '{}...',...}}", "x".repeat(64))
        );
    }

    #[test]
    fn test_budget_is_approximately_respected() {
        let values = [
            int_list(5000),
            VarValue::str("x".repeat(500)),
            VarValue::Tuple((0..300).map(|i| VarValue::str(format!("item{i}"))).collect()),
            VarValue::Set((0..300).map(VarValue::Int).collect()),
            VarValue::List(vec![VarValue::str("y".repeat(400))]),
            VarValue::Dict(vec![(VarValue::str("a"), VarValue::str("x".repeat(5000)))]),
        ];
        for max_len in [10, 30, 79, 200] {
            for value in &values {
                let out = truncated_repr(value, max_len);
                assert!(
                    out.chars().count() <= max_len + 5,
                    "{} chars for budget {max_len}: {out}",
                    out.chars().count()
                );
                assert!(out.contains("...") || out.starts_with('<'), "{out}");
            }
        }
    }

    #[test]
    fn test_opaque_object_falls_back_to_type_name() {
        let value = VarValue::Object {
            type_name: "DataFrame".to_string(),
            repr: "x".repeat(300),
        };
        assert_eq!(truncated_repr(&value, 79), "<DataFrame>");
    }

    #[test]
    fn test_type_annotated_dict_str() {
        let mut ns = Namespace::new();
        ns.insert("a".to_string(), VarValue::Int(1));
        ns.insert("b".to_string(), VarValue::str("two"));
        assert_eq!(
            type_annotated_dict_str(&ns, VarValue::repr),
            "{\n    'a': 1,   # type: int\n    'b': 'two',   # type: str\n}"
        );
        assert_eq!(type_annotated_dict_str(&Namespace::new(), VarValue::repr), "{}");
    }
}
