//! Default-value translation.
//!
//! Column defaults arrive as raw expressions in the source dialect. They are
//! rewritten in three steps: function substitution, removal of known cast
//! suffixes, then removal of any remaining `::identifier` cast. The steps
//! repeat until nothing changes, so re-running the translation on its own
//! output returns it unchanged.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::MigrationSettings;

/// Casts to multi-word or parameterized types, optionally with array brackets.
static KNOWN_CAST: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)::\s*(?:character\s+varying|national\s+character\s+varying|character\b|bit\s+varying|double\s+precision|timestamp\s+with(?:out)?\s+time\s+zone|time\s+with(?:out)?\s+time\s+zone|[a-z_][a-z0-9_]*\s*\(\s*\d+(?:\s*,\s*\d+)?\s*\)|[a-z_][a-z0-9_]*\s*(?:\[\s*\])+)(?:\s*\(\s*\d+(?:\s*,\s*\d+)?\s*\))?(?:\s*\[\s*\])*",
    )
});

/// Any remaining `::identifier` (optionally schema-qualified) cast.
static ANY_CAST: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"::\s*"?[A-Za-z_][A-Za-z0-9_]*"?(?:\.[A-Za-z_][A-Za-z0-9_]*)?(?:\[\])*"#)
});

const POSTGRES_FUNCTIONS: &[(&str, &str)] = &[
    ("gen_random_uuid()", "RANDOM_UUID()"),
    ("uuid_generate_v4()", "RANDOM_UUID()"),
    ("now()", "CURRENT_TIMESTAMP"),
    ("transaction_timestamp()", "CURRENT_TIMESTAMP"),
    ("clock_timestamp()", "CURRENT_TIMESTAMP"),
];

const MYSQL_FUNCTIONS: &[(&str, &str)] = &[
    ("UUID()", "RANDOM_UUID()"),
    ("NOW()", "CURRENT_TIMESTAMP"),
    ("CURRENT_TIMESTAMP()", "CURRENT_TIMESTAMP"),
    ("CURDATE()", "CURRENT_DATE"),
];

const SQLSERVER_FUNCTIONS: &[(&str, &str)] = &[
    ("getdate()", "CURRENT_TIMESTAMP"),
    ("getutcdate()", "CURRENT_TIMESTAMP"),
    ("sysdatetime()", "CURRENT_TIMESTAMP"),
    ("newid()", "RANDOM_UUID()"),
    ("newsequentialid()", "RANDOM_UUID()"),
];

const ORACLE_FUNCTIONS: &[(&str, &str)] = &[
    ("SYSDATE", "CURRENT_TIMESTAMP"),
    ("SYSTIMESTAMP", "CURRENT_TIMESTAMP"),
    ("SYS_GUID()", "RANDOM_UUID()"),
];

/// Built-in function substitutions for a source dialect.
#[must_use]
pub fn builtin_functions(dialect: &str) -> &'static [(&'static str, &'static str)] {
    match dialect.to_lowercase().as_str() {
        "postgresql" | "postgres" => POSTGRES_FUNCTIONS,
        "mysql" | "mariadb" => MYSQL_FUNCTIONS,
        "sqlserver" | "mssql" => SQLSERVER_FUNCTIONS,
        "oracle" => ORACLE_FUNCTIONS,
        _ => &[],
    }
}

/// Rewrites source default expressions for the target.
#[derive(Debug, Clone)]
pub struct DefaultTranslator {
    dialect: String,
    functions: Vec<(String, String)>,
}

impl DefaultTranslator {
    /// Creates a translator for `dialect`, merging user overrides over the built-ins.
    #[must_use]
    pub fn new(dialect: &str, overrides: &HashMap<String, String>) -> Self {
        let mut functions: Vec<(String, String)> = overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // Longest key first so `uuid_generate_v4()` is never shadowed by a prefix.
        functions.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        for (from, to) in builtin_functions(dialect) {
            if !functions.iter().any(|(k, _)| k.eq_ignore_ascii_case(from)) {
                functions.push(((*from).to_string(), (*to).to_string()));
            }
        }

        Self {
            dialect: dialect.to_lowercase(),
            functions,
        }
    }

    /// Translates a raw default. `None` stays `None`.
    ///
    /// Passes repeat until the expression stops changing, since removing a
    /// cast can expose a function call.
    #[must_use]
    pub fn translate(&self, raw: Option<&str>) -> Option<String> {
        let mut expr = raw?.trim().to_string();
        for _ in 0..MAX_PASSES {
            let next = self.pass(&expr);
            if next == expr {
                break;
            }
            expr = next;
        }
        Some(expr)
    }

    fn pass(&self, expr: &str) -> String {
        let mut expr = expr.to_string();

        if matches!(self.dialect.as_str(), "sqlserver" | "mssql") {
            expr = unwrap_parens(&expr).to_string();
        }

        for (from, to) in &self.functions {
            expr = replace_function(&expr, from, to);
        }

        expr = map_unquoted(&expr, |segment| strip(&KNOWN_CAST, segment));
        expr = map_unquoted(&expr, |segment| strip(&ANY_CAST, segment));

        expr.trim().to_string()
    }
}

const MAX_PASSES: usize = 4;

/// Translates one default using the function overrides in `settings`.
#[must_use]
pub fn translate_default(
    raw: Option<&str>,
    dialect: &str,
    settings: &MigrationSettings,
) -> Option<String> {
    DefaultTranslator::new(dialect, &settings.function_mappings).translate(raw)
}

fn strip(pattern: &LazyLock<Result<Regex, regex::Error>>, segment: &str) -> String {
    match &**pattern {
        Ok(re) => re.replace_all(segment, "").into_owned(),
        Err(_) => segment.to_string(),
    }
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive replacement of `from` outside string literals.
///
/// A match glued to a longer identifier is left alone, which is what keeps
/// `RANDOM_UUID()` from being rewritten again by a `UUID()` rule.
fn replace_function(expr: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return expr.to_string();
    }
    let haystack = expr.to_ascii_lowercase();
    let needle = from.to_ascii_lowercase();
    let bytes = expr.as_bytes();
    let needle_len = needle.len();
    let tail_is_ident = needle.as_bytes().last().copied().is_some_and(is_ident);

    let mut out = String::with_capacity(expr.len());
    let mut in_quote = false;
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_quote = !in_quote;
            i += 1;
            continue;
        }
        if !in_quote && haystack.as_bytes()[i..].starts_with(needle.as_bytes()) {
            let glued_before = i > 0 && is_ident(bytes[i - 1]);
            let end = i + needle_len;
            let glued_after = tail_is_ident && end < bytes.len() && is_ident(bytes[end]);
            if !glued_before && !glued_after {
                out.push_str(&expr[copied..i]);
                out.push_str(to);
                i = end;
                copied = end;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&expr[copied..]);
    out
}

/// Applies `f` to the parts of `expr` outside single-quoted literals.
fn map_unquoted(expr: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;
    loop {
        match rest.find('\'') {
            None => {
                out.push_str(&f(rest));
                return out;
            }
            Some(open) => {
                out.push_str(&f(&rest[..open]));
                let after = &rest[open + 1..];
                match after.find('\'') {
                    Some(close) => {
                        out.push_str(&rest[open..open + close + 2]);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push_str(&rest[open..]);
                        return out;
                    }
                }
            }
        }
    }
}

/// Removes parentheses that wrap the whole expression, as SQL Server reports `((0))`.
fn unwrap_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && expr.ends_with(')') && closes_at_end(expr) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

fn closes_at_end(expr: &str) -> bool {
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, ch) in expr.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return i == expr.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> DefaultTranslator {
        DefaultTranslator::new("postgresql", &HashMap::new())
    }

    #[test]
    fn test_documented_examples() {
        let t = pg();
        assert_eq!(t.translate(Some("gen_random_uuid()")).as_deref(), Some("RANDOM_UUID()"));
        assert_eq!(t.translate(Some("'{}'::jsonb")).as_deref(), Some("'{}'"));
        assert_eq!(
            t.translate(Some("'member'::character varying")).as_deref(),
            Some("'member'")
        );
        assert_eq!(t.translate(None), None);
        assert_eq!(
            t.translate(Some("CURRENT_TIMESTAMP")).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_casts() {
        let t = pg();
        assert_eq!(t.translate(Some("now()::timestamp without time zone")).as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(t.translate(Some("'{}'::text[]")).as_deref(), Some("'{}'"));
        assert_eq!(t.translate(Some("'a'::character varying(20)")).as_deref(), Some("'a'"));
        assert_eq!(t.translate(Some("'0'::numeric(10,2)")).as_deref(), Some("'0'"));
        assert_eq!(t.translate(Some("'open'::public.status")).as_deref(), Some("'open'"));
        assert_eq!(t.translate(Some("0")).as_deref(), Some("0"));
    }

    #[test]
    fn test_cast_hiding_a_function() {
        let t = pg();
        assert_eq!(t.translate(Some("now::text()")).as_deref(), Some("CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_literals_are_untouched() {
        let t = pg();
        assert_eq!(t.translate(Some("'now()'")).as_deref(), Some("'now()'"));
        assert_eq!(t.translate(Some("'a::b'::text")).as_deref(), Some("'a::b'"));
    }

    #[test]
    fn test_empty_string_default_preserved() {
        let t = pg();
        assert_eq!(t.translate(Some("''::character varying")).as_deref(), Some("''"));
        assert_eq!(t.translate(Some("")).as_deref(), Some(""));
    }

    #[test]
    fn test_other_dialects() {
        let none = HashMap::new();
        let mssql = DefaultTranslator::new("sqlserver", &none);
        assert_eq!(mssql.translate(Some("(getdate())")).as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(mssql.translate(Some("((0))")).as_deref(), Some("0"));
        assert_eq!(mssql.translate(Some("(newid())")).as_deref(), Some("RANDOM_UUID()"));

        let mysql = DefaultTranslator::new("mysql", &none);
        assert_eq!(mysql.translate(Some("uuid()")).as_deref(), Some("RANDOM_UUID()"));

        let oracle = DefaultTranslator::new("oracle", &none);
        assert_eq!(oracle.translate(Some("SYSDATE")).as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(oracle.translate(Some("SYSDATE_X")).as_deref(), Some("SYSDATE_X"));
    }

    #[test]
    fn test_user_override_takes_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("now()".to_string(), "LOCALTIMESTAMP".to_string());
        let t = DefaultTranslator::new("postgresql", &overrides);
        assert_eq!(t.translate(Some("now()")).as_deref(), Some("LOCALTIMESTAMP"));
        assert_eq!(t.translate(Some("gen_random_uuid()")).as_deref(), Some("RANDOM_UUID()"));
    }

    #[test]
    fn test_prefixed_identifier_not_rewritten() {
        let t = pg();
        assert_eq!(t.translate(Some("my_now()")).as_deref(), Some("my_now()"));
    }

    #[test]
    fn test_translation_is_idempotent() {
        let inputs = [
            "gen_random_uuid()",
            "uuid_generate_v4()",
            "now()",
            "'{}'::jsonb",
            "'member'::character varying",
            "'x'::text[]",
            "nextval('users_id_seq'::regclass)",
            "CURRENT_TIMESTAMP",
            "(now() + '1 day'::interval)",
            "''::character varying",
            "now::text()",
            "(getdate())::varchar",
            "42",
            "",
        ];
        for dialect in ["postgresql", "mysql", "sqlserver", "oracle", "h2"] {
            let t = DefaultTranslator::new(dialect, &HashMap::new());
            for input in inputs {
                let once = t.translate(Some(input));
                let twice = t.translate(once.as_deref());
                assert_eq!(once, twice, "{dialect}: {input}");
            }
        }
    }

    #[test]
    fn test_translate_default_uses_settings() {
        let mut settings = MigrationSettings::default();
        settings
            .function_mappings
            .insert("my_clock()".into(), "CURRENT_TIME".into());
        assert_eq!(
            translate_default(Some("my_clock()"), "postgresql", &settings).as_deref(),
            Some("CURRENT_TIME")
        );
    }
}
