// export/statement.rs
// Renders table descriptors and rows into replayable SQL statements.

use crate::db::descriptor::DatabaseKind;
use crate::db::models::{RowValue, TableDescriptor};

/// Quote an identifier with the dialect's quote character, doubling any
/// embedded quote. Names like `order` or `group` only replay when quoted.
pub fn quote_identifier(kind: DatabaseKind, name: &str) -> String {
    match kind {
        DatabaseKind::Mysql => format!("`{}`", name.replace('`', "``")),
        DatabaseKind::Postgres | DatabaseKind::Sqlite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Binary literal in the dialect's own syntax: `'\x..'` for Postgres bytea,
/// `X'..'` for SQLite and MySQL.
pub fn binary_literal(kind: DatabaseKind, bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    match kind {
        DatabaseKind::Postgres => format!("'\\x{}'", hex),
        DatabaseKind::Mysql | DatabaseKind::Sqlite => format!("X'{}'", hex),
    }
}

/// Escape a value for use inside a single-quoted string literal.
///
/// Quotes are doubled for every dialect. MySQL additionally treats backslash as
/// an escape character in its default SQL mode, so backslashes are doubled too.
pub fn escape_literal(kind: DatabaseKind, value: &str) -> String {
    let needs_backslash = kind == DatabaseKind::Mysql && value.contains('\\');
    if !value.contains('\'') && !needs_backslash {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if kind == DatabaseKind::Mysql => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_value(kind: DatabaseKind, value: &RowValue) -> String {
    match value {
        RowValue::Null => "NULL".to_string(),
        RowValue::Integer(i) => i.to_string(),
        RowValue::Float(f) if f.is_finite() => {
            let s = f.to_string();
            // Keep a float literal a float on replay.
            if s.contains(['.', 'e', 'E']) {
                s
            } else {
                format!("{}.0", s)
            }
        }
        RowValue::Float(f) if f.is_nan() => "'NaN'".to_string(),
        RowValue::Float(f) if f.is_sign_positive() => "'Infinity'".to_string(),
        RowValue::Float(_) => "'-Infinity'".to_string(),
        RowValue::Text(s) | RowValue::Other(s) => format!("'{}'", escape_literal(kind, s)),
        RowValue::Binary(bytes) => binary_literal(kind, bytes),
    }
}

/// `CREATE TABLE <name> (<col> <type>, ...);`
pub fn create_table_statement(kind: DatabaseKind, table: &TableDescriptor) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            let name = quote_identifier(kind, &c.name);
            let declared = c.declared_type.trim();
            if declared.is_empty() {
                name
            } else {
                format!("{} {}", name, declared)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {} ({});",
        quote_identifier(kind, &table.name),
        columns
    )
}

/// `INSERT INTO <name> VALUES (<v1>, ..., <vN>);` for exactly one row.
pub fn insert_statement(kind: DatabaseKind, table: &str, row: &[RowValue]) -> String {
    let values = row
        .iter()
        .map(|v| render_value(kind, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} VALUES ({});",
        quote_identifier(kind, table),
        values
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ColumnDescriptor;

    #[test]
    fn identifiers_are_always_quoted() {
        assert_eq!(quote_identifier(DatabaseKind::Postgres, "order_items"), "\"order_items\"");
        assert_eq!(quote_identifier(DatabaseKind::Sqlite, "order"), "\"order\"");
        assert_eq!(quote_identifier(DatabaseKind::Postgres, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier(DatabaseKind::Mysql, "group"), "`group`");
        assert_eq!(quote_identifier(DatabaseKind::Mysql, "we`ird"), "`we``ird`");
    }

    #[test]
    fn binary_values_use_dialect_literals() {
        let v = RowValue::Binary(vec![0xca, 0xfe, 0x00]);
        assert_eq!(render_value(DatabaseKind::Sqlite, &v), "X'cafe00'");
        assert_eq!(render_value(DatabaseKind::Mysql, &v), "X'cafe00'");
        assert_eq!(render_value(DatabaseKind::Postgres, &v), r"'\xcafe00'");
        assert_eq!(render_value(DatabaseKind::Sqlite, &RowValue::Binary(vec![])), "X''");
    }

    #[test]
    fn single_quote_stays_inside_one_literal() {
        let row = vec![
            RowValue::Integer(1),
            RowValue::Text("O'Brien'); DROP TABLE users; --".into()),
        ];
        let stmt = insert_statement(DatabaseKind::Postgres, "users", &row);
        assert_eq!(
            stmt,
            "INSERT INTO \"users\" VALUES (1, 'O''Brien''); DROP TABLE users; --');"
        );
        // Every quote inside the literal is paired, so the literal closes exactly once.
        let literal = &stmt["INSERT INTO \"users\" VALUES (1, ".len()..stmt.len() - 2];
        assert!(literal.starts_with('\'') && literal.ends_with('\''));
        assert!(!literal[1..literal.len() - 1].replace("''", "").contains('\''));
    }

    #[test]
    fn mysql_escapes_backslashes() {
        assert_eq!(escape_literal(DatabaseKind::Mysql, r"C:\tmp\'x"), r"C:\\tmp\\''x");
        assert_eq!(escape_literal(DatabaseKind::Postgres, r"C:\tmp"), r"C:\tmp");
    }

    #[test]
    fn renders_each_value_tag() {
        let k = DatabaseKind::Sqlite;
        assert_eq!(render_value(k, &RowValue::Null), "NULL");
        assert_eq!(render_value(k, &RowValue::Integer(-42)), "-42");
        assert_eq!(render_value(k, &RowValue::Float(2.5)), "2.5");
        assert_eq!(render_value(k, &RowValue::Float(3.0)), "3.0");
        assert_eq!(render_value(k, &RowValue::Float(f64::NAN)), "'NaN'");
        assert_eq!(render_value(k, &RowValue::Float(f64::NEG_INFINITY)), "'-Infinity'");
        assert_eq!(render_value(k, &RowValue::Other("2024-01-01".into())), "'2024-01-01'");
    }

    #[test]
    fn create_table_keeps_column_order() {
        let table = TableDescriptor {
            namespace: Some("public".into()),
            name: "users".into(),
            columns: vec![
                ColumnDescriptor::new("id", "integer"),
                ColumnDescriptor::new("name", "character varying(50)"),
                ColumnDescriptor::new("blob", ""),
            ],
        };
        assert_eq!(
            create_table_statement(DatabaseKind::Postgres, &table),
            "CREATE TABLE \"users\" (\"id\" integer, \"name\" character varying(50), \"blob\");"
        );
    }
}
