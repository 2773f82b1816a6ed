// Data structures describing tables, columns and row values

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Advisory only: rendered into `CREATE TABLE`, never used to encode values.
    #[serde(rename = "type")]
    pub declared_type: String,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDescriptor {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            primary_key: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Namespace the table was listed from (schema for Postgres, database for MySQL).
    pub namespace: Option<String>,
    pub name: String,
    /// Catalog order. The Nth value of every dumped row belongs to the Nth column.
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn primary_key_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// A single decoded cell. The tag only decides whether the value is quoted.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Other(String),
    Binary(Vec<u8>),
}

pub type Row = Vec<RowValue>;

/// One offset/limit window. `order_by` holds 1-based column positions; empty
/// means the source's natural order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
    pub order_by: Vec<usize>,
}

/// How a column is selected and decoded for a given declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Integer,
    Float,
    Text,
    Binary,
    Other,
}

impl ValueClass {
    /// Classify a declared type as reported by `information_schema.columns.data_type`.
    pub fn from_declared_type(declared_type: &str) -> Self {
        let t = declared_type.to_lowercase();
        let unsigned = t.contains("unsigned");
        let base = strip_modifiers(&t);
        match base.as_str() {
            // u64 values above i64::MAX would not fit the Integer tag.
            "bigint" if unsigned => ValueClass::Other,
            "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" | "year" => ValueClass::Integer,
            "real" | "double precision" | "double" | "float" | "float4" | "float8" => {
                ValueClass::Float
            }
            "text" | "character varying" | "varchar" | "character" | "char" | "bpchar"
            | "name" | "tinytext" | "mediumtext" | "longtext" | "citext" => ValueClass::Text,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
                ValueClass::Binary
            }
            _ => ValueClass::Other,
        }
    }
}

/// `int(11) unsigned zerofill` -> `int`, `character varying(255)` -> `character varying`.
fn strip_modifiers(declared_type: &str) -> String {
    let mut out = String::with_capacity(declared_type.len());
    let mut depth = 0usize;
    for c in declared_type.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.replace(" unsigned", "")
        .replace(" zerofill", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_declared_types() {
        assert_eq!(ValueClass::from_declared_type("integer"), ValueClass::Integer);
        assert_eq!(ValueClass::from_declared_type("BIGINT"), ValueClass::Integer);
        assert_eq!(ValueClass::from_declared_type("double precision"), ValueClass::Float);
        assert_eq!(ValueClass::from_declared_type("character varying(255)"), ValueClass::Text);
        assert_eq!(ValueClass::from_declared_type("numeric(10,2)"), ValueClass::Other);
        assert_eq!(ValueClass::from_declared_type("timestamp with time zone"), ValueClass::Other);
        assert_eq!(ValueClass::from_declared_type("boolean"), ValueClass::Other);
    }

    #[test]
    fn binary_types_are_classified_as_binary() {
        assert_eq!(ValueClass::from_declared_type("bytea"), ValueClass::Binary);
        assert_eq!(ValueClass::from_declared_type("LONGBLOB"), ValueClass::Binary);
        assert_eq!(ValueClass::from_declared_type("varbinary(16)"), ValueClass::Binary);
        assert_eq!(ValueClass::from_declared_type("binary(4)"), ValueClass::Binary);
    }

    #[test]
    fn unsigned_bigint_stays_textual() {
        assert_eq!(ValueClass::from_declared_type("int(10) unsigned"), ValueClass::Integer);
        assert_eq!(ValueClass::from_declared_type("bigint(20) unsigned"), ValueClass::Other);
    }

    #[test]
    fn primary_key_positions_are_one_based() {
        let mut id = ColumnDescriptor::new("id", "integer");
        id.primary_key = true;
        let table = TableDescriptor {
            namespace: None,
            name: "users".into(),
            columns: vec![ColumnDescriptor::new("name", "text"), id],
        };
        assert_eq!(table.primary_key_positions(), vec![2]);
    }
}
