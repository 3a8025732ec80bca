use serde::{Deserialize, Serialize};

/// Broad type families the validator reasons about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    DateTime,
    Boolean,
    Other(String),
}

impl ColumnType {
    /// Map an engine type name such as `low_cardinality(string)` or
    /// `datetime64(3, 'UTC')` onto a type family.
    pub fn from_engine_type(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        let inner = Self::unwrap_modifiers(&lowered);

        if inner == "string" || inner.starts_with("fixed_string") || inner.starts_with("fixedstring") {
            ColumnType::String
        } else if inner.starts_with("datetime") || inner.starts_with("date") {
            ColumnType::DateTime
        } else if inner.starts_with("int") || inner.starts_with("uint") {
            ColumnType::Integer
        } else if inner.starts_with("float") || inner.starts_with("decimal") {
            ColumnType::Float
        } else if inner == "bool" || inner == "boolean" {
            ColumnType::Boolean
        } else {
            ColumnType::Other(raw.trim().to_string())
        }
    }

    fn unwrap_modifiers(lowered: &str) -> &str {
        let mut current = lowered;
        for wrapper in ["low_cardinality(", "lowcardinality(", "nullable("] {
            if let Some(rest) = current.strip_prefix(wrapper) {
                current = rest.strip_suffix(')').unwrap_or(rest);
                return Self::unwrap_modifiers(current);
            }
        }
        current
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Engine type as reported by the source
    pub data_type: String,
    pub column_type: ColumnType,
    pub is_tag: bool,
    pub description: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        let data_type = data_type.into();
        Self {
            is_tag: is_tag_column(&name),
            column_type: ColumnType::from_engine_type(&data_type),
            name,
            data_type,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = if description.is_empty() { None } else { Some(description) };
        self
    }
}

/// Tag slot columns are named `tagK<n>` (key) and `tagV<n>` (value)
pub fn is_tag_column(name: &str) -> bool {
    let rest = name
        .strip_prefix("tagK")
        .or_else(|| name.strip_prefix("tagV"));
    matches!(rest, Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOrigin {
    Static,
    Live,
}

/// Authoritative layout of the single queryable table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub origin: SchemaOrigin,
    pub retrieved_at: chrono::DateTime<chrono::Utc>,
}

impl Schema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDef>, origin: SchemaOrigin) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            origin,
            retrieved_at: chrono::Utc::now(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn tag_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_tag)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(ColumnType::from_engine_type("string"), ColumnType::String);
        assert_eq!(ColumnType::from_engine_type("low_cardinality(string)"), ColumnType::String);
        assert_eq!(ColumnType::from_engine_type("nullable(int64)"), ColumnType::Integer);
        assert_eq!(ColumnType::from_engine_type("uint64"), ColumnType::Integer);
        assert_eq!(ColumnType::from_engine_type("float64"), ColumnType::Float);
        assert_eq!(ColumnType::from_engine_type("datetime64(3, 'UTC')"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_engine_type("bool"), ColumnType::Boolean);
        assert_eq!(
            ColumnType::from_engine_type("array(string)"),
            ColumnType::Other("array(string)".to_string())
        );
    }

    #[test]
    fn test_tag_column_detection() {
        assert!(is_tag_column("tagK1"));
        assert!(is_tag_column("tagV12"));
        assert!(!is_tag_column("tagK"));
        assert!(!is_tag_column("tagX1"));
        assert!(!is_tag_column("metric"));
    }

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new(
            "t_metrics",
            vec![ColumnDef::new("metric", "string"), ColumnDef::new("tagK1", "low_cardinality(string)")],
            SchemaOrigin::Static,
        );
        assert!(schema.has_column("metric"));
        assert!(!schema.has_column("Metric"));
        assert_eq!(schema.tag_columns().count(), 1);
    }
}
