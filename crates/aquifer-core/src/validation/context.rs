//! Context structs consulted by validation rules.
//!
//! Per `SPEC_FULL.md` §9 / spec §9 design notes: duck-typed contexts
//! become explicit structs rather than dictionaries passed around
//! untyped. `SchemaContext`/`IndexContext` are populated by the
//! injected `SchemaProvider`/`IndexProvider` ports (spec §6); this
//! crate does not implement those ports itself.

use std::collections::{HashMap, HashSet};

/// One column's declared type and nullability.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub ty:       String,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(ty: impl Into<String>, nullable: bool) -> Self {
        Self { ty: ty.into(), nullable }
    }
}

/// A single table's or collection's column map.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub columns: HashMap<String, ColumnSchema>,
}

impl TableSchema {
    /// Convenience constructor from `(name, type)` pairs; columns
    /// default to nullable.
    pub fn new(columns: Vec<(&str, &str)>) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ColumnSchema::new(ty, true)))
            .collect();
        Self { columns }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }
}

/// Injected port over wherever table/collection schemas actually live
/// (spec §6 `SchemaProvider.get(table) -> {col -> {type, nullable}} |
/// null`). The excluded "metadata cataloging" collaborator implements
/// this; `aquifer-core` only calls through it.
pub trait SchemaProvider: Send + Sync {
    /// The column map for `table`, or `None` if it doesn't exist.
    fn get(&self, table: &str) -> Option<TableSchema>;
}

/// Injected port over wherever index metadata actually lives (spec §6
/// `IndexProvider.get(table) -> {index_name -> {columns[], unique}}`).
pub trait IndexProvider: Send + Sync {
    /// Every index declared on `table`, or empty if none/unknown.
    fn get(&self, table: &str) -> Vec<IndexSchema>;
}

/// Snapshot of the schema as returned by `SchemaProvider.get` (spec
/// §6), keyed by table/collection name.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    tables: HashMap<String, TableSchema>,
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: impl Into<String>, schema: TableSchema) {
        self.tables.insert(name.into(), schema);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Builds a context by querying `provider` for each of `tables`,
    /// skipping any it doesn't recognize. Callers populate
    /// `ValidationContext::schema` this way from a real catalog rather
    /// than assembling one by hand.
    #[must_use]
    pub fn from_provider(provider: &dyn SchemaProvider, tables: &[String]) -> Self {
        let mut ctx = Self::new();
        for table in tables {
            if let Some(schema) = provider.get(table) {
                ctx.add_table(table.clone(), schema);
            }
        }
        ctx
    }
}

/// A single named index over one or more columns, as returned by
/// `IndexProvider.get` (spec §6).
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub columns: Vec<String>,
    pub unique:  bool,
}

/// Snapshot of the available indexes, keyed by table/collection name.
#[derive(Debug, Clone, Default)]
pub struct IndexContext {
    indexes: HashMap<String, Vec<IndexSchema>>,
}

impl IndexContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&mut self, table: impl Into<String>, columns: Vec<&str>, unique: bool) {
        self.indexes
            .entry(table.into())
            .or_default()
            .push(IndexSchema { columns: columns.into_iter().map(String::from).collect(), unique });
    }

    /// Whether any index on `table` covers `column` as its leading
    /// column.
    pub fn covers(&self, table: &str, column: &str) -> bool {
        self.indexes
            .get(table)
            .map(|idxs| idxs.iter().any(|i| i.columns.first().map(String::as_str) == Some(column)))
            .unwrap_or(false)
    }

    /// Builds a context by querying `provider` for each of `tables`.
    #[must_use]
    pub fn from_provider(provider: &dyn IndexProvider, tables: &[String]) -> Self {
        let mut ctx = Self::new();
        for table in tables {
            for index in provider.get(table) {
                let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
                ctx.add_index(table.clone(), columns, index.unique);
            }
        }
        ctx
    }
}

/// The permission set granted to the caller for this request. Spec
/// §4.2's Security rule checks a required permission set against this
/// (replacing the excluded auth/RBAC stack, which the core treats as
/// an injected collaborator per spec §1).
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    granted: HashSet<String>,
}

impl PermissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with every permission in spec §4.2's vocabulary
    /// granted; useful for tests and trusted internal callers.
    pub fn all() -> Self {
        let mut ctx = Self::new();
        for p in ["SELECT", "INSERT", "UPDATE", "DELETE", "AGGREGATE", "LOOKUP", "MERGE", "OUT"] {
            ctx.grant(p);
        }
        ctx
    }

    pub fn grant(&mut self, permission: impl Into<String>) {
        self.granted.insert(permission.into().to_uppercase());
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.granted.contains(&permission.to_uppercase())
    }

    /// The permissions in `required` that are missing from this
    /// context, in the order given.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required.iter().filter(|p| !self.contains(p)).map(|p| p.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSchemaProvider;

    impl SchemaProvider for StubSchemaProvider {
        fn get(&self, table: &str) -> Option<TableSchema> {
            match table {
                "users" => Some(TableSchema::new(vec![("id", "integer"), ("name", "string")])),
                _ => None,
            }
        }
    }

    struct StubIndexProvider;

    impl IndexProvider for StubIndexProvider {
        fn get(&self, table: &str) -> Vec<IndexSchema> {
            match table {
                "users" => vec![IndexSchema { columns: vec!["id".to_string()], unique: true }],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn schema_context_from_provider_skips_unknown_tables() {
        let tables = vec!["users".to_string(), "ghosts".to_string()];
        let ctx = SchemaContext::from_provider(&StubSchemaProvider, &tables);
        assert!(ctx.has_table("users"));
        assert!(!ctx.has_table("ghosts"));
    }

    #[test]
    fn index_context_from_provider_covers_declared_columns() {
        let tables = vec!["users".to_string()];
        let ctx = IndexContext::from_provider(&StubIndexProvider, &tables);
        assert!(ctx.covers("users", "id"));
        assert!(!ctx.covers("users", "name"));
    }
}
