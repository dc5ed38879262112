use chrono::Utc;
use redb::{ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    store::Store,
};

/// Registry of namespaces created in this store, keyed by schema name with
/// the creation time (unix seconds) as value.
pub const SCHEMAS: TableDefinition<&str, i64> = TableDefinition::new("schemas");

pub const DEFAULT_PRODUCTION_SCHEMA: &str = "vectors";
pub const DEFAULT_TEST_SCHEMA: &str = "test";

const MAX_SCHEMA_LEN: usize = 63;

pub(crate) type RowTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

/// A multi-tenancy namespace. Every table a schema owns is prefixed with
/// its name, so two environments can share one store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    collections: String,
    records: String,
    vectors: String,
}

impl Schema {
    pub fn new(name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name.len() <= MAX_SCHEMA_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(Error::Config(format!(
                "invalid schema name '{name}': use 1-{MAX_SCHEMA_LEN} ASCII \
                 letters, digits or underscores, not starting with a digit"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            collections: format!("{name}.collections"),
            records: format!("{name}.records"),
            vectors: format!("{name}.vectors"),
        })
    }

    /// The schema selected by the environment flag unless overridden.
    pub fn for_mode(
        production: bool,
        override_name: Option<&str>,
    ) -> Result<Self> {
        match override_name {
            Some(name) => Self::new(name),
            None if production => Self::new(DEFAULT_PRODUCTION_SCHEMA),
            None => Self::new(DEFAULT_TEST_SCHEMA),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn collections(&self) -> RowTable<'_> {
        TableDefinition::new(&self.collections)
    }

    pub(crate) fn records(&self) -> RowTable<'_> {
        TableDefinition::new(&self.records)
    }

    pub(crate) fn vectors(&self) -> RowTable<'_> {
        TableDefinition::new(&self.vectors)
    }

    /// Make sure the namespace exists.
    ///
    /// Outside production the namespace and its tables are created when
    /// missing. In production the namespace is expected to be provisioned
    /// already, so this only reports which one is in use.
    pub fn ensure(&self, store: &Store, production: bool) -> Result<()> {
        if production {
            tracing::info!(schema = %self.name, "using production schema");
            return Ok(());
        }

        let schema = self.clone();
        let created = store.acquire()?.write("ensure schema", move |txn| {
            let created = {
                let mut registry = txn.open_table(SCHEMAS)?;
                if registry.get(schema.name())?.is_some() {
                    false
                } else {
                    registry.insert(schema.name(), Utc::now().timestamp())?;
                    true
                }
            };
            txn.open_table(schema.collections())?;
            txn.open_table(schema.records())?;
            txn.open_table(schema.vectors())?;
            Ok(created)
        })?;

        if created {
            tracing::info!(schema = %self.name, "created test schema");
        } else {
            tracing::info!(schema = %self.name, "using test schema");
        }
        Ok(())
    }
}

/// List the namespaces registered in the store.
pub fn list_schemas(store: &Store) -> Result<Vec<String>> {
    store.acquire()?.read("list schemas", |txn| {
        let registry = match txn.open_table(SCHEMAS) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in registry.iter()? {
            let (name, _) = entry?;
            names.push(name.value().to_string());
        }
        Ok(names)
    })
}
