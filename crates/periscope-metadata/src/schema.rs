//! Conversions from the computed fleet schema into query-facing shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use periscope_state::{AgentId, ComputedSchema, DataType, SemanticType, TableSchema};

use crate::error::{MetadataError, MetadataResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub column_type: DataType,
    pub column_desc: String,
    pub column_semantic_type: SemanticType,
}

/// Ordered columns of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

impl From<&TableSchema> for Relation {
    fn from(table: &TableSchema) -> Self {
        Self {
            columns: table
                .columns
                .iter()
                .map(|c| ColumnInfo {
                    column_name: c.name.clone(),
                    column_type: c.data_type,
                    column_desc: c.desc.clone(),
                    column_semantic_type: c.semantic_type,
                })
                .collect(),
            desc: table.desc.clone(),
        }
    }
}

/// Table name to relation, without agent attribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub relation_map: BTreeMap<String, Relation>,
}

/// A table's relation together with the agents that expose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub relation: Relation,
    pub agent_list: Vec<AgentId>,
}

/// Flatten a computed schema into a name to relation map.
pub fn relation_map(schema: &ComputedSchema) -> Schema {
    Schema {
        relation_map: schema
            .tables
            .iter()
            .map(|t| (t.name.clone(), Relation::from(t)))
            .collect(),
    }
}

/// Pair every table with its owning agents, in table order.
///
/// Fails as a whole if any table has no agent attribution.
pub fn schema_info(schema: &ComputedSchema) -> MetadataResult<Vec<SchemaInfo>> {
    schema
        .tables
        .iter()
        .map(|table| {
            let agents = schema
                .agents_for(&table.name)
                .ok_or_else(|| MetadataError::MissingAgentMapping {
                    table: table.name.clone(),
                })?;
            Ok(SchemaInfo {
                name: table.name.clone(),
                relation: Relation::from(table),
                agent_list: agents.to_vec(),
            })
        })
        .collect()
}
