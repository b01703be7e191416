use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::EngineConfig;
use crate::core::{Result, Value, quote_literal, quote_text};
use crate::schema::{RecordTypeSchema, SchemaStore};
use crate::tree::{Action, RecordNode, RecordTree};

use super::audit::{AuditAction, AuditContext};
use super::{Plan, PlanItem, Statement, StatementKind};

/// Walks the annotated tree, self before children, and renders a plan.
pub struct PlanBuilder<'a> {
    schema: &'a SchemaStore,
    config: &'a EngineConfig,
    audit_time: NaiveDateTime,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(schema: &'a SchemaStore, config: &'a EngineConfig, audit_time: NaiveDateTime) -> Self {
        Self {
            schema,
            config,
            audit_time,
        }
    }

    pub fn render(&self, tree: &RecordTree) -> Result<Plan> {
        let mut plan = Plan::new();
        let mut context: Option<AuditContext> = None;

        for id in tree.walk() {
            let node = tree.node(id);
            let schema = self.schema.get(&node.kind)?;
            let columns = self.schema.identity_columns(&node.kind)?;

            if schema.is_progenitor() {
                let key = columns
                    .first()
                    .and_then(|column| node.fields.get(column))
                    .map(|value| value.original().clone())
                    .unwrap_or(Value::Null);
                context = Some(AuditContext::new(&schema.name, key, self.audit_time));
            }
            if !node.is_pending() || node.blocked {
                continue;
            }

            let table = schema.table_name();
            let (audit_action, pairs) = match node.action {
                Some(Action::Update) => {
                    let Some(sql) = self.update_sql(&table, node, &columns) else {
                        continue;
                    };
                    plan.push(PlanItem::Statement(Statement::new(StatementKind::Update, &table, sql)));

                    let body: Vec<(String, Value)> = node
                        .fields
                        .changed()
                        .filter(|(name, _, _)| !self.config.is_stamp_field(name))
                        .map(|(name, _, new)| (name.to_uppercase(), new.clone()))
                        .collect();
                    // stamp-only updates are not audited
                    if body.is_empty() {
                        continue;
                    }
                    let mut pairs = identity_pairs(node, &columns);
                    pairs.extend(body);
                    (AuditAction::Update, pairs)
                }
                Some(Action::Delete) => {
                    let sql = format!("DELETE FROM {}\nWHERE {}", table, where_clause(node, &columns));
                    plan.push(PlanItem::Statement(Statement::new(StatementKind::Delete, &table, sql)));
                    continue;
                }
                Some(Action::Insert) => {
                    plan.push(PlanItem::Statement(Statement::new(
                        StatementKind::Insert,
                        &table,
                        insert_sql(&table, node),
                    )));
                    if let Some(sql) = self.version_sql(schema, node, &columns) {
                        plan.push(PlanItem::Statement(Statement::new(
                            StatementKind::VersionRecord,
                            &self.config.versions_table,
                            sql,
                        )));
                    }

                    let body = node
                        .fields
                        .iter()
                        .filter(|(_, value)| !value.current().is_null())
                        .map(|(name, value)| (name.to_uppercase(), value.current().clone()))
                        .collect();
                    (AuditAction::Insert, body)
                }
                None => continue,
            };

            if pairs.is_empty() {
                continue;
            }
            if let Some(context) = context.as_mut() {
                plan.push(PlanItem::Audit(context.entry(&schema.name, audit_action, pairs)));
            }
        }

        debug!(items = plan.len(), "plan rendered");
        Ok(plan)
    }

    fn update_sql(&self, table: &str, node: &RecordNode, columns: &[String]) -> Option<String> {
        let set: Vec<String> = node
            .fields
            .changed()
            .map(|(name, _, new)| format!("{} = {}", name, quote_literal(new)))
            .collect();
        if set.is_empty() {
            return None;
        }
        Some(format!(
            "UPDATE {}\nSET {}\nWHERE {}",
            table,
            set.join(", "),
            where_clause(node, columns)
        ))
    }

    /// Versions-table row for a freshly inserted progenitor that carries a
    /// version.
    fn version_sql(&self, schema: &RecordTypeSchema, node: &RecordNode, columns: &[String]) -> Option<String> {
        if !schema.is_progenitor() {
            return None;
        }
        let version = node.value(&self.config.version_field)?;
        let name = columns
            .first()
            .and_then(|column| node.value(column))
            .cloned()
            .unwrap_or(Value::Null);
        Some(format!(
            "INSERT INTO {} (table_name, name, version) VALUES ({}, {}, {})",
            self.config.versions_table,
            quote_text(&schema.name),
            quote_text(&name.to_key_string()),
            quote_literal(version)
        ))
    }
}

fn identity_pairs(node: &RecordNode, columns: &[String]) -> Vec<(String, Value)> {
    columns
        .iter()
        .map(|column| (column.to_uppercase(), stored_value(node, column)))
        .collect()
}

fn stored_value(node: &RecordNode, column: &str) -> Value {
    node.fields
        .get(column)
        .map(|value| value.original().clone())
        .unwrap_or(Value::Null)
}

fn where_clause(node: &RecordNode, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("{} = {}", column, quote_literal(&stored_value(node, column))))
        .collect::<Vec<_>>()
        .join("\n\tAND ")
}

fn insert_sql(table: &str, node: &RecordNode) -> String {
    let (names, values): (Vec<&str>, Vec<String>) = node
        .fields
        .iter()
        .map(|(name, value)| (name, quote_literal(value.current())))
        .unzip();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        values.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldType;
    use crate::schema::FieldSpec;
    use crate::tree::{FieldMap, FieldValue};
    use chrono::NaiveDate;

    fn schema() -> SchemaStore {
        SchemaStore::from_kinds([
            RecordTypeSchema::new("Recipe")
                .keys(["NAME", "VERSION"])
                .field("status", FieldSpec::new(FieldType::Text)),
            RecordTypeSchema::new("Step").parent("Recipe").keys(["STEP"]).remap("NAME", "RECIPE_NAME"),
        ])
        .unwrap()
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn scalar(value: impl Into<Value>) -> FieldValue {
        FieldValue::Scalar(value.into())
    }

    #[test]
    fn test_insert_of_versioned_progenitor_registers_version() {
        let mut fields = FieldMap::new();
        fields.insert("name", scalar("S'1"));
        fields.insert("version", scalar(1));
        fields.insert("status", FieldValue::Scalar(Value::Null));
        let mut node = RecordNode::new("Recipe", "S'1:1", fields);
        node.action = Some(Action::Insert);
        node.apply = true;
        let mut tree = RecordTree::new();
        tree.add(None, node, false);

        let (schema, config) = (schema(), EngineConfig::default());
        let plan = PlanBuilder::new(&schema, &config, at()).render(&tree).unwrap();
        let sql: Vec<_> = plan.statements().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "INSERT INTO recipe (name, version, status) VALUES ('S''1', 1, NULL)",
                "INSERT INTO versions (table_name, name, version) VALUES ('Recipe', 'S''1', 1)",
            ]
        );

        let audit: Vec<_> = plan.audit_entries().collect();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Insert);
        assert_eq!(audit[0].pairs.len(), 2);
    }

    #[test]
    fn test_update_where_uses_remapped_identity() {
        let mut tree = RecordTree::new();
        let mut recipe = FieldMap::new();
        recipe.insert("name", scalar("S1"));
        recipe.insert("version", scalar(2));
        let root = tree.add(None, RecordNode::new("Recipe", "S1:2", recipe), false);

        let mut step = FieldMap::new();
        step.insert("recipe_name", scalar("S1"));
        step.insert("version", scalar(2));
        step.insert("step", scalar(10));
        step.insert(
            "label",
            FieldValue::Diff {
                old: Value::from("a"),
                new: Value::from("b"),
            },
        );
        let mut node = RecordNode::new("Step", "10", step);
        node.action = Some(Action::Update);
        node.apply = true;
        tree.add(Some(root), node, false);

        let (schema, config) = (schema(), EngineConfig::default());
        let plan = PlanBuilder::new(&schema, &config, at()).render(&tree).unwrap();
        let sql: Vec<_> = plan.statements().map(|s| s.sql.clone()).collect();
        assert_eq!(
            sql,
            vec!["UPDATE step\nSET label = 'b'\nWHERE recipe_name = 'S1'\n\tAND version = 2\n\tAND step = 10"]
        );

        let audit: Vec<_> = plan.audit_entries().collect();
        assert_eq!(audit[0].counter, 1);
        assert_eq!(audit[0].parent_key, Value::from("S1"));
        assert_eq!(audit[0].table_name, "Step");
        assert_eq!(audit[0].pairs.last(), Some(&("LABEL".to_string(), Value::from("b"))));
    }

    #[test]
    fn test_unapplied_and_unchanged_nodes_render_nothing() {
        let mut tree = RecordTree::new();
        let mut fields = FieldMap::new();
        fields.insert("name", scalar("S1"));
        let mut node = RecordNode::new("Recipe", "S1:1", fields);
        node.action = Some(Action::Update);
        node.apply = true;
        let id = tree.add(None, node, false);

        let (schema, config) = (schema(), EngineConfig::default());
        let builder = PlanBuilder::new(&schema, &config, at());
        assert!(builder.render(&tree).unwrap().is_empty());

        tree.node_mut(id).fields.insert(
            "status",
            FieldValue::Diff {
                old: Value::Null,
                new: Value::from("X"),
            },
        );
        tree.set_apply(id, false);
        assert!(builder.render(&tree).unwrap().is_empty());
    }
}
