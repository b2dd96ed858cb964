use crate::statement::{ColumnRef, Join, JoinKind, Select};
use std::fmt;

/// Table of an entity join tree.
///
/// Hierarchy nodes (`relation` is `None`) are the tables read together to
/// materialize one entity. Relation nodes describe how related entities are
/// reached; those are loaded by separate batched queries.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub table: String,
    pub alias: String,
    pub kind: JoinKind,
    pub entity: String,
    pub relation: Option<String>,
    pub columns: Vec<String>,
    pub children: Vec<JoinNode>,
}

impl JoinNode {
    pub(crate) fn table(table: &str, alias: String, kind: JoinKind, entity: &str) -> Self {
        Self {
            table: table.to_string(),
            alias,
            kind,
            entity: entity.to_string(),
            relation: None,
            columns: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn relation(table: &str, alias: String, entity: &str, property: &str) -> Self {
        Self {
            relation: Some(property.to_string()),
            ..Self::table(table, alias, JoinKind::LeftOuter, entity)
        }
    }

    fn hierarchy_children(&self) -> impl Iterator<Item = &JoinNode> {
        self.children.iter().filter(|c| c.relation.is_none())
    }

    fn find_alias(&self, table: &str) -> Option<&str> {
        if self.relation.is_none() && self.table == table {
            return Some(&self.alias);
        }
        self.hierarchy_children().find_map(|c| c.find_alias(table))
    }

    fn write_to(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let join = match (depth, self.kind) {
            (0, _) => "",
            (_, JoinKind::Inner) => "INNER JOIN ",
            (_, JoinKind::LeftOuter) => "LEFT OUTER JOIN ",
        };
        write!(f, "{:indent$}{}{} {}", "", join, self.table, self.alias, indent = depth * 2)?;
        match &self.relation {
            Some(property) => writeln!(f, " [{}] ({})", property, self.entity)?,
            None => writeln!(f, " ({})", self.entity)?,
        }
        for child in &self.children {
            child.write_to(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Tables an entity persister reads, one branch per query. Table-per-class
/// hierarchies have one branch per concrete table, others a single branch.
///
/// Only hierarchy nodes end up in the select built from a branch. Relation
/// nodes are descriptive: the loader reads each relation through its own
/// batched `IN` queries, never through a joined select.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTree {
    branches: Vec<JoinNode>,
    id_column: String,
    per_branch_type: bool,
}

impl JoinTree {
    pub(crate) fn new(branches: Vec<JoinNode>, id_column: &str, per_branch_type: bool) -> Self {
        Self {
            branches,
            id_column: id_column.to_string(),
            per_branch_type,
        }
    }

    pub fn branches(&self) -> &[JoinNode] {
        &self.branches
    }

    /// Tables of every branch, relation nodes excluded.
    pub fn tables(&self) -> Vec<&str> {
        fn collect<'a>(node: &'a JoinNode, out: &mut Vec<&'a str>) {
            out.push(&node.table);
            for child in node.hierarchy_children() {
                collect(child, out);
            }
        }
        let mut tables = Vec::new();
        for branch in &self.branches {
            collect(branch, &mut tables);
        }
        tables
    }

    /// Entity every row of `branch` belongs to, when the branch alone
    /// determines it.
    pub(crate) fn branch_type(&self, branch: usize) -> Option<&str> {
        self.per_branch_type
            .then(|| self.branches[branch].entity.as_str())
    }

    pub(crate) fn alias_of(&self, branch: usize, table: &str) -> Option<&str> {
        self.branches[branch].find_alias(table)
    }

    /// Select of every column of the hierarchy tables of `branch`.
    pub(crate) fn to_select(&self, branch: usize) -> Select {
        let root = &self.branches[branch];
        let mut select = Select::from(&root.table, &root.alias)
            .columns(&root.alias, root.columns.iter().map(String::as_str));
        let mut pending: Vec<&JoinNode> = vec![root];
        while let Some(parent) = pending.pop() {
            for child in parent.hierarchy_children() {
                select = select
                    .join(Join {
                        kind: child.kind,
                        table: child.table.clone(),
                        alias: child.alias.clone(),
                        on: vec![(
                            ColumnRef::new(&parent.alias, &self.id_column),
                            ColumnRef::new(&child.alias, &self.id_column),
                        )],
                    })
                    .columns(&child.alias, child.columns.iter().map(String::as_str));
                pending.push(child);
            }
        }
        select
    }
}

impl fmt::Display for JoinTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for branch in &self.branches {
            branch.write_to(f, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> JoinTree {
        let mut root = JoinNode::table("Vehicle", "t0".into(), JoinKind::Inner, "Vehicle");
        root.columns = vec!["id".into(), "brand".into()];
        let mut car = JoinNode::table("Car", "t1".into(), JoinKind::LeftOuter, "Car");
        car.columns = vec!["id".into(), "doors".into()];
        root.children.push(car);
        root.children
            .push(JoinNode::relation("Person", "r0".into(), "Person", "owner"));
        JoinTree::new(vec![root], "id", false)
    }

    #[test]
    fn test_select_joins_hierarchy_only() {
        let select = tree().to_select(0);
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].kind, JoinKind::LeftOuter);
        assert_eq!(select.columns.len(), 4);
        assert_eq!(select.columns[3], ColumnRef::new("t1", "doors"));
    }

    #[test]
    fn test_tables_and_aliases() {
        let tree = tree();
        assert_eq!(tree.tables(), vec!["Vehicle", "Car"]);
        assert_eq!(tree.alias_of(0, "Car"), Some("t1"));
        assert_eq!(tree.alias_of(0, "Person"), None);
        assert_eq!(tree.branch_type(0), None);
        let rendered = tree.to_string();
        assert!(rendered.contains("LEFT OUTER JOIN Car t1 (Car)"));
        assert!(rendered.contains("LEFT OUTER JOIN Person r0 [owner] (Person)"));
    }
}
