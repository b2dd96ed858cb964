// ============================================================================
// Polymorphism
// ============================================================================
//
// Inheritance compiles into a class tree: one node per mapped entity of a
// hierarchy, each carrying the policy that lays out its sub-entities and the
// table holding its own columns. Loading walks the tree to find the concrete
// type of a row.
//
// ============================================================================

use crate::core::{ConfigResult, ConfigurationError, Value};
use crate::mapping::PolymorphismKind;

pub(crate) const DEFAULT_DISCRIMINATOR: &str = "DTYPE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodePolicy {
    SingleTable { column: String },
    JoinedTables,
    TablePerClass,
}

#[derive(Debug, Clone)]
pub(crate) struct ClassNode {
    pub entity: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Layout of the children, if any.
    pub policy: Option<NodePolicy>,
    /// Value of the parent's discriminator column for this node's rows.
    pub discriminator: Option<String>,
    /// Table of this node's own columns. A table-per-class root has none.
    pub home_table: Option<String>,
    pub instantiable: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ClassTree {
    nodes: Vec<ClassNode>,
}

impl ClassTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: ClassNode) -> usize {
        let index = self.nodes.len();
        if let Some(parent) = node.parent {
            self.nodes[parent].children.push(index);
        }
        self.nodes.push(node);
        index
    }

    pub fn nodes(&self) -> &[ClassNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &ClassNode {
        &self.nodes[index]
    }

    pub fn find(&self, entity: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.entity == entity)
    }

    /// Node indexes from the root down to `index`.
    pub fn path(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether instances of `concrete` are instances of `ancestor`.
    pub fn is_a(&self, concrete: usize, ancestor: usize) -> bool {
        self.path(concrete).contains(&ancestor)
    }

    /// `(table, column, value)` of every discriminator written for instances
    /// of `concrete`.
    pub fn discriminator_for(&self, concrete: usize) -> Vec<(String, String, String)> {
        let mut values = Vec::new();
        for index in self.path(concrete) {
            let node = &self.nodes[index];
            let Some(parent) = node.parent.map(|p| &self.nodes[p]) else {
                continue;
            };
            if let (Some(NodePolicy::SingleTable { column }), Some(table), Some(value)) =
                (&parent.policy, &parent.home_table, &node.discriminator)
            {
                values.push((table.clone(), column.clone(), value.clone()));
            }
        }
        values
    }

    /// Concrete type of a row read through the hierarchy joins. `read` gives
    /// the value of a column of one of the joined tables.
    pub fn resolve(&self, id_column: &str, read: impl Fn(&str, &str) -> Value) -> Option<usize> {
        let mut current = 0;
        loop {
            let node = &self.nodes[current];
            let next = match &node.policy {
                None => return Some(current),
                Some(NodePolicy::SingleTable { column }) => {
                    let table = node.home_table.as_deref()?;
                    let value = read(table, column);
                    node.children.iter().copied().find(|&child| {
                        self.nodes[child]
                            .discriminator
                            .as_deref()
                            .is_some_and(|d| value.as_str() == Some(d))
                    })
                }
                Some(NodePolicy::JoinedTables) => node.children.iter().copied().find(|&child| {
                    self.nodes[child]
                        .home_table
                        .as_deref()
                        .is_some_and(|table| !read(table, id_column).is_null())
                }),
                Some(NodePolicy::TablePerClass) => None,
            };
            match next {
                Some(child) => current = child,
                None if node.instantiable => return Some(current),
                None => return None,
            }
        }
    }
}

/// Checks that a node placed by `parent`'s policy may lay out its own
/// children with `child`.
pub(crate) fn check_composition(
    entity: &str,
    parent: PolymorphismKind,
    child: PolymorphismKind,
) -> ConfigResult<()> {
    use PolymorphismKind::*;
    match (parent, child) {
        (JoinedTables, JoinedTables) | (JoinedTables, SingleTable) | (SingleTable, JoinedTables) => {
            Ok(())
        }
        _ => Err(ConfigurationError::UnsupportedPolymorphismComposition {
            entity: entity.to_string(),
            parent: parent.to_string(),
            child: child.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node(entity: &str, parent: Option<usize>, table: &str) -> ClassNode {
        ClassNode {
            entity: entity.into(),
            parent,
            children: Vec::new(),
            policy: None,
            discriminator: None,
            home_table: Some(table.into()),
            instantiable: true,
        }
    }

    /// Vehicle (single-table) > Car (joined) > Truck
    fn tree() -> ClassTree {
        let mut tree = ClassTree::new();
        let mut vehicle = node("Vehicle", None, "Vehicle");
        vehicle.policy = Some(NodePolicy::SingleTable {
            column: DEFAULT_DISCRIMINATOR.into(),
        });
        vehicle.instantiable = false;
        tree.push(vehicle);
        let mut car = node("Car", Some(0), "Vehicle");
        car.policy = Some(NodePolicy::JoinedTables);
        car.discriminator = Some("CAR".into());
        tree.push(car);
        tree.push(node("Truck", Some(1), "Truck"));
        let mut bike = node("Bike", Some(0), "Vehicle");
        bike.discriminator = Some("Bike".into());
        tree.push(bike);
        tree
    }

    fn row(values: &[(&str, &str, Value)]) -> HashMap<(String, String), Value> {
        values
            .iter()
            .map(|(t, c, v)| ((t.to_string(), c.to_string()), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_nested_single_over_joined() {
        let tree = tree();
        let read = |values: HashMap<(String, String), Value>| {
            move |t: &str, c: &str| {
                values
                    .get(&(t.to_string(), c.to_string()))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
        };
        let truck = row(&[
            ("Vehicle", "DTYPE", Value::from("CAR")),
            ("Truck", "id", Value::Integer(1)),
        ]);
        assert_eq!(tree.resolve("id", read(truck)), Some(2));

        let car = row(&[("Vehicle", "DTYPE", Value::from("CAR"))]);
        assert_eq!(tree.resolve("id", read(car)), Some(1));

        let bike = row(&[("Vehicle", "DTYPE", Value::from("Bike"))]);
        assert_eq!(tree.resolve("id", read(bike)), Some(3));

        let unknown = row(&[("Vehicle", "DTYPE", Value::from("Boat"))]);
        assert_eq!(tree.resolve("id", read(unknown)), None);
    }

    #[test]
    fn test_discriminator_of_nested_type_is_its_single_table_ancestor() {
        let tree = tree();
        assert_eq!(
            tree.discriminator_for(2),
            vec![("Vehicle".into(), "DTYPE".into(), "CAR".into())]
        );
        assert_eq!(tree.path(2), vec![0, 1, 2]);
        assert!(tree.is_a(2, 1));
        assert!(!tree.is_a(3, 1));
    }

    #[test]
    fn test_compositions() {
        use PolymorphismKind::*;
        assert!(check_composition("A", JoinedTables, JoinedTables).is_ok());
        assert!(check_composition("A", JoinedTables, SingleTable).is_ok());
        assert!(check_composition("A", SingleTable, JoinedTables).is_ok());
        for (parent, child) in [
            (SingleTable, SingleTable),
            (SingleTable, TablePerClass),
            (JoinedTables, TablePerClass),
            (TablePerClass, JoinedTables),
            (TablePerClass, SingleTable),
        ] {
            assert!(matches!(
                check_composition("A", parent, child),
                Err(ConfigurationError::UnsupportedPolymorphismComposition { .. })
            ));
        }
    }
}
