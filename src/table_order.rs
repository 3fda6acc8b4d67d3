//! Declared table graph for the construction domain and the orders derived
//! from it.
//!
//! Every table lists its scoping column and, where it has one, the scoped
//! table it hangs off. Cross-table lookups that are not part of the scope
//! hierarchy are declared separately. The deletion order is a topological
//! sort of that graph computed once per process; import walks it backwards.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::catalog;
use crate::{AppError, AppResult};

/// Root of the tenant hierarchy.
pub const SCOPE_ROOT: &str = "proyectos";
pub const SCOPE_COLUMN: &str = "id_proyecto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub scoping_column: Option<&'static str>,
    pub parent_table: Option<&'static str>,
}

const fn scoped(name: &'static str, parent_table: Option<&'static str>) -> TableSpec {
    TableSpec {
        name,
        scoping_column: Some(SCOPE_COLUMN),
        parent_table,
    }
}

const fn global(name: &'static str) -> TableSpec {
    TableSpec {
        name,
        scoping_column: None,
        parent_table: None,
    }
}

const DECLARED_TABLES: &[TableSpec] = &[
    scoped(SCOPE_ROOT, None),
    global("empleados"),
    global("proveedores"),
    scoped("nominas", None),
    scoped("pagos_nomina", Some("nominas")),
    scoped("herramientas", None),
    scoped("movimientos_herramienta", Some("herramientas")),
    scoped("suministros", None),
    scoped("presupuestos", None),
    scoped("partidas_presupuesto", Some("presupuestos")),
];

/// (referencing table, referenced table) pairs outside the scope hierarchy.
const LOOKUP_REFERENCES: &[(&str, &str)] = &[
    ("pagos_nomina", "empleados"),
    ("movimientos_herramienta", "empleados"),
    ("suministros", "proveedores"),
    ("partidas_presupuesto", "proveedores"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Tables carrying the project key, the project row included.
    Project,
    /// Every declared table.
    Full,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("table {0} is declared more than once")]
    Duplicate(String),
    #[error("table {table} references undeclared table {target}")]
    UnknownReference { table: String, target: String },
    #[error("declared table graph has a cycle through {0}")]
    Cycle(String),
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let code = match err {
            OrderError::Duplicate(_) => "ORDER/DUPLICATE",
            OrderError::UnknownReference { .. } => "ORDER/UNKNOWN_REFERENCE",
            OrderError::Cycle(_) => "ORDER/CYCLE",
        };
        AppError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DependencyOrder {
    /// Children before the tables they reference.
    deletion: Vec<TableSpec>,
}

impl DependencyOrder {
    pub fn build(specs: &[TableSpec], references: &[(&str, &str)]) -> Result<Self, OrderError> {
        let mut graph: DiGraph<TableSpec, ()> = DiGraph::with_capacity(specs.len(), specs.len() * 2);
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::with_capacity(specs.len());
        for spec in specs {
            if nodes.insert(spec.name, graph.add_node(*spec)).is_some() {
                return Err(OrderError::Duplicate(spec.name.to_string()));
            }
        }

        let lookup = |table: &str, target: &str| {
            nodes
                .get(target)
                .copied()
                .ok_or_else(|| OrderError::UnknownReference {
                    table: table.to_string(),
                    target: target.to_string(),
                })
        };

        for spec in specs {
            let child = nodes[spec.name];
            if let Some(parent) = spec.parent_table {
                graph.update_edge(child, lookup(spec.name, parent)?, ());
            }
            if spec.scoping_column.is_some() && spec.name != SCOPE_ROOT {
                if let Some(root) = nodes.get(SCOPE_ROOT) {
                    graph.update_edge(child, *root, ());
                }
            }
        }
        for (table, target) in references {
            let child = lookup(table, table)?;
            graph.update_edge(child, lookup(table, target)?, ());
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| OrderError::Cycle(graph[cycle.node_id()].name.to_string()))?;
        let deletion: Vec<TableSpec> = sorted.into_iter().map(|idx| graph[idx]).collect();
        debug!(
            target: "faena",
            event = "table_order_built",
            order = ?deletion.iter().map(|s| s.name).collect::<Vec<_>>()
        );
        Ok(Self { deletion })
    }

    /// Deletion order for a scope: referencing tables first.
    pub fn tables_for_scope(&self, kind: ScopeKind) -> Vec<TableSpec> {
        self.deletion
            .iter()
            .filter(|spec| kind == ScopeKind::Full || spec.scoping_column.is_some())
            .copied()
            .collect()
    }

    /// Referenced tables first; safe insert order.
    pub fn reconstruction_order(&self, kind: ScopeKind) -> Vec<TableSpec> {
        let mut order = self.tables_for_scope(kind);
        order.reverse();
        order
    }

    pub fn spec(&self, name: &str) -> Option<&TableSpec> {
        self.deletion.iter().find(|spec| spec.name == name)
    }

    /// Sort key that places declared tables parents-first and everything else
    /// after them by name.
    pub fn table_order_key<'a>(&self, name: &'a str) -> (usize, &'a str) {
        let rank = self
            .deletion
            .iter()
            .position(|spec| spec.name == name)
            .map(|pos| self.deletion.len() - 1 - pos)
            .unwrap_or(usize::MAX);
        (rank, name)
    }

    /// Deletion-order rank for arbitrary tables; undeclared ones go last.
    pub fn deletion_key<'a>(&self, name: &'a str) -> (usize, &'a str) {
        let rank = self
            .deletion
            .iter()
            .position(|spec| spec.name == name)
            .unwrap_or(usize::MAX);
        (rank, name)
    }

    /// Confirms each scoping column exists in its live table. Declared tables
    /// absent from the database are skipped with a warning.
    pub async fn verify_against_schema(&self, conn: &mut SqliteConnection) -> AppResult<()> {
        for spec in &self.deletion {
            let Some(column) = spec.scoping_column else {
                continue;
            };
            let columns = match catalog::columns(conn, spec.name).await {
                Ok(columns) => columns,
                Err(err) if err.code() == "NOT_FOUND/TABLE" => {
                    warn!(
                        target: "faena",
                        event = "declared_table_missing",
                        table = spec.name
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !columns.iter().any(|c| c.name == column) {
                return Err(AppError::validation(
                    "SCOPE_COLUMN",
                    format!("Table {} has no scoping column {column}", spec.name),
                )
                .with_context("table", spec.name));
            }
        }
        Ok(())
    }
}

static DECLARED_ORDER: OnceCell<DependencyOrder> = OnceCell::new();

/// The process-wide order over the declared tables, built on first use.
pub fn declared() -> AppResult<&'static DependencyOrder> {
    DECLARED_ORDER
        .get_or_try_init(|| DependencyOrder::build(DECLARED_TABLES, LOOKUP_REFERENCES))
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(specs: &[TableSpec]) -> Vec<&'static str> {
        specs.iter().map(|s| s.name).collect()
    }

    fn before(order: &[&str], first: &str, second: &str) -> bool {
        let pos = |name| order.iter().position(|n| *n == name).expect("present");
        pos(first) < pos(second)
    }

    #[test]
    fn children_are_deleted_before_their_parents() {
        let order = declared().expect("order");
        let deletion = names(&order.tables_for_scope(ScopeKind::Full));
        assert_eq!(deletion.len(), DECLARED_TABLES.len());

        assert!(before(&deletion, "pagos_nomina", "nominas"));
        assert!(before(&deletion, "pagos_nomina", "empleados"));
        assert!(before(&deletion, "movimientos_herramienta", "herramientas"));
        assert!(before(&deletion, "partidas_presupuesto", "presupuestos"));
        assert!(before(&deletion, "suministros", "proveedores"));
        for table in ["nominas", "herramientas", "suministros", "presupuestos"] {
            assert!(before(&deletion, table, SCOPE_ROOT), "{table} before root");
        }
    }

    #[test]
    fn project_scope_skips_global_tables() {
        let order = declared().expect("order");
        let scoped = names(&order.tables_for_scope(ScopeKind::Project));
        assert!(!scoped.contains(&"empleados"));
        assert!(!scoped.contains(&"proveedores"));
        assert_eq!(scoped.last(), Some(&SCOPE_ROOT));

        let rebuild = names(&order.reconstruction_order(ScopeKind::Project));
        assert_eq!(rebuild.first(), Some(&SCOPE_ROOT));
    }

    #[test]
    fn order_key_puts_parents_first_and_unknown_last() {
        let order = declared().expect("order");
        let mut tables = vec!["zz_extra", "pagos_nomina", "aa_extra", "nominas", "proyectos"];
        tables.sort_by_key(|t| order.table_order_key(t));
        assert_eq!(tables, ["proyectos", "nominas", "pagos_nomina", "aa_extra", "zz_extra"]);
    }

    #[test]
    fn cycles_and_bad_references_are_rejected() {
        let a = TableSpec {
            name: "a",
            scoping_column: None,
            parent_table: Some("b"),
        };
        let b = TableSpec {
            name: "b",
            scoping_column: None,
            parent_table: Some("a"),
        };
        assert!(matches!(
            DependencyOrder::build(&[a, b], &[]),
            Err(OrderError::Cycle(_))
        ));
        assert!(matches!(
            DependencyOrder::build(&[a], &[]),
            Err(OrderError::UnknownReference { .. })
        ));
        assert_eq!(
            DependencyOrder::build(&[global("x"), global("x")], &[]).unwrap_err(),
            OrderError::Duplicate("x".into())
        );
    }
}
