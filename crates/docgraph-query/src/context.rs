//! Compilation context and raw record layout
//!
//! The layout maps `(table, column)` to the offset of that value in the
//! records flowing out of the operator chain built so far. Offsets are
//! handed out in insertion order and never reused: adding a pair that is
//! already present appends a new slot and points the pair at it, matching
//! the runtime record, which grows by one field per addition.
//!
//! A sub-query is compiled in a child context that starts from a snapshot
//! of its parent's layout. What the child adds on top is returned as an
//! explicit [`LayoutDiff`] for the caller to merge.

use crate::functions::ScalarFunction;
use crate::operators::{ExecutionPlan, PhysicalOperator};
use docgraph_core::{ColumnGraphType, Error, PropertyName, Result, TableGraphType};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::trace;

/// One slot of the raw record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutColumn {
    pub table: String,
    pub column: PropertyName,
    pub column_type: ColumnGraphType,
}

/// Offsets of the columns in the in-flight record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecordLayout {
    columns: Vec<LayoutColumn>,
    index: HashMap<(String, PropertyName), usize>,
}

impl RawRecordLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, returning its offset
    pub fn add(&mut self, table: &str, column: PropertyName, column_type: ColumnGraphType) -> usize {
        let offset = self.columns.len();
        self.index.insert((table.to_string(), column.clone()), offset);
        self.columns.push(LayoutColumn {
            table: table.to_string(),
            column,
            column_type,
        });
        offset
    }

    /// Insert a column at offset 0, shifting every other column up by one
    pub fn insert_at_front(
        &mut self,
        table: &str,
        column: PropertyName,
        column_type: ColumnGraphType,
    ) -> usize {
        for offset in self.index.values_mut() {
            *offset += 1;
        }
        self.index.insert((table.to_string(), column.clone()), 0);
        self.columns.insert(
            0,
            LayoutColumn {
                table: table.to_string(),
                column,
                column_type,
            },
        );
        0
    }

    pub fn try_locate(&self, table: &str, column: &PropertyName) -> Option<usize> {
        self.index.get(&(table.to_string(), column.clone())).copied()
    }

    /// Offset of a column, or the internal "column not found" condition
    pub fn locate(&self, table: &str, column: &PropertyName) -> Result<usize> {
        self.try_locate(table, column)
            .ok_or_else(|| Error::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    pub fn columns(&self) -> &[LayoutColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Columns a child context added on top of its parent's layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutDiff {
    pub columns: Vec<LayoutColumn>,
}

impl LayoutDiff {
    /// The same columns, owned by another table alias
    pub fn relabel(&self, table: &str) -> LayoutDiff {
        LayoutDiff {
            columns: self
                .columns
                .iter()
                .map(|c| LayoutColumn {
                    table: table.to_string(),
                    ..c.clone()
                })
                .collect(),
        }
    }
}

/// One named column of a frozen layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderColumn {
    pub name: String,
    pub offset: usize,
    pub column_type: ColumnGraphType,
}

/// Frozen layout of a compiled block's output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableHeader {
    pub columns: Vec<HeaderColumn>,
}

impl TableHeader {
    /// Offset of a named column; later columns shadow earlier ones
    pub fn offset(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| c.offset)
    }

    /// The columns as a layout diff owned by `table`
    pub fn to_diff(&self, table: &str) -> LayoutDiff {
        LayoutDiff {
            columns: self
                .columns
                .iter()
                .map(|c| LayoutColumn {
                    table: table.to_string(),
                    column: PropertyName::named(&c.name),
                    column_type: c.column_type,
                })
                .collect(),
        }
    }
}

/// Result of a `SET @name = (...)` statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporaryTable {
    pub header: TableHeader,
    pub plan: ExecutionPlan,
}

/// A named value collector fed by `aggregate` and read by `cap`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideEffectFunction {
    pub name: String,
    pub source: ScalarFunction,
}

/// Registries shared by every context of one batch
#[derive(Debug, Clone, Default)]
pub struct Registries {
    temporary_tables: Arc<RwLock<HashMap<String, TemporaryTable>>>,
    side_effects: Arc<RwLock<BTreeMap<String, SideEffectFunction>>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_temporary_table(&self, name: &str, table: TemporaryTable) -> Result<()> {
        let mut tables = self
            .temporary_tables
            .write()
            .map_err(|e| Error::Internal(format!("temporary table registry poisoned: {}", e)))?;
        tables.insert(name.to_string(), table);
        Ok(())
    }

    pub fn temporary_table(&self, name: &str) -> Result<TemporaryTable> {
        let tables = self
            .temporary_tables
            .read()
            .map_err(|e| Error::Internal(format!("temporary table registry poisoned: {}", e)))?;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTemporaryTable(name.to_string()))
    }

    pub fn register_side_effect(&self, function: SideEffectFunction) -> Result<()> {
        let mut side_effects = self
            .side_effects
            .write()
            .map_err(|e| Error::Internal(format!("side-effect registry poisoned: {}", e)))?;
        side_effects.insert(function.name.clone(), function);
        Ok(())
    }

    pub fn side_effect(&self, name: &str) -> Result<SideEffectFunction> {
        let side_effects = self
            .side_effects
            .read()
            .map_err(|e| Error::Internal(format!("side-effect registry poisoned: {}", e)))?;
        side_effects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSideEffect(name.to_string()))
    }
}

/// Per-block compilation state
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    layout: RawRecordLayout,

    /// Snapshot of the parent's layout when compiling a sub-query
    parent_layout: Option<Arc<RawRecordLayout>>,

    /// Parent columns still present in `layout`, starting at `front_shift`
    inherited: usize,
    front_shift: usize,

    /// Aliases bound by this block's operator chain
    bound_tables: BTreeMap<String, TableGraphType>,

    /// Aliases bound by enclosing blocks
    outer_tables: BTreeMap<String, TableGraphType>,

    registries: Registries,
    current_operator: Option<PhysicalOperator>,
    output_names: Vec<String>,
    depth: usize,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registries(registries: Registries) -> Self {
        Self {
            registries,
            ..Self::default()
        }
    }

    /// Child context for a correlated sub-query: it sees this context's
    /// layout and bindings and shares its registries
    pub fn for_subquery(&self, max_depth: usize) -> Result<Self> {
        let depth = self.check_depth(max_depth)?;
        let mut outer_tables = self.outer_tables.clone();
        outer_tables.extend(self.bound_tables.iter().map(|(k, v)| (k.clone(), *v)));

        Ok(Self {
            layout: self.layout.clone(),
            parent_layout: Some(Arc::new(self.layout.clone())),
            inherited: self.layout.len(),
            front_shift: 0,
            bound_tables: BTreeMap::new(),
            outer_tables,
            registries: self.registries.clone(),
            current_operator: None,
            output_names: Vec::new(),
            depth,
        })
    }

    /// Fresh context for an uncorrelated block (derived table) sharing
    /// this context's registries
    pub fn detached(&self, max_depth: usize) -> Result<Self> {
        let depth = self.check_depth(max_depth)?;
        Ok(Self {
            registries: self.registries.clone(),
            depth,
            ..Self::default()
        })
    }

    fn check_depth(&self, max_depth: usize) -> Result<usize> {
        let depth = self.depth + 1;
        if depth > max_depth {
            return Err(Error::NestingTooDeep(max_depth));
        }
        Ok(depth)
    }

    /// Add a column at the end of the layout, or at its front
    pub fn add_field(
        &mut self,
        table: &str,
        column: PropertyName,
        column_type: ColumnGraphType,
        insert_at_front: bool,
    ) -> usize {
        trace!(table, column = %column, insert_at_front, "added field");
        if insert_at_front {
            self.front_shift += 1;
            self.layout.insert_at_front(table, column, column_type)
        } else {
            self.layout.add(table, column, column_type)
        }
    }

    pub fn locate(&self, table: &str, column: &PropertyName) -> Result<usize> {
        self.layout.locate(table, column)
    }

    pub fn try_locate(&self, table: &str, column: &PropertyName) -> Option<usize> {
        self.layout.try_locate(table, column)
    }

    pub fn layout(&self) -> &RawRecordLayout {
        &self.layout
    }

    pub fn parent_layout(&self) -> Option<&RawRecordLayout> {
        self.parent_layout.as_deref()
    }

    pub fn has_outer_context(&self) -> bool {
        self.parent_layout.is_some()
    }

    /// Offset in the parent's record of a column this context inherited
    pub fn to_parent_offset(&self, offset: usize) -> Option<usize> {
        if offset >= self.front_shift && offset < self.front_shift + self.inherited {
            Some(offset - self.front_shift)
        } else {
            None
        }
    }

    /// Columns added by this context on top of its parent's layout
    pub fn new_columns(&self) -> LayoutDiff {
        let columns = self
            .layout
            .columns()
            .iter()
            .enumerate()
            .filter(|(offset, _)| self.to_parent_offset(*offset).is_none())
            .map(|(_, c)| c.clone())
            .collect();
        LayoutDiff { columns }
    }

    /// Append a diff to the layout, returning the new offsets
    pub fn merge(&mut self, diff: &LayoutDiff) -> Vec<usize> {
        diff.columns
            .iter()
            .map(|c| self.add_field(&c.table, c.column.clone(), c.column_type, false))
            .collect()
    }

    /// Replace the layout with a projection's output
    pub fn replace_layout(&mut self, layout: RawRecordLayout, output_names: Vec<String>) {
        self.layout = layout;
        self.output_names = output_names;
        self.inherited = 0;
        self.front_shift = 0;
    }

    /// Freeze the current layout as a header; projected blocks use their
    /// output names, otherwise columns are named `table.column`
    pub fn to_temporary_table_header(&self) -> TableHeader {
        let named = self.output_names.len() == self.layout.len();
        let columns = self
            .layout
            .columns()
            .iter()
            .enumerate()
            .map(|(offset, c)| HeaderColumn {
                name: if named {
                    self.output_names[offset].clone()
                } else {
                    format!("{}.{}", c.table, c.column)
                },
                offset,
                column_type: c.column_type,
            })
            .collect();
        TableHeader { columns }
    }

    pub fn bind_table(&mut self, alias: &str, kind: TableGraphType) {
        self.bound_tables.insert(alias.to_string(), kind);
    }

    pub fn is_bound(&self, alias: &str) -> bool {
        self.bound_tables.contains_key(alias)
    }

    /// Bound here or by an enclosing block
    pub fn is_visible(&self, alias: &str) -> bool {
        self.is_bound(alias) || self.outer_tables.contains_key(alias)
    }

    pub fn outer_tables(&self) -> &BTreeMap<String, TableGraphType> {
        &self.outer_tables
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn current(&self) -> Option<&PhysicalOperator> {
        self.current_operator.as_ref()
    }

    pub fn take_current(&mut self) -> Option<PhysicalOperator> {
        self.current_operator.take()
    }

    pub fn set_current(&mut self, operator: PhysicalOperator) {
        self.current_operator = Some(operator);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn named(s: &str) -> PropertyName {
        PropertyName::named(s)
    }

    #[test]
    fn test_locate_and_missing_column() {
        let mut ctx = CompilationContext::new();
        assert_eq!(ctx.add_field("a", named("id"), ColumnGraphType::VertexId, false), 0);
        assert_eq!(ctx.add_field("a", named("name"), ColumnGraphType::Value, false), 1);

        assert_eq!(ctx.locate("a", &named("name")).unwrap(), 1);
        let err = ctx.locate("b", &named("id")).unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }

    #[test]
    fn test_readd_points_at_new_slot() {
        let mut layout = RawRecordLayout::new();
        layout.add("a", named("id"), ColumnGraphType::VertexId);
        layout.add("a", named("name"), ColumnGraphType::Value);
        let again = layout.add("a", named("id"), ColumnGraphType::VertexId);

        assert_eq!(again, 2);
        assert_eq!(layout.locate("a", &named("id")).unwrap(), 2);
        assert_eq!(layout.len(), 3);
    }

    #[test]
    fn test_insert_at_front_shifts_offsets() {
        let mut ctx = CompilationContext::new();
        ctx.add_field("a", named("id"), ColumnGraphType::VertexId, false);
        let mut child = ctx.for_subquery(4).unwrap();
        child.add_field("b", named("id"), ColumnGraphType::VertexId, false);
        child.add_field("o", named("key"), ColumnGraphType::Value, true);

        assert_eq!(child.locate("o", &named("key")).unwrap(), 0);
        assert_eq!(child.locate("a", &named("id")).unwrap(), 1);
        assert_eq!(child.locate("b", &named("id")).unwrap(), 2);
        assert_eq!(child.to_parent_offset(1), Some(0));
        assert_eq!(child.to_parent_offset(0), None);

        let diff = child.new_columns();
        let tables: Vec<&str> = diff.columns.iter().map(|c| c.table.as_str()).collect();
        assert_eq!(tables, vec!["o", "b"]);
    }

    #[test]
    fn test_subquery_context_inherits_bindings() {
        let mut ctx = CompilationContext::new();
        ctx.add_field("a", named("id"), ColumnGraphType::VertexId, false);
        ctx.bind_table("a", TableGraphType::Vertex);

        let mut child = ctx.for_subquery(4).unwrap();
        assert!(child.has_outer_context());
        assert!(child.is_visible("a"));
        assert!(!child.is_bound("a"));
        assert_eq!(child.locate("a", &named("id")).unwrap(), 0);

        child.add_field("b", named("id"), ColumnGraphType::VertexId, false);
        let diff = child.new_columns();
        assert_eq!(diff.columns.len(), 1);

        let offsets = ctx.merge(&diff.relabel("sub"));
        assert_eq!(offsets, vec![1]);
        assert_eq!(ctx.locate("sub", &named("id")).unwrap(), 1);
        assert_eq!(child.parent_layout().map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_nesting_limit() {
        let ctx = CompilationContext::new();
        let child = ctx.for_subquery(1).unwrap();
        assert_eq!(child.depth(), 1);
        assert!(matches!(child.for_subquery(1), Err(Error::NestingTooDeep(1))));
        assert!(matches!(child.detached(1), Err(Error::NestingTooDeep(1))));
    }

    #[test]
    fn test_temporary_table_header() {
        let mut ctx = CompilationContext::new();
        let mut layout = RawRecordLayout::new();
        layout.add("a", named("name"), ColumnGraphType::Value);
        layout.add("b", named("name"), ColumnGraphType::Value);
        ctx.replace_layout(layout, vec!["name".to_string(), "other".to_string()]);

        let header = ctx.to_temporary_table_header();
        assert_eq!(header.offset("other"), Some(1));
        assert_eq!(header.offset("missing"), None);

        let unnamed = CompilationContext::new();
        assert!(unnamed.to_temporary_table_header().columns.is_empty());
    }

    #[test]
    fn test_registries_are_shared() {
        let registries = Registries::new();
        let ctx = CompilationContext::with_registries(registries.clone());
        let child = ctx.for_subquery(4).unwrap();

        child
            .registries()
            .register_side_effect(SideEffectFunction {
                name: "x".to_string(),
                source: ScalarFunction::Field { offset: 0 },
            })
            .unwrap();
        assert!(registries.side_effect("x").is_ok());
        assert!(matches!(
            ctx.registries().side_effect("y"),
            Err(Error::UnknownSideEffect(_))
        ));
        assert!(matches!(
            ctx.registries().temporary_table("t"),
            Err(Error::UnknownTemporaryTable(_))
        ));
    }

    proptest! {
        /// Offsets are unique, contiguous from 0 and stable once given.
        #[test]
        fn prop_layout_offsets_are_monotonic(
            adds in proptest::collection::vec((0usize..4, 0usize..4), 1..30),
        ) {
            let mut layout = RawRecordLayout::new();
            for (i, (t, c)) in adds.iter().enumerate() {
                let table = format!("t{}", t);
                let offset = layout.add(&table, named(&format!("c{}", c)), ColumnGraphType::Value);
                prop_assert_eq!(offset, i);
            }
            prop_assert_eq!(layout.len(), adds.len());
            for (i, column) in layout.columns().iter().enumerate() {
                let located = layout.locate(&column.table, &column.column).unwrap();
                prop_assert!(located >= i);
            }
        }
    }
}
