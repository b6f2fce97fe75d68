//! Cell dependency graph built from workbook formulas.
//!
//! Every formula cell becomes a `Calculated` node with edges to the cells
//! it references; referenced cells without a formula become `Input` nodes,
//! even when they are empty in the workbook. Cycle detection runs Tarjan's
//! strongly-connected-components algorithm over the adjacency lists.

use crate::spreadsheet::parser::{cell_address, parse_address, CellValue, ParsedWorkbook};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    /// Holds a literal value and feeds formulas.
    Input,
    /// Derives its value from other cells.
    Calculated,
    /// Text cell with no role in any formula.
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellNode {
    /// Qualified key, e.g. `"Model!B3"`.
    pub key: String,
    pub sheet: String,
    pub row: u32,
    pub col: u32,
    pub cell_type: CellType,
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: BTreeMap<String, CellNode>,
    /// Formula cell -> cells it reads.
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Cell -> formula cells that read it.
    pub dependents: BTreeMap<String, Vec<String>>,
    pub has_cycles: bool,
    pub cycle_nodes: Vec<String>,
}

impl DependencyGraph {
    pub fn node(&self, key: &str) -> Option<&CellNode> {
        self.nodes.get(key)
    }

    pub fn input_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.cell_type == CellType::Input)
            .count()
    }

    pub fn calculated_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.cell_type == CellType::Calculated)
            .count()
    }

    /// True when the cell holds a literal rather than a formula.
    pub fn is_input(&self, key: &str) -> bool {
        self.node(key)
            .map(|n| n.cell_type == CellType::Input)
            .unwrap_or(false)
    }
}

/// Range expansion cap; pathological references like `A1:ZZ10000` are
/// truncated rather than materialized.
const MAX_RANGE_CELLS: usize = 1_000;

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn reference_re() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| {
        // Optional sheet qualifier (bare or quoted), then a cell address or
        // range, all with optional absolute markers.
        Regex::new(
            r"(?:(?:'([^']+)'|([A-Za-z_][A-Za-z0-9_]*))!)?(\$?[A-Za-z]{1,3}\$?\d{1,7})(?::(\$?[A-Za-z]{1,3}\$?\d{1,7}))?",
        )
        .expect("reference pattern compiles")
    })
}

pub fn build_graph(workbook: &ParsedWorkbook) -> DependencyGraph {
    let mut graph = DependencyGraph::default();

    // Pass 1: one node per populated cell.
    for sheet in &workbook.sheets {
        for cell in &sheet.cells {
            let key = qualify(&sheet.name, cell.row, cell.col);
            let cell_type = if cell.formula.is_some() {
                CellType::Calculated
            } else {
                match cell.value {
                    CellValue::Text(_) => CellType::Label,
                    _ => CellType::Input,
                }
            };
            graph.nodes.insert(
                key.clone(),
                CellNode {
                    key,
                    sheet: sheet.name.clone(),
                    row: cell.row,
                    col: cell.col,
                    cell_type,
                    formula: cell.formula.clone(),
                },
            );
        }
    }

    // Pass 2: edges from formulas. References to cells the workbook never
    // populated still get a placeholder input node so every edge has both
    // endpoints.
    for sheet in &workbook.sheets {
        for cell in &sheet.cells {
            let Some(formula) = &cell.formula else {
                continue;
            };
            let from = qualify(&sheet.name, cell.row, cell.col);
            let refs = extract_references(formula, &sheet.name);
            for (ref_sheet, row, col) in refs {
                let to = qualify(&ref_sheet, row, col);
                graph.nodes.entry(to.clone()).or_insert_with(|| CellNode {
                    key: to.clone(),
                    sheet: ref_sheet.clone(),
                    row,
                    col,
                    cell_type: CellType::Input,
                    formula: None,
                });
                // Label cells that feed formulas are still inputs to them.
                graph
                    .dependencies
                    .entry(from.clone())
                    .or_default()
                    .push(to.clone());
                graph.dependents.entry(to).or_default().push(from.clone());
            }
        }
    }

    for deps in graph.dependencies.values_mut() {
        deps.sort();
        deps.dedup();
    }
    for deps in graph.dependents.values_mut() {
        deps.sort();
        deps.dedup();
    }

    let cycles = find_cycles(&graph);
    graph.has_cycles = !cycles.is_empty();
    graph.cycle_nodes = cycles;
    if graph.has_cycles {
        warn!(
            "workbook '{}' contains circular references across {} cells",
            workbook.path,
            graph.cycle_nodes.len()
        );
    }

    debug!(
        "dependency graph: {} nodes ({} input, {} calculated), {} formula cells",
        graph.nodes.len(),
        graph.input_count(),
        graph.calculated_count(),
        graph.dependencies.len()
    );

    graph
}

fn qualify(sheet: &str, row: u32, col: u32) -> String {
    format!("{}!{}", sheet, cell_address(row, col))
}

/// Extracts every cell a formula references, with ranges expanded.
/// Unqualified references resolve against `current_sheet`.
pub fn extract_references(formula: &str, current_sheet: &str) -> Vec<(String, u32, u32)> {
    let mut refs = Vec::new();
    let body = formula.strip_prefix('=').unwrap_or(formula);

    for caps in reference_re().captures_iter(body) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        // A match immediately followed by '(' is a function name
        // (LOG10, ATAN2) that happens to look like an address.
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        if body[end..].starts_with('(') {
            continue;
        }
        let sheet = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| current_sheet.to_string());
        let Some((start_row, start_col)) = parse_address(caps.get(3).map_or("", |m| m.as_str()))
        else {
            continue;
        };
        match caps.get(4).and_then(|m| parse_address(m.as_str())) {
            Some((end_row, end_col)) => {
                let (r0, r1) = (start_row.min(end_row), start_row.max(end_row));
                let (c0, c1) = (start_col.min(end_col), start_col.max(end_col));
                let mut emitted = 0usize;
                'rows: for row in r0..=r1 {
                    for col in c0..=c1 {
                        if emitted >= MAX_RANGE_CELLS {
                            warn!("range '{}' truncated at {} cells", whole, MAX_RANGE_CELLS);
                            break 'rows;
                        }
                        refs.push((sheet.clone(), row, col));
                        emitted += 1;
                    }
                }
            }
            None => refs.push((sheet, start_row, start_col)),
        }
    }

    refs
}

/// Tarjan's SCC over the dependency edges; any component larger than one
/// node, or a self-referencing node, is a cycle.
fn find_cycles(graph: &DependencyGraph) -> Vec<String> {
    struct Tarjan<'a> {
        adjacency: &'a BTreeMap<String, Vec<String>>,
        index: usize,
        indices: HashMap<&'a str, usize>,
        lowlinks: HashMap<&'a str, usize>,
        on_stack: HashSet<&'a str>,
        stack: Vec<&'a str>,
        cycles: Vec<String>,
    }

    impl<'a> Tarjan<'a> {
        fn visit(&mut self, node: &'a str) {
            self.indices.insert(node, self.index);
            self.lowlinks.insert(node, self.index);
            self.index += 1;
            self.stack.push(node);
            self.on_stack.insert(node);

            if let Some(neighbors) = self.adjacency.get(node) {
                for next in neighbors {
                    let next = next.as_str();
                    if !self.indices.contains_key(next) {
                        self.visit(next);
                        let low = self.lowlinks[node].min(self.lowlinks[next]);
                        self.lowlinks.insert(node, low);
                    } else if self.on_stack.contains(next) {
                        let low = self.lowlinks[node].min(self.indices[next]);
                        self.lowlinks.insert(node, low);
                    }
                }
            }

            if self.lowlinks[node] == self.indices[node] {
                let mut component = Vec::new();
                while let Some(top) = self.stack.pop() {
                    self.on_stack.remove(top);
                    component.push(top);
                    if top == node {
                        break;
                    }
                }
                let self_loop = component.len() == 1
                    && self
                        .adjacency
                        .get(component[0])
                        .map(|deps| deps.iter().any(|d| d == component[0]))
                        .unwrap_or(false);
                if component.len() > 1 || self_loop {
                    self.cycles.extend(component.iter().map(|s| s.to_string()));
                }
            }
        }
    }

    let mut tarjan = Tarjan {
        adjacency: &graph.dependencies,
        index: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        cycles: Vec::new(),
    };

    for node in graph.dependencies.keys() {
        if !tarjan.indices.contains_key(node.as_str()) {
            tarjan.visit(node);
        }
    }

    let mut cycles = tarjan.cycles;
    cycles.sort();
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::parser::{ParsedCell, ParsedSheet};

    fn formula_cell(row: u32, col: u32, value: f64, formula: &str) -> ParsedCell {
        ParsedCell {
            row,
            col,
            address: cell_address(row, col),
            value: CellValue::Number(value),
            formula: Some(formula.to_string()),
        }
    }

    fn number_cell(row: u32, col: u32, value: f64) -> ParsedCell {
        ParsedCell {
            row,
            col,
            address: cell_address(row, col),
            value: CellValue::Number(value),
            formula: None,
        }
    }

    fn workbook(cells: Vec<ParsedCell>) -> ParsedWorkbook {
        ParsedWorkbook {
            path: "test.xlsx".to_string(),
            sheets: vec![ParsedSheet::new("Model", cells)],
            defined_names: Vec::new(),
        }
    }

    #[test]
    fn test_reference_extraction() {
        let refs = extract_references("=B1+B2", "Model");
        assert_eq!(
            refs,
            vec![
                ("Model".to_string(), 0, 1),
                ("Model".to_string(), 1, 1)
            ]
        );
    }

    #[test]
    fn test_sheet_qualified_and_quoted_references() {
        let refs = extract_references("='Income Statement'!B3+Assumptions!$C$2", "Model");
        assert_eq!(refs[0], ("Income Statement".to_string(), 2, 1));
        assert_eq!(refs[1], ("Assumptions".to_string(), 1, 2));
    }

    #[test]
    fn test_range_expansion() {
        let refs = extract_references("=SUM(B1:B3)", "Model");
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0], ("Model".to_string(), 0, 1));
        assert_eq!(refs[2], ("Model".to_string(), 2, 1));
    }

    #[test]
    fn test_function_names_are_not_references() {
        let refs = extract_references("=LOG10(B1)", "Model");
        assert_eq!(refs, vec![("Model".to_string(), 0, 1)]);
    }

    #[test]
    fn test_graph_classification_and_placeholders() {
        // B3 = B1 - B2, with B2 never populated.
        let graph = build_graph(&workbook(vec![
            number_cell(0, 1, 1_000.0),
            formula_cell(2, 1, 600.0, "=B1-B2"),
        ]));

        assert_eq!(graph.nodes["Model!B1"].cell_type, CellType::Input);
        assert_eq!(graph.nodes["Model!B3"].cell_type, CellType::Calculated);
        // Referenced-but-empty cell exists as a placeholder input.
        assert_eq!(graph.nodes["Model!B2"].cell_type, CellType::Input);

        assert_eq!(
            graph.dependencies["Model!B3"],
            vec!["Model!B1".to_string(), "Model!B2".to_string()]
        );
        assert_eq!(graph.dependents["Model!B1"], vec!["Model!B3".to_string()]);
        assert!(!graph.has_cycles);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = build_graph(&workbook(vec![
            formula_cell(0, 1, 0.0, "=B2+1"),
            formula_cell(1, 1, 0.0, "=B1+1"),
        ]));
        assert!(graph.has_cycles);
        assert_eq!(
            graph.cycle_nodes,
            vec!["Model!B1".to_string(), "Model!B2".to_string()]
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let graph = build_graph(&workbook(vec![formula_cell(0, 1, 0.0, "=Model!B1+1")]));
        assert!(graph.has_cycles);
        assert_eq!(graph.cycle_nodes, vec!["Model!B1".to_string()]);
        assert_eq!(graph.dependencies["Model!B1"], vec!["Model!B1".to_string()]);
    }
}

