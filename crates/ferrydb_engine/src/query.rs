//! Query compilation and evaluation.
//!
//! Two source languages compile to the same plan: a structured JSON form
//! (`{"select": [...], "where": {...}}`) and a SQL-like textual form
//! (`SELECT a, b FROM docs WHERE c = 'x'`). Plans are equality scans:
//! every document is matched against a conjunction of field filters and
//! projected down to the selected fields.
//!
//! Each row exposes the document body's top-level fields plus a synthetic
//! `_id` field carrying the document id, so queries can select or filter
//! on identity.

use ferrydb_boundary::{BoundaryError, BoundaryResult, QueryLanguage};
use serde_json::{Map, Value};
use sqlparser::ast::{self, BinaryOperator, Expr, SelectItem, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;

/// Synthetic row field carrying the document id.
pub(crate) const META_ID: &str = "_id";

/// Which fields a query projects.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    /// Every row field.
    All,
    /// The named fields, in order.
    Fields(Vec<String>),
}

/// The right-hand side of one equality filter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterValue {
    /// A literal JSON value.
    Literal(Value),
    /// A named parameter, bound at execution time.
    Parameter(String),
}

/// One equality filter on a row field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filter {
    pub field: String,
    pub value: FilterValue,
}

/// A compiled query plan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueryPlan {
    /// The FROM source, kept for diagnostics only.
    pub source: String,
    pub selection: Selection,
    pub filters: Vec<Filter>,
}

impl QueryPlan {
    /// Compiles source text in the given language.
    pub fn compile(language: QueryLanguage, text: &str) -> BoundaryResult<Self> {
        match language {
            QueryLanguage::Json => Self::compile_json(text),
            QueryLanguage::Sql => Self::compile_sql(text),
        }
    }

    fn compile_json(text: &str) -> BoundaryResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BoundaryError::query_compile(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| BoundaryError::query_compile("query must be a JSON object"))?;

        for clause in object.keys() {
            if clause != "select" && clause != "where" {
                return Err(BoundaryError::query_compile(format!(
                    "unknown clause: {clause}"
                )));
            }
        }

        let selection = match object.get("select") {
            None => Selection::All,
            Some(Value::String(s)) if s == "*" => Selection::All,
            Some(Value::Array(items)) => {
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(field) => fields.push(field.clone()),
                        other => {
                            return Err(BoundaryError::query_compile(format!(
                                "select entries must be field names, got {other}"
                            )))
                        }
                    }
                }
                if fields.is_empty() {
                    return Err(BoundaryError::query_compile("select must not be empty"));
                }
                Selection::Fields(fields)
            }
            Some(other) => {
                return Err(BoundaryError::query_compile(format!(
                    "select must be \"*\" or an array of field names, got {other}"
                )))
            }
        };

        let filters = match object.get("where") {
            None => Vec::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(field, value)| Filter {
                    field: field.clone(),
                    value: json_filter_value(value),
                })
                .collect(),
            Some(other) => {
                return Err(BoundaryError::query_compile(format!(
                    "where must be an object, got {other}"
                )))
            }
        };

        Ok(Self {
            source: "_default".to_string(),
            selection,
            filters,
        })
    }

    fn compile_sql(text: &str) -> BoundaryResult<Self> {
        let statements = Parser::parse_sql(&GenericDialect {}, text)
            .map_err(|e| BoundaryError::query_compile(e.to_string()))?;

        let mut statements = statements.into_iter();
        let statement = match (statements.next(), statements.next()) {
            (Some(statement), None) => statement,
            _ => {
                return Err(BoundaryError::query_compile(
                    "expected exactly one SELECT statement",
                ))
            }
        };

        let query = match statement {
            Statement::Query(query) => *query,
            other => {
                return Err(BoundaryError::query_compile(format!(
                    "only SELECT is supported, got: {other}"
                )))
            }
        };

        let select = match *query.body {
            SetExpr::Select(select) => select,
            other => {
                return Err(BoundaryError::query_compile(format!(
                    "only a plain SELECT body is supported, got: {other}"
                )))
            }
        };

        if select.from.len() != 1 {
            return Err(BoundaryError::query_compile(
                "exactly one FROM source is required",
            ));
        }
        if !select.from[0].joins.is_empty() {
            return Err(BoundaryError::query_compile("JOIN is not supported"));
        }
        let source = match &select.from[0].relation {
            TableFactor::Table { name, .. } => name.to_string(),
            other => {
                return Err(BoundaryError::query_compile(format!(
                    "unsupported FROM source: {other}"
                )))
            }
        };

        let mut wildcard = false;
        let mut fields = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => wildcard = true,
                SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                    fields.push(ident.value.clone())
                }
                other => {
                    return Err(BoundaryError::query_compile(format!(
                        "unsupported projection: {other}"
                    )))
                }
            }
        }
        let selection = if wildcard {
            if !fields.is_empty() {
                return Err(BoundaryError::query_compile(
                    "cannot mix * with named fields",
                ));
            }
            Selection::All
        } else if fields.is_empty() {
            return Err(BoundaryError::query_compile("empty projection"));
        } else {
            Selection::Fields(fields)
        };

        let filters = match &select.selection {
            None => Vec::new(),
            Some(expr) => collect_filters(expr)?,
        };

        Ok(Self {
            source,
            selection,
            filters,
        })
    }
}

fn json_filter_value(value: &Value) -> FilterValue {
    if let Value::String(s) = value {
        if let Some(name) = s.strip_prefix('$') {
            return FilterValue::Parameter(name.to_string());
        }
    }
    FilterValue::Literal(value.clone())
}

fn collect_filters(expr: &Expr) -> BoundaryResult<Vec<Filter>> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut filters = collect_filters(left)?;
            filters.extend(collect_filters(right)?);
            Ok(filters)
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let field = match left.as_ref() {
                Expr::Identifier(ident) => ident.value.clone(),
                other => {
                    return Err(BoundaryError::query_compile(format!(
                        "left side of = must be a field name, got: {other}"
                    )))
                }
            };
            Ok(vec![Filter {
                field,
                value: sql_filter_value(right)?,
            }])
        }
        other => Err(BoundaryError::query_compile(format!(
            "unsupported WHERE expression: {other}"
        ))),
    }
}

fn sql_filter_value(expr: &Expr) -> BoundaryResult<FilterValue> {
    let value = match expr {
        Expr::Value(value) => &value.value,
        other => {
            return Err(BoundaryError::query_compile(format!(
                "right side of = must be a literal, got: {other}"
            )))
        }
    };

    match value {
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Ok(FilterValue::Literal(Value::String(s.clone())))
        }
        ast::Value::Number(text, _) => {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(FilterValue::Literal(Value::from(n)));
            }
            match text.parse::<f64>() {
                Ok(n) => Ok(FilterValue::Literal(Value::from(n))),
                Err(_) => Err(BoundaryError::query_compile(format!(
                    "unparseable number literal: {text}"
                ))),
            }
        }
        ast::Value::Boolean(b) => Ok(FilterValue::Literal(Value::Bool(*b))),
        ast::Value::Null => Ok(FilterValue::Literal(Value::Null)),
        ast::Value::Placeholder(name) => Ok(FilterValue::Parameter(
            name.trim_start_matches(['$', ':']).to_string(),
        )),
        other => Err(BoundaryError::query_compile(format!(
            "unsupported literal: {other}"
        ))),
    }
}

/// Builds the field map one document exposes to a query.
fn row_fields(id: &str, body: &Value) -> Map<String, Value> {
    let mut fields = match body {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    fields.insert(META_ID.to_string(), Value::String(id.to_string()));
    fields
}

/// Runs a plan over live documents; returns a JSON array of rows.
///
/// Rows are emitted in document-id order, so execution over unchanged data
/// is deterministic.
pub(crate) fn execute_plan(
    plan: &QueryPlan,
    parameters: &Map<String, Value>,
    documents: &BTreeMap<String, Value>,
) -> BoundaryResult<String> {
    let mut rows = Vec::new();

    for (id, body) in documents {
        let fields = row_fields(id, body);

        let mut matched = true;
        for filter in &plan.filters {
            let expected = match &filter.value {
                FilterValue::Literal(value) => value,
                FilterValue::Parameter(name) => parameters.get(name).ok_or_else(|| {
                    BoundaryError::invalid_operation(format!(
                        "unbound query parameter: ${name}"
                    ))
                })?,
            };
            if fields.get(&filter.field) != Some(expected) {
                matched = false;
                break;
            }
        }
        if !matched {
            continue;
        }

        let row = match &plan.selection {
            Selection::All => Value::Object(fields),
            Selection::Fields(names) => {
                let mut projected = Map::new();
                for name in names {
                    if let Some(value) = fields.get(name) {
                        projected.insert(name.clone(), value.clone());
                    }
                }
                Value::Object(projected)
            }
        };
        rows.push(row);
    }

    serde_json::to_string(&Value::Array(rows))
        .map_err(|e| BoundaryError::invalid_json(e.to_string()))
}

/// Renders a plan as a human-readable string.
pub(crate) fn explain_plan(plan: &QueryPlan) -> String {
    let mut lines = vec![format!("SCAN {}", plan.source)];
    for filter in &plan.filters {
        let value = match &filter.value {
            FilterValue::Literal(value) => value.to_string(),
            FilterValue::Parameter(name) => format!("${name}"),
        };
        lines.push(format!("FILTER {} = {}", filter.field, value));
    }
    match &plan.selection {
        Selection::All => lines.push("PROJECT *".to_string()),
        Selection::Fields(fields) => lines.push(format!("PROJECT {}", fields.join(", "))),
    }
    lines.join("\n")
}
