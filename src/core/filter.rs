//! Filter expressions for WHERE and HAVING clauses

use crate::core::dialect::Dialect;
use crate::core::error::DatabaseError;
use crate::core::query_builder::ColumnLookup;
use crate::core::value::DatabaseValue;
use std::str::FromStr;

/// Boolean connective joining a condition to the ones before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// Comparison operators for filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators that expand their value into a placeholder list
    pub fn is_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Operators that take no value at all
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl FromStr for Operator {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_lowercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            "in" => Ok(Operator::In),
            "not in" => Ok(Operator::NotIn),
            "is null" => Ok(Operator::IsNull),
            "is not null" => Ok(Operator::IsNotNull),
            _ => Err(DatabaseError::configuration(format!(
                "unsupported operator: '{}'",
                s
            ))),
        }
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    None,
    Single(DatabaseValue),
    List(Vec<DatabaseValue>),
}

impl FilterValue {
    pub fn single(value: impl Into<DatabaseValue>) -> Self {
        FilterValue::Single(value.into())
    }

    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }

    fn into_values(self) -> Vec<DatabaseValue> {
        match self {
            FilterValue::None => Vec::new(),
            FilterValue::Single(v) => vec![v],
            FilterValue::List(vs) => vs,
        }
    }
}

/// Column reference or hand-written SQL fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Field name, translated to its quoted column at render time
    Column(String),
    /// Emitted as is
    Raw(String),
}

impl Expr {
    pub fn render(&self, dialect: Dialect, lookup: &dyn ColumnLookup) -> String {
        match self {
            Expr::Column(field) => dialect.quote(&lookup.column_name(field)),
            Expr::Raw(expr) => expr.clone(),
        }
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub connective: Connective,
    pub target: Expr,
    pub operator: Operator,
    pub value: FilterValue,
}

/// Ordered list of conditions.
///
/// The first condition's connective is never emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Render the condition list, appending bind values to `params` in
    /// placeholder order.
    pub fn render(
        &self,
        dialect: Dialect,
        lookup: &dyn ColumnLookup,
        params: &mut Vec<DatabaseValue>,
    ) -> String {
        let mut sql = String::new();
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(condition.connective.as_sql());
                sql.push(' ');
            }
            render_condition(&mut sql, condition, dialect, lookup, params);
        }
        sql
    }
}

fn render_condition(
    sql: &mut String,
    condition: &Condition,
    dialect: Dialect,
    lookup: &dyn ColumnLookup,
    params: &mut Vec<DatabaseValue>,
) {
    let target = condition.target.render(dialect, lookup);
    let op = condition.operator;

    if op.is_unary() {
        sql.push_str(&format!("{} {}", target, op.as_sql()));
        return;
    }

    match (&condition.value, op.is_list()) {
        (value, true) => {
            let values = value.clone().into_values();
            if values.is_empty() {
                // IN () is invalid SQL; keep the logical meaning instead
                sql.push_str(if op == Operator::In { "1 = 0" } else { "1 = 1" });
                return;
            }
            let placeholders = vec![dialect.placeholder(); values.len()].join(", ");
            sql.push_str(&format!("{} {} ({})", target, op.as_sql(), placeholders));
            params.extend(values);
        }
        (FilterValue::List(values), false) => {
            let placeholders = vec![dialect.placeholder(); values.len()].join(", ");
            sql.push_str(&format!("{} {} ({})", target, op.as_sql(), placeholders));
            params.extend(values.iter().cloned());
        }
        (FilterValue::Single(value), false) => {
            sql.push_str(&format!("{} {} {}", target, op.as_sql(), dialect.placeholder()));
            params.push(value.clone());
        }
        (FilterValue::None, false) => {
            sql.push_str(&format!("{} {} {}", target, op.as_sql(), dialect.placeholder()));
            params.push(DatabaseValue::Null);
        }
    }
}
