//! Table query builder.
//!
//! A `Query` describes one request against one table: the columns (and
//! embedded related rows) to return, row filters, ordering, a row range and
//! the operation. Backends translate it to their own wire format.

use std::cmp::Ordering;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive match; `%` or `*` match any run of characters.
    ILike(String, String),
    IsNull(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select,
    Insert(Vec<Value>),
    Update(Value),
    Upsert { rows: Vec<Value>, on_conflict: String },
    Delete,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Select)
    }
}

/// A related table requested inside `select`, e.g. `order_items(*)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    /// Key the related rows are returned under (alias, or the table name).
    pub name: String,
    pub table: String,
    pub columns: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    /// Inclusive row range, zero based.
    pub range: Option<(usize, usize)>,
    pub operation: Operation,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            operation: Operation::Select,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), value.into()));
        self
    }

    pub fn gt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gt(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn in_<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column.to_string(), pattern.into()));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some((from, to.max(from)));
        self
    }

    pub fn limit(self, count: usize) -> Self {
        self.range(0, count.saturating_sub(1))
    }

    /// Zero-based page of `size` rows.
    pub fn page(self, page: usize, size: usize) -> Self {
        let size = size.max(1);
        let from = page.saturating_mul(size);
        self.range(from, from.saturating_add(size - 1))
    }

    pub fn insert(mut self, rows: Vec<Value>) -> Self {
        self.operation = Operation::Insert(rows);
        self
    }

    pub fn update(mut self, patch: Value) -> Self {
        self.operation = Operation::Update(patch);
        self
    }

    pub fn upsert(mut self, rows: Vec<Value>, on_conflict: &str) -> Self {
        self.operation = Operation::Upsert {
            rows,
            on_conflict: on_conflict.to_string(),
        };
        self
    }

    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    /// Related tables named in the select list.
    pub fn embeds(&self) -> Vec<Embed> {
        split_top_level(&self.columns)
            .into_iter()
            .filter_map(|part| {
                let open = part.find('(')?;
                let close = part.rfind(')')?;
                let head = part[..open].trim();
                // `alias:table(...)` embeds `table` under `alias`
                let (name, table) = match head.split_once(':') {
                    Some((alias, table)) => (alias.trim(), table.trim()),
                    None => (head, head),
                };
                Some(Embed {
                    name: name.to_string(),
                    table: table.to_string(),
                    columns: part[open + 1..close].trim().to_string(),
                })
            })
            .collect()
    }

    /// PostgREST query-string parameters for this query.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        params.push(("select".to_string(), self.columns.replace(char::is_whitespace, "")));

        for filter in &self.filters {
            params.push(filter.to_param());
        }

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, o.direction.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }

        if let Some((from, to)) = self.range {
            params.push(("offset".to_string(), from.to_string()));
            params.push(("limit".to_string(), to.saturating_sub(from).saturating_add(1).to_string()));
        }

        if let Operation::Upsert { on_conflict, .. } = &self.operation {
            params.push(("on_conflict".to_string(), on_conflict.clone()));
        }

        params
    }
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::In(c, _)
            | Filter::ILike(c, _)
            | Filter::IsNull(c) => c,
        }
    }

    fn to_param(&self) -> (String, String) {
        let value = match self {
            Filter::Eq(_, v) => format!("eq.{}", render(v)),
            Filter::Neq(_, v) => format!("neq.{}", render(v)),
            Filter::Gt(_, v) => format!("gt.{}", render(v)),
            Filter::Gte(_, v) => format!("gte.{}", render(v)),
            Filter::Lt(_, v) => format!("lt.{}", render(v)),
            Filter::Lte(_, v) => format!("lte.{}", render(v)),
            Filter::In(_, vs) => {
                let items = vs.iter().map(render_list_item).collect::<Vec<_>>().join(",");
                format!("in.({items})")
            }
            Filter::ILike(_, p) => format!("ilike.{}", p.replace('%', "*")),
            Filter::IsNull(_) => "is.null".to_string(),
        };
        (self.column().to_string(), value)
    }

    /// Whether `row` satisfies this filter.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, v) => loose_eq(field, v),
            Filter::Neq(_, v) => !loose_eq(field, v),
            Filter::Gt(_, v) => compare(field, v) == Some(Ordering::Greater),
            Filter::Gte(_, v) => matches!(compare(field, v), Some(Ordering::Greater | Ordering::Equal)),
            Filter::Lt(_, v) => compare(field, v) == Some(Ordering::Less),
            Filter::Lte(_, v) => matches!(compare(field, v), Some(Ordering::Less | Ordering::Equal)),
            Filter::In(_, vs) => vs.iter().any(|v| loose_eq(field, v)),
            Filter::ILike(_, pattern) => field
                .as_str()
                .map(|s| wildcard_match(&pattern.to_lowercase(), &s.to_lowercase()))
                .unwrap_or(false),
            Filter::IsNull(_) => field.is_null(),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn render_list_item(value: &Value) -> String {
    let raw = render(value);
    if raw.contains(',') || raw.contains('(') || raw.contains(')') {
        format!("\"{}\"", raw.replace('"', "\\\""))
    } else {
        raw
    }
}

/// Equality that treats `7` and `"7"` as the same key.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => false,
    }
}

/// Ordering across JSON scalars; `None` for incomparable pairs.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '%' || pattern[p] == '*') {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%' || *c == '*')
}

fn split_top_level(columns: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in columns.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(columns[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(columns[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}
