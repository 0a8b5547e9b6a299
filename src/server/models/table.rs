use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest page a caller may request. Out-of-range values are clamped,
/// never rejected.
pub const MAX_PAGE_SIZE: usize = 500;

/// A single scalar cell in a tabular result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    /// Converts an arbitrary upstream JSON value into a scalar cell.
    ///
    /// Non-finite numbers collapse to `Null`; nested arrays and objects are
    /// stringified with their serialized JSON form so the result is
    /// deterministic.
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => Cell::Float(f),
                        _ => Cell::Null,
                    }
                }
            }
            Value::String(s) => Cell::Str(s.clone()),
            other => Cell::Str(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => {
                // Non-finite floats have no JSON representation.
                serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
            }
            Cell::Str(s) => Value::String(s.clone()),
        }
    }
}

/// An ordered tabular result: a stable column list and rows of scalar cells.
///
/// Column order is the order of keys in the first upstream record and stays
/// fixed across pagination and cache round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Table {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from a JSON array of flat records.
    ///
    /// The first record fixes the column set and order. Later records missing
    /// a column yield `Null`; keys absent from the first record are ignored.
    pub fn from_records(records: &[Value]) -> Option<Table> {
        let first = records.first()?.as_object()?;
        let columns: Vec<String> = first.keys().cloned().collect();
        if columns.is_empty() {
            return None;
        }

        let mut table = Table::new(columns);
        for record in records {
            let obj = match record.as_object() {
                Some(obj) => obj,
                None => continue,
            };
            let row = table
                .columns
                .iter()
                .map(|col| obj.get(col).map_or(Cell::Null, Cell::from_json))
                .collect();
            table.rows.push(row);
        }
        Some(table)
    }

    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    /// Renders one row as a JSON object in column order.
    fn record(&self, row: &[Cell]) -> Map<String, Value> {
        self.columns
            .iter()
            .zip(row.iter())
            .map(|(col, cell)| (col.clone(), cell.to_json()))
            .collect()
    }

    /// Projects the table onto a `(page, page_size)` window.
    ///
    /// `page` and `page_size` are clamped to the nearest valid value; the
    /// same inputs always yield the same slice.
    pub fn paginate(&self, page: usize, page_size: usize) -> TablePage {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let total_records = self.rows.len();
        let total_pages = total_records.div_ceil(page_size).max(1);
        let page = page.clamp(1, total_pages);

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(total_records);
        let data = self.rows[start..end]
            .iter()
            .map(|row| self.record(row))
            .collect();

        TablePage {
            data,
            current_page: page,
            total_pages,
            total_records,
        }
    }
}

/// One page of a tabular result, ready for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePage {
    pub data: Vec<Map<String, Value>>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> Table {
        let records = vec![
            json!({"date": "2024-01-01", "close": 10.5, "volume": 1000}),
            json!({"date": "2024-01-02", "close": 11.0, "volume": 1200}),
            json!({"date": "2024-01-03", "close": 10.8, "volume": 900}),
        ];
        Table::from_records(&records).unwrap()
    }

    #[test]
    fn column_order_follows_first_record() {
        let table = sample_table();
        assert_eq!(table.columns, vec!["date", "close", "volume"]);
    }

    #[test]
    fn missing_fields_become_null() {
        let records = vec![
            json!({"a": 1, "b": 2}),
            json!({"a": 3}),
            json!({"a": 4, "b": 5, "c": 6}),
        ];
        let table = Table::from_records(&records).unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[1], vec![Cell::Int(3), Cell::Null]);
        assert_eq!(table.rows[2], vec![Cell::Int(4), Cell::Int(5)]);
    }

    #[test]
    fn nested_values_are_stringified() {
        let records = vec![json!({"k": [1, 2]})];
        let table = Table::from_records(&records).unwrap();
        assert_eq!(table.rows[0][0], Cell::Str("[1,2]".to_string()));
    }

    #[test]
    fn empty_input_yields_no_table() {
        assert!(Table::from_records(&[]).is_none());
        assert!(Table::from_records(&[json!({})]).is_none());
    }

    #[test]
    fn paginate_slices_in_order() {
        let table = sample_table();
        let page = table.paginate(1, 2);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.total_records, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0]["date"], json!("2024-01-01"));
        assert_eq!(page.data[1]["date"], json!("2024-01-02"));

        let last = table.paginate(2, 2);
        assert_eq!(last.data.len(), 1);
        assert_eq!(last.data[0]["date"], json!("2024-01-03"));
    }

    #[test]
    fn paginate_clamps_out_of_range() {
        let table = sample_table();

        // Page past the end clamps to the last page.
        let page = table.paginate(99, 2);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.data.len(), 1);

        // Zero values clamp up to the minimum.
        let page = table.paginate(0, 0);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.data.len(), 1);

        // Oversized pages clamp down to the cap.
        let page = table.paginate(1, 100_000);
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn paginate_empty_table_has_one_page() {
        let table = Table::new(vec!["a".to_string()]);
        let page = table.paginate(1, 10);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_records, 0);
        assert!(page.data.is_empty());
    }

    #[test]
    fn concatenated_pages_equal_full_table() {
        let records: Vec<_> = (0..17).map(|i| json!({"n": i})).collect();
        let table = Table::from_records(&records).unwrap();

        let mut seen = Vec::new();
        for page in 1..=table.paginate(1, 5).total_pages {
            seen.extend(table.paginate(page, 5).data);
        }
        let full = table.paginate(1, MAX_PAGE_SIZE);
        assert_eq!(seen, full.data);
    }

    #[test]
    fn cache_round_trip_is_byte_stable() {
        let table = sample_table();
        let bytes = serde_json::to_vec(&table).unwrap();
        let decoded: Table = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(serde_json::to_vec(&decoded).unwrap(), bytes);
    }
}
