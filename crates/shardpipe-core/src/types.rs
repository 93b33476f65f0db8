use serde::{Deserialize, Serialize};

/// Statement class of the logical SQL being fanned out. Selects which
/// per-unit event variant the executor publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Dql,
    Dml,
    Ddl,
    Dcl,
    Tcl,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DataValue {
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

/// One rewritten SQL string plus the parameter sets to bind against it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlUnit {
    pub sql: String,
    pub parameter_sets: Vec<Vec<DataValue>>,
}

impl SqlUnit {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameter_sets: Vec::new(),
        }
    }

    pub fn with_parameter_sets(sql: impl Into<String>, parameter_sets: Vec<Vec<DataValue>>) -> Self {
        Self {
            sql: sql.into(),
            parameter_sets,
        }
    }
}
