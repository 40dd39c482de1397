// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The query surface over a collected trace.
//!
//! This module only declares the contract: a processor ingests a stream of
//! trace bytes, discovers the format on the first push, and answers
//! SQL-style queries over the decoded events with column-oriented results.
//! The engine implementing it lives outside this crate.

use serde::Deserialize;
use serde::Serialize;

/// Configuration for a trace processor instance.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Config {}

/// A single query to execute over the loaded portion of the trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryArgs {
    pub sql_query: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Long,
    Double,
    String,
}

/// Name and type of one result column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub col_type: ColumnType,
}

/// The values of one result column, across all records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    Long(Vec<i64>),
    Double(Vec<f64>),
    String(Vec<String>),
}

/// A column-oriented query result.
///
/// `columns` runs parallel to `column_descriptors`; every column holds
/// `num_records` values. A failed query reports through `error` and carries
/// no columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub column_descriptors: Vec<ColumnDescriptor>,
    pub columns: Vec<ColumnValues>,
    pub num_records: u64,
    pub error: Option<String>,
}

/// Coordinates the loading of trace data and the execution of SQL queries
/// over the decoded events.
pub trait TraceProcessor {
    /// Pushes a chunk of trace bytes into the processor. The trace format
    /// is discovered on the first push; queries may run between pushes.
    ///
    /// Returns true while ingestion keeps succeeding. After an
    /// unrecoverable parse error it returns false and further chunks are
    /// dropped on the floor.
    fn parse(&mut self, data: &[u8]) -> bool;

    /// Flushes events still queued in the ordering stage; call after the
    /// last chunk of a bounded trace instead of waiting for their time
    /// window to expire.
    fn notify_end_of_file(&mut self);

    /// Executes a query on the loaded portion of the trace.
    fn execute_query(&mut self, args: &QueryArgs) -> QueryResult;

    /// Interrupts the query currently executing, typically from a Ctrl-C
    /// handler.
    fn interrupt_query(&mut self);
}
