//! Reduction stage applied after selection.
//!
//! - [`filter_events()`]: keep events passing a mask
//! - [`reduce_events()`]: keep passing events and, per collection, only the retained objects in
//!   their selection order
//! - [`keep_columns()`]: project a batch onto a list of column patterns
//!
//! ## Example
//!
//! ```rust
//! use columnar_analysis::processing::reduce_events;
//! use columnar_analysis::selection::SelectionResult;
//! use columnar_analysis::types::{Column, RecordBatch};
//!
//! let batch = RecordBatch::from_columns([
//!     ("event", Column::scalar([1_i64, 2])),
//!     ("Jet.pt", Column::ragged(vec![vec![30.0, 80.0], vec![50.0]])),
//! ])
//! .unwrap();
//! let mut results = SelectionResult::new()
//!     .with_step("Jet", vec![Some(true), Some(false)])
//!     .with_objects("Jet", "Jet", vec![vec![1, 0], vec![0]]);
//! results.finalize(2).unwrap();
//!
//! let reduced = reduce_events(&batch, &results).unwrap();
//! assert_eq!(reduced.num_events(), 1);
//! assert_eq!(reduced.column("Jet.pt"), Some(&Column::ragged(vec![vec![80.0, 30.0]])));
//! ```

pub mod filter;
pub mod reduce;

pub use filter::filter_events;
pub use reduce::{keep_columns, reduce_events};
