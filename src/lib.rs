//! `columnar-analysis` runs event selections, categorization and weighted bookkeeping over
//! batches of columnar event records.
//!
//! An event batch ([`types::RecordBatch`]) holds scalar columns (`event`, `mc_weight`) and ragged
//! per-object columns addressed as `collection.field` (`Electron.pt`, `Jet.eta`). Processing a
//! batch is a fixed sequence:
//!
//! 1. **Selection** ([`selection`]): selectors return a [`selection::SelectionResult`] with
//!    per-step event masks, retained object indices and auxiliary columns. Results merge; the
//!    event decision is the AND of all step masks with undefined entries treated as failing.
//! 2. **Categorization** ([`category`]): leaf categories delegate to named categorizers;
//!    combined categories are the AND of their parents and carry the sum of their ids. Every
//!    event gets the list of its category ids in `category_ids`.
//! 3. **Statistics** ([`stats`]): per-batch weight totals, grouped by e.g. `process_id`, that
//!    merge elementwise so any split of the input gives the same totals.
//!
//! Systematic variations ([`shift`]) redirect column reads (`Jet.pt` → `Jet.pt_jec_up`) without
//! touching the transforms themselves. Declarations live in a mutable [`config::AnalysisConfig`]
//! built once before any batch runs; [`execution::ExecutionEngine`] then processes batches in
//! parallel, isolating failing batches.
//!
//! ## Quick example: select, categorize, count
//!
//! ```rust
//! use columnar_analysis::category::{Category, ObjectCount};
//! use columnar_analysis::config::AnalysisConfig;
//! use columnar_analysis::execution::AnalysisPipeline;
//! use columnar_analysis::selection::{LeptonSelector, SelectionPipeline};
//! use columnar_analysis::shift::NOMINAL;
//! use columnar_analysis::types::{Column, RecordBatch};
//!
//! # fn main() -> Result<(), columnar_analysis::AnalysisError> {
//! let mut config = AnalysisConfig::new("dilepton");
//! config.categorizers.register(
//!     ObjectCount::new("catid_2e").require("Electron", "Electron", 2).require("Muon", "Muon", 0),
//! )?;
//! config.add_category(Category::leaf(1, "2e", "catid_2e"))?;
//!
//! let leptons = LeptonSelector {
//!     muon_tight_id: false,
//!     ..LeptonSelector::default()
//! };
//! let selection = SelectionPipeline::new("default").with_selector(leptons);
//! let pipeline = AnalysisPipeline::from_config(&config, selection, NOMINAL)?;
//!
//! let batch = RecordBatch::from_columns([
//!     ("Electron.pt", Column::ragged(vec![vec![31.0, 25.0], vec![]])),
//!     ("Electron.eta", Column::ragged(vec![vec![0.1, -0.4], vec![]])),
//!     ("Muon.pt", Column::ragged(vec![Vec::<f64>::new(), vec![]])),
//!     ("Muon.eta", Column::ragged(vec![Vec::<f64>::new(), vec![]])),
//!     ("mc_weight", Column::scalar([1.5, 1.0])),
//!     ("process_id", Column::scalar([7_i64, 7])),
//! ])?;
//!
//! let out = pipeline.process(&batch)?;
//! assert_eq!(out.selected_events(), 1);
//! assert_eq!(out.stats.get("sum_mc_weight_selected", "process", 7), 1.5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: values, columns and the immutable [`types::RecordBatch`]
//! - [`registry`]: declared inputs/outputs of transforms and their dependency closure
//! - [`selection`]: selection results, selectors and the step executor
//! - [`category`]: categories, categorizers and category combinations
//! - [`shift`]: systematic shifts and column aliasing
//! - [`stats`]: mergeable weighted statistics
//! - [`production`]: producers for process ids, category ids and event weights
//! - [`processing`]: event filtering and object reduction after selection
//! - [`config`]: the declaration context and its JSON file form
//! - [`ingestion`]: JSON event ingestion with observer hooks
//! - [`execution`]: the parallel batch engine
//! - [`error`]: the crate-wide error type

pub mod category;
pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod processing;
pub mod production;
pub mod registry;
pub mod selection;
pub mod shift;
pub mod stats;
pub mod types;

pub use error::{AnalysisError, AnalysisResult};
