//! histboost: the training core of a histogram-based gradient boosted
//! decision tree system.
//!
//! Raw feature vectors are discretized once into small integer bins
//! ([`binning`]), then each tree is grown by repeatedly building per-(leaf,
//! feature) gradient histograms and searching them for the best regularized
//! split ([`training`]). Grown trees collapse into immutable [`trees`]
//! models. All data flows through the partitioned dataset abstraction in
//! [`data`], which keeps the core independent of the execution substrate.

pub mod binning;
pub mod config;
pub mod data;
pub mod error;
pub mod training;
pub mod trees;

pub use binning::{BinId, Discretizer};
pub use config::{BinKind, BoostConfig, StorageLevel, TreeConfig};
pub use data::ParallelDataset;
pub use error::{HistBoostError, Result};
pub use training::{Instance, Split, TreeGrower};
pub use trees::TreeModel;
