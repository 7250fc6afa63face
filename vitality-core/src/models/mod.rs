//! Catalogue of chat and embedding models the pipeline knows how to size.

mod registry;

pub use registry::{embedding_dimensions, known_models, lookup, KnownModel, ModelRole};
