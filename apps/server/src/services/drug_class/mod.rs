//! Drug-class lookup and medication annotation.

pub mod annotator;
pub mod cache;
pub mod map;

pub use annotator::{
    rxnorm_code, AnnotationOutcome, DrugClassAnnotator, DRUG_CLASS_EXTENSION_URL, RXNORM_SYSTEM,
};
pub use cache::{DrugClassCache, DrugClassCacheConfig, DrugClassSource, RxNavSource};
pub use map::DrugClassMap;
