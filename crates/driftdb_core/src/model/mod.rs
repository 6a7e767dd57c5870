//! Document, mutation and query model.

mod document;
mod document_key;
mod field_path;
mod mutation;
mod mutation_batch;
mod object_value;
mod query;
mod target_data;
mod transform;

pub use document::{Document, MaybeDocument, NoDocument, UnknownDocument};
pub use document_key::DocumentKey;
pub use field_path::{FieldMask, FieldPath};
pub use mutation::{Mutation, MutationKind, MutationResult, Precondition};
pub use mutation_batch::{MutationBatch, MutationBatchResult};
pub use object_value::ObjectValue;
pub use query::{Direction, FieldFilter, LimitType, Operator, OrderBy, Query, Target};
pub use target_data::{TargetData, TargetPurpose};
pub use transform::{FieldTransform, TransformOperation};
