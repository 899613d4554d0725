pub mod ids;
pub mod statement;
pub mod value;

pub use ids::{AttributeId, BytesId, DatasetId, EntityId, StringId};
pub use statement::{Dataset, Statement, StatementPattern};
pub use value::{InternKind, Value, ValueRef};
