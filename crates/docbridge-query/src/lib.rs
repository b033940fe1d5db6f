mod operator;
mod params;
mod path;
pub mod pushdown;

pub use bson::{Bson, Document};
pub use operator::Operator;
pub use params::QueryParams;
pub use path::{Path, PathError, PathErrorKind};
pub use pushdown::{PushdownValue, Scalar, classify};
