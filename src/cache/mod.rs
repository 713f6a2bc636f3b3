//! 对象缓存层：值树、缓存键、缓存本身与渲染

pub mod key;
pub mod render;
pub mod store;
pub mod value;

pub use key::{is_reference, CacheKey, LAST_OUTPUT_KEY};
pub use store::{ObjectCache, AUTO_REGISTER_LIMIT};
pub use value::{DomainObject, ObjectRef, Value};
