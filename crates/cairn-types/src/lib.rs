pub mod cancel;
pub mod content_id;
pub mod error;
pub mod object_id;

pub use cancel::CancelToken;
pub use content_id::ContentId;
pub use error::{CairnError, Result};
pub use object_id::ObjectId;
