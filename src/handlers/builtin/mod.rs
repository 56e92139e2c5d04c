/// Built-in node handlers
///
/// The static list of handlers registered at startup:
/// - fileInput: load a file from disk (collect)
/// - filter: keep array items whose property matches a condition (transform)
/// - transform: select values with a JSONPath expression (transform)

// Collect category handlers
pub mod file_input;

// Transform category handlers
pub mod filter;
pub mod transform;

pub use file_input::{FileInputConfig, FileInputHandler, FileType};
pub use filter::{FilterConfig, FilterHandler};
pub use transform::{TransformConfig, TransformHandler};

use crate::handlers::NodeHandler;
use std::sync::Arc;

/// Every built-in handler, in registration order
pub fn all() -> Vec<Arc<dyn NodeHandler>> {
    vec![
        Arc::new(FileInputHandler),
        Arc::new(FilterHandler),
        Arc::new(TransformHandler),
    ]
}
