use std::error::Error;

/// Boxed error that is used at trait boundaries.
///
/// Modules define their own error types. Errors that cross a trait
/// boundary, such as building a layer through `BuildModule`, are boxed.
pub type BoxedError = Box<dyn Error + Send + Sync>;
