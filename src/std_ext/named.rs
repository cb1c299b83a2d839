/// We need fixed names for many parts of this lib.
///
/// names show up in log lines and in [`BlindTimingError::SenderNotInitialized`]
///
/// [`BlindTimingError::SenderNotInitialized`]: crate::error::BlindTimingError::SenderNotInitialized
pub trait Named {
    /// Provide the name of this element.
    fn name(&self) -> &str;
}
