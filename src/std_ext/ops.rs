/// simple trait to add a `.len()` equivalent to implementors
pub trait Len {
    /// get the length of the implementing object
    #[must_use]
    fn len(&self) -> usize;

    /// returns `true` if the implementor has a length of zero
    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
