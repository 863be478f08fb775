/// Builds a `TVec`, like `vec!`.
#[macro_export]
macro_rules! tvec {
    ($elem:expr; $n:expr) => {
        $crate::TVec::from_elem($elem, $n)
    };
    ($($x:expr),* $(,)?) => {
        <$crate::TVec<_> as ::std::iter::FromIterator<_>>::from_iter([$($x),*])
    };
}
