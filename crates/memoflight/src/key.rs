use std::fmt;
use std::sync::Arc;

/// The key under which the outcome of a single call is deduplicated and cached.
///
/// Keys are derived from the call arguments via [`CacheKey::from_args`]. Every argument is
/// rendered through its [`Display`](fmt::Display) implementation, and the renderings are joined
/// with `,`. Two calls share a key exactly when those canonical strings are equal.
///
/// A call without any arguments maps to [`CacheKey::Empty`], which lives in its own key-space and
/// never collides with a rendered argument list, not even with one that renders as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    /// The key of a call made without arguments.
    Empty,
    /// The canonical rendering of a non-empty argument list.
    Args(Arc<str>),
}

impl CacheKey {
    /// Canonicalizes the given arguments into a [`CacheKey`].
    pub fn from_args<A: CacheArgs + ?Sized>(args: &A) -> Self {
        let mut builder = CacheKeyBuilder::default();
        args.write_key(&mut builder);
        builder.build()
    }

    /// Returns the canonical argument rendering, or `None` for [`CacheKey::Empty`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheKey::Empty => None,
            CacheKey::Args(args) => Some(args),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Empty => f.write_str("<no arguments>"),
            CacheKey::Args(args) => f.write_str(args),
        }
    }
}

/// A builder for [`CacheKey`]s.
///
/// Arguments are appended one at a time. The builder keeps track of whether any argument was
/// pushed at all, so that an empty argument list can be told apart from a list of empty strings.
#[derive(Debug, Default)]
pub struct CacheKeyBuilder {
    rendered: String,
    count: usize,
}

impl CacheKeyBuilder {
    /// Appends the [`Display`](fmt::Display) rendering of a single argument.
    pub fn push_arg<D: fmt::Display + ?Sized>(&mut self, arg: &D) -> &mut Self {
        if self.count > 0 {
            self.rendered.push(',');
        }
        self.rendered.push_str(&arg.to_string());
        self.count += 1;
        self
    }

    /// Finalizes the key.
    pub fn build(self) -> CacheKey {
        if self.count == 0 {
            CacheKey::Empty
        } else {
            CacheKey::Args(self.rendered.into())
        }
    }
}

/// An argument list that can be canonicalized into a [`CacheKey`].
///
/// This is implemented for tuples of up to eight [`Display`](fmt::Display) values (including the
/// empty tuple), for slices, arrays and [`Vec`]s of such values, and for references to any of
/// those.
pub trait CacheArgs {
    /// Pushes every argument, in order, into the `builder`.
    fn write_key(&self, builder: &mut CacheKeyBuilder);
}

impl CacheArgs for () {
    fn write_key(&self, _builder: &mut CacheKeyBuilder) {}
}

macro_rules! impl_tuple_args {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: fmt::Display),+> CacheArgs for ($($name,)+) {
            fn write_key(&self, builder: &mut CacheKeyBuilder) {
                $(builder.push_arg(&self.$idx);)+
            }
        }
    };
}

impl_tuple_args!(A1 0);
impl_tuple_args!(A1 0, A2 1);
impl_tuple_args!(A1 0, A2 1, A3 2);
impl_tuple_args!(A1 0, A2 1, A3 2, A4 3);
impl_tuple_args!(A1 0, A2 1, A3 2, A4 3, A5 4);
impl_tuple_args!(A1 0, A2 1, A3 2, A4 3, A5 4, A6 5);
impl_tuple_args!(A1 0, A2 1, A3 2, A4 3, A5 4, A6 5, A7 6);
impl_tuple_args!(A1 0, A2 1, A3 2, A4 3, A5 4, A6 5, A7 6, A8 7);

impl<D: fmt::Display> CacheArgs for [D] {
    fn write_key(&self, builder: &mut CacheKeyBuilder) {
        for arg in self {
            builder.push_arg(arg);
        }
    }
}

impl<D: fmt::Display, const N: usize> CacheArgs for [D; N] {
    fn write_key(&self, builder: &mut CacheKeyBuilder) {
        self.as_slice().write_key(builder)
    }
}

impl<D: fmt::Display> CacheArgs for Vec<D> {
    fn write_key(&self, builder: &mut CacheKeyBuilder) {
        self.as_slice().write_key(builder)
    }
}

impl<A: CacheArgs + ?Sized> CacheArgs for &A {
    fn write_key(&self, builder: &mut CacheKeyBuilder) {
        (**self).write_key(builder)
    }
}
