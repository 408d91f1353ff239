pub mod frames;
use std::{
    marker::PhantomData,
    ops::{Deref, Mul},
};

pub use frames::*;
use nalgebra::{IsometryMatrix3, RealField};

/// A value tagged with the coordinate frame it is expressed in.
///
/// Transforms are tagged with `fn(From) -> To`, so `point * transform` only compiles when the
/// frames line up.
#[derive(Debug)]
pub struct Framed<T, F> {
    inner: T,
    frame: PhantomData<F>,
}

impl<T: Clone, F> Clone for Framed<T, F> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<T: Copy, F> Copy for Framed<T, F> {}

impl<T: PartialEq, F> PartialEq for Framed<T, F> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T, F> Framed<T, F> {
    pub const fn new(inner: T) -> Self {
        Self {
            inner,
            frame: PhantomData,
        }
    }
    pub fn new_with_frame(inner: T, frame: F) -> Self {
        let _ = frame;
        Self::new(inner)
    }
    #[inline]
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T, F1, F2> Framed<T, fn(F1) -> F2> {
    pub fn new_transform(inner: T, from: F1, to: F2) -> Self {
        let _ = (from, to);
        Self::new(inner)
    }
}

impl<T: RealField, F1, F2> Framed<IsometryMatrix3<T>, fn(F1) -> F2> {
    pub fn inverse(&self) -> Framed<IsometryMatrix3<T>, fn(F2) -> F1> {
        Framed::new(self.inner.inverse())
    }
}

impl<T, F> Deref for Framed<T, F> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T1, T2, F1, F2> Mul<Framed<T2, fn(F1) -> F2>> for Framed<T1, F1>
where
    T2: Mul<T1>,
{
    type Output = Framed<<T2 as Mul<T1>>::Output, F2>;
    fn mul(self, transform: Framed<T2, fn(F1) -> F2>) -> Self::Output {
        Framed::new(transform.inner * self.inner)
    }
}

impl<'a, T1, T2, F1, F2> Mul<&'a Framed<T2, fn(F1) -> F2>> for &'a Framed<T1, F1>
where
    &'a T2: Mul<&'a T1>,
{
    type Output = Framed<<&'a T2 as Mul<&'a T1>>::Output, F2>;
    fn mul(self, transform: &'a Framed<T2, fn(F1) -> F2>) -> Self::Output {
        Framed::new(transform.deref() * self.deref())
    }
}

/// Chains `F1 -> F2` with `F2 -> F3`.
impl<T1, T2, F1, F2, F3> Mul<Framed<T2, fn(F2) -> F3>> for Framed<T1, fn(F1) -> F2>
where
    T2: Mul<T1>,
{
    type Output = Framed<<T2 as Mul<T1>>::Output, fn(F1) -> F3>;
    fn mul(self, transform: Framed<T2, fn(F2) -> F3>) -> Self::Output {
        Framed::new(transform.inner * self.inner)
    }
}
