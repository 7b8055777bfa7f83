use std::marker::PhantomData;

/// A single step that rewrites a request before it is sent.
pub trait Transformer: Sized {
    type Value;

    fn transform(&mut self, value: Self::Value) -> Self::Value;

    fn pipe<B>(self, other: B) -> Pipe<Self, B>
    where
        B: Transformer<Value = Self::Value>,
    {
        Pipe(self, other)
    }

    /// Applies this step only when `condition` holds for the value.
    fn when<F>(self, condition: F) -> Cond<Self, F>
    where
        F: Fn(&Self::Value) -> bool,
    {
        Cond(self, condition)
    }
}

/// Identity step, a convenient head for a pipeline.
pub struct DefaultTransformation<T>(PhantomData<T>);

impl<T> DefaultTransformation<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for DefaultTransformation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Transformer for DefaultTransformation<T> {
    type Value = T;

    fn transform(&mut self, value: Self::Value) -> Self::Value {
        value
    }
}

pub struct Pipe<A, B>(A, B);

impl<A, B> Transformer for Pipe<A, B>
where
    A: Transformer,
    B: Transformer<Value = A::Value>,
{
    type Value = A::Value;

    fn transform(&mut self, value: Self::Value) -> Self::Value {
        self.1.transform(self.0.transform(value))
    }
}

pub struct Cond<A, F>(A, F);

impl<A, F> Transformer for Cond<A, F>
where
    A: Transformer,
    F: Fn(&A::Value) -> bool,
{
    type Value = A::Value;

    fn transform(&mut self, value: Self::Value) -> Self::Value {
        if (self.1)(&value) { self.0.transform(value) } else { value }
    }
}
