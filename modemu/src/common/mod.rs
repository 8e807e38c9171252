pub(crate) mod bits;
pub(crate) mod cursor;
pub(crate) mod function;
