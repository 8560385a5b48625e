//! The tree the front-end hands over, and everything done to it until every
//! kernel works on one element at a time.

pub mod ast;
pub mod naming;
pub mod passes;
pub mod primitive;
pub mod runtime;
pub mod ty;
pub mod type_inference;
