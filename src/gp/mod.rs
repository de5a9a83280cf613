//! Common items related to Genetic Programming.
//!
//! Expressions are binary trees of arithmetic operators over named variables and constants.
//! `expr` covers their representation, generation and evaluation while `ops` provides the
//! depth-budget-aware genetic operators that reshape them.

pub mod expr;
pub mod ops;
