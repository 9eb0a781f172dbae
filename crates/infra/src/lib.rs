//! Infrastructure layer: the relational store, the document store and the
//! device broker, each behind an explicitly constructed client.

pub(crate) mod config;

pub mod document;
pub mod messaging;
pub mod relational;
