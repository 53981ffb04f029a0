//! Schema-driven item mapping for DynamoDB.
//!
//! Declare a table's keys and a model's attributes once; every item written
//! through a [`Model`](dynamodb::Model) is checked against its schema on the
//! way in and mapped back to external names on the way out.

pub mod config;
pub mod dynamodb;
pub mod logging;
