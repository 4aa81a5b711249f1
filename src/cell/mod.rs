//! Cell representation: heads, shapes, bodies, metadata and weak
//! back-references

pub mod backref;
pub mod body;
pub mod head;
pub mod magic;
pub mod shape;
