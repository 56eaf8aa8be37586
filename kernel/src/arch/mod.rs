//! Architecture-specific primitives the paging core depends on.
//!
//! Everything else a real boot path would need -- trap vectors, GDT/IDT,
//! device discovery -- belongs to the boot-initialization collaborator
//! and is out of scope here.

pub mod entropy;
pub mod tlb;
