//! CrudService: generic repository over any [`Entity`](crate::entity::Entity).

mod crud;
mod query;

pub use crud::CrudService;
