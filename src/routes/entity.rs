//! Entity CRUD routes for one record type.
//! Collection paths take the record (or filter) in the body or query; `/:id` paths take an
//! identifier, `v1,v2` for composite keys.

use crate::context::ExecutionContext;
use crate::entity::Entity;
use crate::handlers::entity::{
    delete_by_id, delete_one, list, read, replace_by_id, save, update, update_by_id,
};
use axum::{routing::get, Router};

pub fn entity_routes<E: Entity>(ctx: ExecutionContext) -> Router {
    Router::new()
        .route(
            "/",
            get(list::<E>)
                .post(save::<E>)
                .put(save::<E>)
                .patch(update::<E>)
                .delete(delete_one::<E>),
        )
        .route(
            "/:id",
            get(read::<E>)
                .put(replace_by_id::<E>)
                .patch(update_by_id::<E>)
                .delete(delete_by_id::<E>),
        )
        .with_state(ctx)
}
