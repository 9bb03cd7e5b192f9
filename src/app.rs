use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Key-by-date document routes plus the id-keyed prospects and month-keyed
/// budgets. `health`, `stats`, `prospects`, `budgets` and `reports` are
/// reserved resource names.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats/:resource", get(handlers::get_stats))
        .route(
            "/prospects",
            get(handlers::list_prospects).post(handlers::create_prospect),
        )
        .route(
            "/prospects/:id",
            get(handlers::get_prospect)
                .patch(handlers::update_prospect)
                .delete(handlers::delete_prospect),
        )
        .route("/prospects/:id/checklist", patch(handlers::update_checklist))
        .route("/prospects/:id/progress", get(handlers::prospect_progress))
        .route("/budgets", get(handlers::list_budgets).post(handlers::save_budget))
        .route("/budgets/:month", get(handlers::get_budget))
        .route("/reports/:month", get(handlers::get_report))
        .route("/:resource", get(handlers::list_records).post(handlers::save_record))
        .route(
            "/:resource/:date",
            get(handlers::get_record)
                .patch(handlers::patch_record)
                .delete(handlers::delete_record),
        )
        .route("/:resource/:date/items", post(handlers::add_item))
        .route(
            "/:resource/:date/items/:id",
            patch(handlers::toggle_item).delete(handlers::delete_item),
        )
        .with_state(state)
}
