use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::server::AppState;

mod admin_users;
mod auth;
mod auth_session;
mod favorites;
mod llm_configs;
mod me_runs;
mod prompts;
mod runs;
mod taxonomy;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // Accounts
        .route("/auth/signup", post(auth_session::signup))
        .route("/auth/login", post(auth_session::login))
        .route("/auth/logout", post(auth_session::logout))
        .route("/auth/session", get(auth_session::get_session))
        // Admin
        .route("/admin/users", get(admin_users::list_users))
        .route("/admin/users/{id}/role", put(admin_users::update_role))
        .route(
            "/admin/llm-configs",
            get(llm_configs::list_configs).post(llm_configs::create_config),
        )
        .route(
            "/admin/llm-configs/{id}",
            put(llm_configs::update_config).delete(llm_configs::delete_config),
        )
        .route(
            "/admin/llm-configs/{id}/activate",
            put(llm_configs::activate_config),
        )
        .route("/admin/groups", post(taxonomy::create_group))
        .route("/admin/subgroups", post(taxonomy::create_subgroup))
        .route("/llm-config/active", get(llm_configs::get_active_config))
        // Taxonomy
        .route("/groups", get(taxonomy::list_groups))
        .route("/subgroups", get(taxonomy::list_subgroups))
        .route("/subgroups/{id}/details", get(taxonomy::subgroup_details))
        // Prompts
        .route(
            "/prompts",
            get(prompts::list_prompts).post(prompts::create_prompt),
        )
        .route(
            "/prompts/{id}",
            get(prompts::get_prompt)
                .put(prompts::update_prompt)
                .delete(prompts::delete_prompt),
        )
        .route(
            "/prompts/{id}/favorite",
            post(favorites::add_favorite).delete(favorites::remove_favorite),
        )
        .route("/prompts/{id}/variables", get(runs::prompt_variables))
        .route("/prompts/{id}/run", post(runs::run_prompt))
        // Me
        .route("/me/favorites", get(favorites::my_favorites))
        .route("/me/runs", get(me_runs::my_runs))
        .route("/user/stats", get(me_runs::my_stats))
}
