//! Axum Storefront Example
//!
//! A small storefront API whose handlers fetch data through a shared
//! `RequestCache` and describe the result with `Cache-Control` and `cache`
//! response headers.
//!
//! Run:
//!   cargo run -p stockroom-demos --example axum
//!
//! Endpoints:
//!   - http://localhost:3000/products/{handle} - product (short strategy)
//!   - http://localhost:3000/cart              - never cached (no-store)
//!
//! Try it:
//!   curl -v http://localhost:3000/products/shirt   # cache: MISS
//!   curl -v http://localhost:3000/products/shirt   # cache: HIT
//!   sleep 2; curl -v http://localhost:3000/products/shirt   # cache: STALE

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use stockroom::{CacheKey, CacheStrategy, RequestCache};
use stockroom_http::{apply_status, apply_strategy};

const PRODUCT_QUERY: &str = "query Product($handle: String!) { product(handle: $handle) { title price } }";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    handle: String,
    title: String,
    price: u32,
}

async fn fetch_product(handle: String) -> Result<Product, String> {
    tracing::info!(%handle, "Handler called - fetching from upstream");
    tokio::time::sleep(Duration::from_millis(150)).await;
    if handle == "missing" {
        return Err(format!("product {handle} not found"));
    }
    Ok(Product {
        title: handle.to_uppercase(),
        handle,
        price: 20,
    })
}

async fn product(State(cache): State<RequestCache>, Path(handle): Path<String>) -> Response {
    let strategy = CacheStrategy::SHORT;
    let key = CacheKey::from_query(PRODUCT_QUERY, &json!({ "handle": handle }));

    match cache
        .with_cache(key, &strategy, move || fetch_product(handle))
        .await
    {
        Ok(cached) => {
            let mut response = Json(cached.value).into_response();
            apply_strategy(response.headers_mut(), &strategy);
            apply_status(response.headers_mut(), cached.status);
            response
        }
        Err(error) => {
            tracing::warn!(%error, "product lookup failed");
            let mut response = (StatusCode::BAD_GATEWAY, error.to_string()).into_response();
            apply_strategy(response.headers_mut(), &CacheStrategy::NONE);
            response
        }
    }
}

async fn cart() -> Response {
    let mut response = Json(json!({ "lines": [] })).into_response();
    apply_strategy(response.headers_mut(), &CacheStrategy::NONE);
    response
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,stockroom=debug")
        .init();

    let cache = RequestCache::new();

    let app = Router::new()
        .route("/products/{handle}", get(product))
        .route("/cart", get(cart))
        .with_state(cache);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    tracing::info!("Listening on http://localhost:3000");
    axum::serve(listener, app).await.unwrap();
}
