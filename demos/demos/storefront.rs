//! Storefront Sub-request Example
//!
//! Simulates a burst of page renders. Every page issues the same three
//! commerce API queries; the request cache collapses them so that only one
//! request per query reaches the (simulated) upstream.
//!
//! Features shown:
//! - Single-flight deduplication across concurrent renders
//! - Query-based cache keys
//! - Stale-while-revalidate with `with_cache`
//! - A bounded Moka store
//! - `Cache-Control` headers for each strategy
//!
//! Run:
//!   cargo run -p stockroom-demos --example storefront

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use stockroom::{
    CacheKey, CacheOptions, CacheStrategy, RequestCache, generate_cache_control_header,
};
use stockroom_moka::MokaBackend;

const SHOP_QUERY: &str = "query Shop { shop { name } }";
const MENU_QUERY: &str = "query Menu($handle: String!) { menu(handle: $handle) { items { title } } }";
const PRODUCT_QUERY: &str = "query Product($handle: String!) { product(handle: $handle) { title price } }";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    title: String,
    price: u32,
}

/// Simulated commerce API that counts the requests it receives.
#[derive(Clone, Default)]
struct Upstream {
    requests: Arc<AtomicUsize>,
}

impl Upstream {
    async fn query<T>(&self, name: &str, value: T) -> Result<T, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::info!(query = name, "upstream request");
        tokio::time::sleep(Duration::from_millis(80)).await;
        Ok(value)
    }
}

async fn render_page(
    cache: RequestCache<MokaBackend>,
    upstream: Upstream,
    page: usize,
) -> Result<String, stockroom::CacheError<String>> {
    let shop = {
        let upstream = upstream.clone();
        cache.get_or_set(
            CacheKey::from_query(SHOP_QUERY, &serde_json::Value::Null),
            CacheStrategy::LONG,
            move || async move { upstream.query("shop", "Outfitters".to_string()).await },
        )
    };
    let menu = {
        let upstream = upstream.clone();
        cache.get_or_set(
            CacheKey::from_query(MENU_QUERY, &json!({ "handle": "main" })),
            CacheStrategy::SHORT,
            move || async move {
                upstream
                    .query("menu", vec!["Home".to_string(), "Catalog".to_string()])
                    .await
            },
        )
    };
    let product = {
        let upstream = upstream.clone();
        cache.with_cache(
            CacheKey::from_query(PRODUCT_QUERY, &json!({ "handle": "shirt" })),
            CacheOptions {
                max_age: Some(1),
                stale_while_revalidate: Some(30),
                ..Default::default()
            },
            move || async move {
                upstream
                    .query(
                        "product",
                        Product {
                            title: "Shirt".to_string(),
                            price: 20,
                        },
                    )
                    .await
            },
        )
    };

    let (shop, menu, product) = tokio::try_join!(shop, menu, product)?;
    tracing::debug!(page, status = ?product.status, "rendered");
    Ok(format!(
        "{shop} | {} | {} ${}",
        menu.join(" / "),
        product.value.title,
        product.value.price
    ))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,stockroom=debug")
        .init();

    for strategy in [CacheStrategy::NONE, CacheStrategy::SHORT, CacheStrategy::LONG] {
        tracing::info!(header = %generate_cache_control_header(&strategy), "strategy");
    }

    let cache = RequestCache::with_backend(MokaBackend::builder().max_entries(1_000).build());
    let upstream = Upstream::default();

    let renders = (0..50).map(|page| tokio::spawn(render_page(cache.clone(), upstream.clone(), page)));
    for render in futures::future::join_all(renders).await {
        match render {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => tracing::error!(%error, "render failed"),
            Err(error) => tracing::error!(%error, "render task panicked"),
        }
    }
    tracing::info!(
        upstream_requests = upstream.requests.load(Ordering::SeqCst),
        "first burst of 50 pages rendered"
    );

    // Let the product entry go stale, then render once more: the stale copy is
    // served and a single background refresh goes upstream.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    match render_page(cache.clone(), upstream.clone(), 50).await {
        Ok(page) => tracing::info!(%page, "rendered from stale product"),
        Err(error) => tracing::error!(%error, "render failed"),
    }
    cache.offload().wait_all().await;

    tracing::info!(
        upstream_requests = upstream.requests.load(Ordering::SeqCst),
        in_flight = cache.flights_in_progress(),
        "done"
    );
}
