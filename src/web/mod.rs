use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::Query,
    response::{IntoResponse, Response},
    routing::get,
};
use http::Method;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{config::CONFIG, error::RouteError, model::Point, service};

pub async fn serve() {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(tower_http::cors::Any);

    let app = Router::new()
        .route("/api/safe-routes", get(get_safe_routes))
        .route("/healthz", get(|| async { "ok" }))
        .layer(cors);

    let bind_to = format!("[::]:{}", CONFIG.port);
    info!("binding to {bind_to}");
    let listener = TcpListener::bind(&bind_to).await.expect("bind listener");
    axum::serve(listener, app).await.expect("serve");
}

async fn get_safe_routes(Query(query): Query<HashMap<String, String>>) -> Response {
    let (origin, destination) = match parse_endpoints(&query) {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    match service::plan_routes(origin, destination).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Missing or malformed query parameters are indistinguishable from invalid
/// coordinates as far as the caller is concerned.
fn parse_endpoints(query: &HashMap<String, String>) -> Result<(Point, Point), RouteError> {
    let coord = |key: &str| -> Result<f64, RouteError> {
        query
            .get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or(RouteError::InvalidCoordinate)
    };

    let origin = Point::new(coord("origin_lat")?, coord("origin_lng")?);
    let destination = Point::new(coord("dest_lat")?, coord("dest_lng")?);
    Ok((origin, destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_endpoints() {
        let q = query(&[
            ("origin_lat", "51.5007"),
            ("origin_lng", "-0.1246"),
            ("dest_lat", "51.5055"),
            ("dest_lng", "-0.0754"),
        ]);
        let (origin, destination) = parse_endpoints(&q).unwrap();
        assert_eq!(origin, Point::new(51.5007, -0.1246));
        assert_eq!(destination, Point::new(51.5055, -0.0754));
    }

    #[test]
    fn test_missing_or_malformed_params_are_invalid_coordinate() {
        let missing = query(&[("origin_lat", "51.5")]);
        assert!(matches!(
            parse_endpoints(&missing),
            Err(RouteError::InvalidCoordinate)
        ));

        let garbage = query(&[
            ("origin_lat", "51.5"),
            ("origin_lng", "-0.1"),
            ("dest_lat", "north"),
            ("dest_lng", "-0.07"),
        ]);
        assert!(matches!(
            parse_endpoints(&garbage),
            Err(RouteError::InvalidCoordinate)
        ));
    }
}
