use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use simd_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Origin,
    Destination,
}

impl Endpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Destination => "destination",
        }
    }
}

/// Everything that can terminate a route request, mapped onto the HTTP
/// surface in one place. Graph and search failures are fatal for the request
/// but never poison the caches.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("coordinates must be finite lat/lng values")]
    InvalidCoordinate,

    #[error("destination is {actual_km:.1}km away, past the {limit_km}km limit")]
    DestinationOutOfRange {
        actual_km: f64,
        limit_km: f64,
        estimated_data_points: u64,
    },

    #[error("no walking network in the requested area")]
    NoWalkingNetwork,

    #[error("no road within 200m of the {}", .which.as_str())]
    NoNearbyRoad { which: Endpoint },

    #[error("search exhausted without reaching the destination")]
    NoRouteFound { nodes: usize, edges: usize },

    #[error("every configured upstream mirror failed")]
    UpstreamUnavailable,

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("internal error")]
    Internal,
}

impl RouteError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCoordinate => "invalid_coordinate",
            Self::DestinationOutOfRange { .. } => "destination_out_of_range",
            Self::NoWalkingNetwork => "no_walking_network",
            Self::NoNearbyRoad { .. } => "no_nearby_road",
            Self::NoRouteFound { .. } => "no_route_found",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::Internal => "internal_error",
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCoordinate | Self::DestinationOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::NoWalkingNetwork | Self::NoNearbyRoad { .. } | Self::NoRouteFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let body = match &self {
            RouteError::DestinationOutOfRange {
                actual_km,
                limit_km,
                estimated_data_points,
            } => json!({
                "status": "ERROR",
                "error": self.kind(),
                "message": message,
                "actualDistanceKm": (actual_km * 10.).round() / 10.,
                "maxDistanceKm": limit_km,
                "estimatedDataPoints": estimated_data_points,
            }),
            RouteError::NoNearbyRoad { which } => json!({
                "status": "ERROR",
                "error": self.kind(),
                "message": message,
                "which": which.as_str(),
            }),
            RouteError::NoRouteFound { nodes, edges } => json!({
                "status": "ERROR",
                "error": self.kind(),
                "message": message,
                "graphNodes": nodes,
                "graphEdges": edges,
            }),
            _ => json!({
                "status": "ERROR",
                "error": self.kind(),
                "message": message,
            }),
        };

        (self.status(), Json(body)).into_response()
    }
}
