use serde::{Deserialize, Serialize};

/// Canonical gateway response body
///
/// Every error or fallback response leaving the gateway has this shape, so
/// clients can always correlate a failure with a trace id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub code: String,
    pub message: String,
    pub domain: String,
    pub path: String,
    pub trace_id: String,
}

impl GatewayResponse {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            domain: domain.into(),
            path: path.into(),
            trace_id: trace_id.into(),
        }
    }

    /// The terminal fallback body written when no handler responded
    pub fn route_not_found(path: &str, trace_id: &str) -> Self {
        Self::new(
            "ROUTE_NOT_FOUND",
            "no route matched the request",
            "",
            path,
            trace_id,
        )
    }
}

/// Routing decision recorded into the request context by the route handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResult {
    pub target_url: String,
    pub route_id: String,
    pub service_id: String,
    pub matched_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_shape() {
        let resp = GatewayResponse::route_not_found("/missing", "abc123");
        assert_eq!(resp.code, "ROUTE_NOT_FOUND");
        assert_eq!(resp.path, "/missing");
        assert_eq!(resp.trace_id, "abc123");
        assert!(resp.domain.is_empty());
    }

    #[test]
    fn test_camel_case_wire_fields() {
        let resp = GatewayResponse::route_not_found("/x", "t");
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("traceId").is_some());
        assert!(value.get("trace_id").is_none());
    }
}
