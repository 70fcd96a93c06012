//! Endpoint registry - built-in report definitions plus configured ones.

use gridpoll::{EndpointSpec, Granularity};

/// Returns the built-in endpoints.
pub fn builtin_endpoints() -> Vec<EndpointSpec> {
    vec![
        // Real-time LMPs by node, zone and hub; published every SCED run
        EndpointSpec::new("rtm_lmp", "np6-788-cd/lmp_node_zone_hub", Granularity::Second)
            .with_params("SCEDTimestampFrom", "SCEDTimestampTo")
            .with_lookback_seconds(15 * 60),
        // Day-ahead settlement point prices; one delivery date at a time
        EndpointSpec::new(
            "dam_spp",
            "np4-190-cd/dam_stlmnt_pnt_prices",
            Granularity::Day,
        )
        .with_params("deliveryDateFrom", "deliveryDateTo")
        .with_lookback_seconds(24 * 60 * 60),
    ]
}

/// Built-ins with `configured` layered on top; a configured entry replaces
/// the built-in with the same id.
pub fn resolve_endpoints(configured: &[EndpointSpec]) -> Vec<EndpointSpec> {
    let mut endpoints = builtin_endpoints();
    for spec in configured {
        match endpoints.iter_mut().find(|e| e.id == spec.id) {
            Some(existing) => *existing = spec.clone(),
            None => endpoints.push(spec.clone()),
        }
    }
    endpoints
}
