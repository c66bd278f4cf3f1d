/*!
 * Subscription Fingerprints
 *
 * Deterministic colon-joined identifiers keying the subscription registries.
 * The namespace form omits the trailing data/service segment.
 */

/// `tenant:namespace:group:dataId` (configs) or `...:serviceName` (services)
pub fn entry_fingerprint(tenant: &str, namespace: &str, group: &str, id: &str) -> String {
    format!("{tenant}:{namespace}:{group}:{id}")
}

/// `tenant:namespace:group`
pub fn namespace_fingerprint(tenant: &str, namespace: &str, group: &str) -> String {
    format!("{tenant}:{namespace}:{group}")
}
