//! Fuzz target for topic-name parsing and the partition-shard filter.
//!
//! Listings come straight from a remote admin API, so parsing must never
//! panic and anything it accepts must render back to an equivalent key.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pulsar_sync::entity::{is_partition_shard, TenantIdentity, TenantNamespace, TenantNamespaceTopic};

fuzz_target!(|data: (&str, &str, &str)| {
    let (tenant, namespace, listed) = data;
    let ns = TenantNamespace::new(TenantIdentity::new(tenant), namespace);

    // Should never panic
    let _ = is_partition_shard(listed);
    if let Some(parsed) = TenantNamespace::from_listed(ns.tenant(), listed) {
        // Accepted namespaces stay under the listing tenant
        assert_eq!(parsed.tenant(), ns.tenant());
        assert!(!parsed.local_name().is_empty());
    }

    if let Some(topic) = TenantNamespaceTopic::from_listed(&ns, listed) {
        // Accepted names carry a non-empty local part without separators
        assert!(!topic.local_name().is_empty());
        assert!(!topic.local_name().contains('/'));

        // Re-parsing the rendered name is stable
        let again = TenantNamespaceTopic::from_listed(&ns, &topic.topic());
        assert_eq!(again.as_ref(), Some(&topic));
    }
});
