//! Property tests for the ventilation hash and group resolution.

use proptest::prelude::*;

use vent::models::Host;
use vent::ventilation::{checksum, resolve_host_group};

/// Straightforward Adler-32 over the byte string, used as the reference
/// the production implementation must agree with.
fn adler32_reference(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for byte in data {
        a = (a + u32::from(*byte)) % MOD;
        b = (b + a) % MOD;
    }
    (b << 16) | a
}

fn host_name() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z0-9.-]{1,32}").unwrap()
}

fn group_segment() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z0-9_-]{1,12}").unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: The ventilation hash is exactly Adler-32.
    ///
    /// Assignments survive restarts only because every run recomputes the
    /// same hash for the same host name.
    #[test]
    fn property_checksum_matches_adler32(name in "(?s).{0,128}") {
        prop_assert_eq!(checksum(&name), adler32_reference(name.as_bytes()));
    }

    /// PROPERTY: An explicit ventilation override wins and loses exactly
    /// one leading slash.
    #[test]
    fn property_override_strips_single_leading_slash(
        name in host_name(),
        group in group_segment()
    ) {
        let host = Host {
            name,
            address: String::new(),
            groups: vec!["/Other/Linux".to_string()],
            ventilation: Some(format!("/{}", group)),
        };
        prop_assert_eq!(resolve_host_group(&host).unwrap(), group);
    }

    /// PROPERTY: With a single hierarchy ancestor, resolution returns it
    /// no matter how many subtrees of that ancestor the host joins.
    #[test]
    fn property_unique_ancestor_resolves(
        name in host_name(),
        top in group_segment(),
        subs in proptest::collection::vec(group_segment(), 1..4)
    ) {
        let groups = subs
            .iter()
            .map(|sub| format!("/{}/{}", top, sub))
            .collect();
        let host = Host {
            name,
            address: String::new(),
            groups,
            ventilation: None,
        };
        prop_assert_eq!(resolve_host_group(&host).unwrap(), top);
    }

    /// PROPERTY: Two distinct top-level ancestors make resolution fail
    /// rather than guess.
    #[test]
    fn property_ambiguous_ancestors_rejected(
        name in host_name(),
        top_a in group_segment(),
        top_b in group_segment()
    ) {
        prop_assume!(top_a != top_b);
        let host = Host {
            name,
            address: String::new(),
            groups: vec![format!("/{}/x", top_a), format!("/{}/y", top_b)],
            ventilation: None,
        };
        prop_assert!(resolve_host_group(&host).is_err());
    }
}
