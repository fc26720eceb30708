//! Provider selector (L11, candidate half) — spec.md §4.11. Grounded on
//! `gproxy-provider-impl/src/dispatch/plan.rs`'s per-operation dispatch
//! table, generalized from an `OperationKind`-keyed lookup to
//! priority/weight ordering over the candidate set.

use gw_protocol::Format;
use rand::Rng;

use crate::model::{ProviderConfig, ProviderType};

pub struct SelectionContext<'a> {
    pub client_format: Format,
    pub key_provider_group_allowlist: Option<&'a [String]>,
    pub requested_model: Option<&'a str>,
}

/// `true` when a `(clientFormat, providerType)` pair is either native or
/// backed by a registered `gw_transform` pair — the concrete set of six
/// implemented round-trips from spec.md §4.10, kept in sync by hand
/// rather than probed at runtime (probing with a throwaway body would
/// conflate "pair unregistered" with "body malformed").
fn compatible_with(client_format: Format, provider_type: ProviderType) -> bool {
    let native = provider_type.native_format();
    if native == client_format {
        return true;
    }
    matches!(
        (client_format, native),
        (Format::OpenAi, Format::Claude)
            | (Format::Claude, Format::OpenAi)
            | (Format::GeminiCli, Format::OpenAi)
            | (Format::OpenAi, Format::GeminiCli)
            | (Format::OpenAi, Format::Codex)
            | (Format::Codex, Format::OpenAi)
    )
}

fn group_allowed(provider: &ProviderConfig, allowlist: Option<&[String]>) -> bool {
    match (allowlist, &provider.provider_group) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(allowed), Some(group)) => allowed.iter().any(|g| g == group),
    }
}

fn model_allowed(provider: &ProviderConfig, requested_model: Option<&str>) -> bool {
    match (&provider.model_allowlist, requested_model) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(allowlist), Some(model)) => allowlist.iter().any(|m| m == model),
    }
}

/// Providers eligible for this request: enabled, not soft-deleted (the
/// caller is expected to have already filtered deleted rows out of
/// `providers`), format-compatible, group-scoped, circuit not open, and
/// within any explicit model allow-list.
pub fn candidate_set<'a>(
    providers: &'a [ProviderConfig],
    ctx: &SelectionContext<'_>,
    circuit_open: impl Fn(i64) -> bool,
) -> Vec<&'a ProviderConfig> {
    providers
        .iter()
        .filter(|p| p.is_enabled)
        .filter(|p| compatible_with(ctx.client_format, p.provider_type))
        .filter(|p| group_allowed(p, ctx.key_provider_group_allowlist))
        .filter(|p| !circuit_open(p.id))
        .filter(|p| model_allowed(p, ctx.requested_model))
        .collect()
}

/// Orders candidates ascending by `priority`, weighted-random tie-break
/// within equal priority (weights `<= 0` treated as `1`), with a
/// secondary preference for providers that speak `client_format`
/// natively over ones needing translation.
pub fn order_candidates<'a>(
    mut candidates: Vec<&'a ProviderConfig>,
    client_format: Format,
) -> Vec<&'a ProviderConfig> {
    let mut rng = rand::rng();
    candidates.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| {
            let a_native = a.provider_type.native_format() == client_format;
            let b_native = b.provider_type.native_format() == client_format;
            b_native.cmp(&a_native)
        })
    });

    // Shuffle within each (priority, native-vs-translated) group using the
    // provider's weight as a selection bias, Fisher-Yates style.
    let mut start = 0;
    while start < candidates.len() {
        let mut end = start + 1;
        while end < candidates.len()
            && candidates[end].priority == candidates[start].priority
            && (candidates[end].provider_type.native_format() == client_format)
                == (candidates[start].provider_type.native_format() == client_format)
        {
            end += 1;
        }
        weighted_shuffle(&mut candidates[start..end], &mut rng);
        start = end;
    }
    candidates
}

fn weighted_shuffle<'a>(group: &mut [&'a ProviderConfig], rng: &mut impl Rng) {
    let weight_of = |p: &ProviderConfig| if p.weight > 0 { p.weight as f64 } else { 1.0 };
    let mut remaining: Vec<&ProviderConfig> = group.to_vec();
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|p| weight_of(p)).sum();
        let mut pick = rng.random_range(0.0..total);
        let mut chosen = 0;
        for (i, p) in remaining.iter().enumerate() {
            pick -= weight_of(p);
            if pick <= 0.0 {
                chosen = i;
                break;
            }
        }
        ordered.push(remaining.remove(chosen));
    }
    group.copy_from_slice(&ordered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyUrlConfig;
    use std::collections::HashMap;

    fn provider(id: i64, priority: i32, provider_type: ProviderType) -> ProviderConfig {
        ProviderConfig {
            id,
            name: format!("p{id}"),
            provider_type,
            url: "https://example.test".to_string(),
            credential: "secret".to_string(),
            is_enabled: true,
            priority,
            weight: 1,
            provider_group: None,
            model_redirects: HashMap::new(),
            proxy: ProxyUrlConfig::default(),
            model_allowlist: None,
        }
    }

    #[test]
    fn disabled_providers_are_excluded() {
        let mut p = provider(1, 0, ProviderType::Claude);
        p.is_enabled = false;
        let ctx = SelectionContext {
            client_format: Format::Claude,
            key_provider_group_allowlist: None,
            requested_model: None,
        };
        let candidates = candidate_set(&[p], &ctx, |_| false);
        assert!(candidates.is_empty());
    }

    #[test]
    fn open_circuit_excludes_provider() {
        let p = provider(1, 0, ProviderType::Claude);
        let ctx = SelectionContext {
            client_format: Format::Claude,
            key_provider_group_allowlist: None,
            requested_model: None,
        };
        let candidates = candidate_set(&[p], &ctx, |_| true);
        assert!(candidates.is_empty());
    }

    #[test]
    fn ordering_respects_priority() {
        let providers = vec![provider(1, 5, ProviderType::Claude), provider(2, 1, ProviderType::Claude)];
        let refs: Vec<&ProviderConfig> = providers.iter().collect();
        let ordered = order_candidates(refs, Format::Claude);
        assert_eq!(ordered[0].id, 2);
        assert_eq!(ordered[1].id, 1);
    }
}
