//! MF-015: BLAKE3 fingerprints of analyzed type maps.
//!
//! A fingerprint covers what the analyzer and assembler decide for one type
//! map: its pair, the preserve flag, the depth bound, member order with inline
//! flags, and resolver kinds. Two compilations of the same configuration
//! produce equal fingerprints.

use super::config::Configuration;
use super::typemap::{MemberMap, TypeMap};

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

fn member_line(prefix: &str, member: &MemberMap) -> String {
    let resolver = member.resolver.as_ref().map_or("none", |r| r.kind_name());
    format!(
        "{}{}:{}:{}:inline={}:ignored={}",
        prefix,
        member.destination_name,
        member.destination_type,
        resolver,
        member.is_inline(),
        member.ignored
    )
}

/// Fingerprint of one type map's current annotations.
pub fn type_map_fingerprint(type_map: &TypeMap) -> String {
    let mut lines = vec![
        format!("pair:{}", type_map.pair()),
        format!("preserve_references:{}", type_map.preserve_references()),
        format!("max_depth:{}", type_map.max_depth()),
        format!("converter:{}", type_map.has_type_converter()),
    ];
    lines.extend(type_map.ordered_member_maps().into_iter().map(|m| member_line("member:", m)));
    for path in &type_map.path_maps {
        lines.push(member_line(&format!("path:{}:", path.display_path()), &path.member));
    }
    if let Some(ctor) = &type_map.constructor_map {
        lines.extend(ctor.parameters.iter().map(|p| member_line("parameter:", &p.member)));
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    composite_hash(&refs)
}

/// Fingerprint of every type map in declaration order.
pub fn configuration_fingerprint(config: &Configuration) -> String {
    let parts: Vec<String> = config.type_maps().map(|tm| type_map_fingerprint(tm)).collect();
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    composite_hash(&refs)
}
