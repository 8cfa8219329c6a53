//! MF-010: Cycle and depth analysis over the type-map graph.
//!
//! Walks the graph reachable from a root type map depth-first with an
//! explicit path stack and annotates it before plan assembly:
//! reference-type cycles turn on `preserve_references`, value-type cycles get
//! a recursion bound, and members that must dispatch through the registry
//! lose their `inline` flag. Annotations are monotone, so re-running the walk
//! on an annotated graph changes nothing.

use super::config::Configuration;
use super::typemap::{MemberMap, TypeMap};
use super::types::TypePair;
use std::sync::Arc;

/// One annotation made by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `preserve_references` turned on for `target`, found through `member` of `owner`
    PreserveReferences {
        owner: TypePair,
        member: String,
        target: TypePair,
    },
    /// `member` of `owner` will dispatch instead of inlining
    InlineReset { owner: TypePair, member: String },
    /// Value-type cycle bounded to `depth`
    DepthBounded { target: TypePair, depth: usize },
}

/// Decisions made by one walk, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub decisions: Vec<Decision>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn preserved(&self) -> impl Iterator<Item = &TypePair> {
        self.decisions.iter().filter_map(|d| match d {
            Decision::PreserveReferences { target, .. } => Some(target),
            _ => None,
        })
    }
}

/// Analyze the graph reachable from `root`.
pub fn analyze(config: &Configuration, root: &TypeMap) -> Analysis {
    let mut analysis = Analysis::default();
    let mut path = Vec::new();
    check_for_cycles(config, root, &mut path, &mut analysis);
    analysis
}

fn check_for_cycles(
    config: &Configuration,
    type_map: &TypeMap,
    path: &mut Vec<TypePair>,
    analysis: &mut Analysis,
) {
    let pushed = !path.contains(type_map.pair());
    if pushed {
        path.push(type_map.pair().clone());
    }
    for member in member_maps(config, type_map) {
        let Some(nested) = associated_type_map(config, member) else {
            continue;
        };
        if nested.has_type_converter() {
            continue;
        }
        if member.is_inline()
            && (nested.preserve_references() || path.len() == config.options.max_execution_plan_depth)
        {
            reset_inline(type_map, member, analysis);
        }
        if nested.preserve_references() || nested.is_compiled() {
            continue;
        }
        if path.contains(nested.pair()) {
            if config.catalog.is_value_type(nested.source_type()) {
                if nested.max_depth() == 0 {
                    let depth = config.options.value_cycle_max_depth;
                    nested.set_max_depth(depth);
                    tracing::debug!(target_map = %nested.pair(), depth, "bounding value-type cycle");
                    analysis.decisions.push(Decision::DepthBounded {
                        target: nested.pair().clone(),
                        depth,
                    });
                }
                continue;
            }
            preserve(type_map, member, nested, analysis);
            if member.is_inline() {
                reset_inline(type_map, member, analysis);
            }
            for derived in config.derived_type_maps(nested) {
                preserve(type_map, member, derived, analysis);
            }
        }
        check_for_cycles(config, nested, path, analysis);
    }
    if pushed {
        path.pop();
    }
}

/// Own members (including mixin members), path leaves, constructor
/// parameters, then the members of derived type maps.
fn member_maps<'c>(config: &'c Configuration, type_map: &'c TypeMap) -> Vec<&'c MemberMap> {
    let mut members = type_map.all_member_maps();
    for derived in config.derived_type_maps(type_map) {
        members.extend(derived.all_member_maps());
    }
    members
}

fn associated_type_map<'c>(config: &'c Configuration, member: &MemberMap) -> Option<&'c Arc<TypeMap>> {
    if !member.can_resolve_value() {
        return None;
    }
    config.resolve_associated_type_map(&member.types())
}

fn reset_inline(owner: &TypeMap, member: &MemberMap, analysis: &mut Analysis) {
    member.set_inline(false);
    tracing::debug!(owner = %owner.pair(), member = %member.destination_name, "resetting inline");
    analysis.decisions.push(Decision::InlineReset {
        owner: owner.pair().clone(),
        member: member.destination_name.clone(),
    });
}

fn preserve(owner: &TypeMap, member: &MemberMap, target: &TypeMap, analysis: &mut Analysis) {
    if target.preserve_references() {
        return;
    }
    target.set_preserve_references(true);
    tracing::debug!(
        owner = %owner.pair(),
        member = %member.destination_name,
        target_map = %target.pair(),
        "setting preserve references"
    );
    analysis.decisions.push(Decision::PreserveReferences {
        owner: owner.pair().clone(),
        member: member.destination_name.clone(),
        target: target.pair().clone(),
    });
}
